//! Routes for querying user information.

use rocket::{get, serde::json::Json, State};
use rocket_okapi::{openapi, JsonSchema};
use serde::Serialize;

use app::user;

use crate::{access, state::RocketState};

#[derive(Debug, Serialize, JsonSchema)]
struct UserModel {
    /// Public wallet name, the handle other users transfer to.
    username: String,
    /// Registered email, if any.
    email: Option<String>,
    /// Current custodial balance in satoshis.
    balance_sats: i64,
    /// True if an external non-custodial wallet is linked.
    has_linked_wallet: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub(super) struct UserResponse {
    user: UserModel,
}

/// Get user details, such as the current balance.
#[openapi(tag = "User")]
#[get("/user")]
pub(super) async fn get(
    guard: access::ReadGuard,
    state: &State<RocketState>,
) -> Option<Json<UserResponse>> {
    user::get(guard.grant(), &state.db).await.map(|user| {
        Json(UserResponse {
            user: UserModel {
                username: user.username,
                email: user.email.map(|email| email.0),
                balance_sats: user.balance.0,
                has_linked_wallet: user.linked_wallet.is_some(),
            },
        })
    })
}
