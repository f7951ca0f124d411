//! Request guards. User routes authenticate with an `X-Auth-Token` header
//! resolved to a capability grant; the admin audit trigger uses a shared
//! secret bearer token from configuration.

use std::future::Future;

use app::{database::Database, user};
use okapi::openapi3::{Object, SecurityRequirement, SecurityScheme, SecuritySchemeData};
use rocket::{
    async_trait,
    http::Status,
    request::{FromRequest, Outcome},
    Request,
};
use rocket_okapi::{
    gen::OpenApiGenerator,
    request::{OpenApiFromRequest, RequestHeaderInput},
};
use thiserror::Error;

use crate::state::RocketState;

pub struct SpendGuard(app::auth::SpendGrant);

impl SpendGuard {
    pub fn grant(&self) -> &app::auth::SpendGrant {
        &self.0
    }
}

pub struct ReceiveGuard(app::auth::ReceiveGrant);

impl ReceiveGuard {
    pub fn grant(&self) -> &app::auth::ReceiveGrant {
        &self.0
    }
}

pub struct ReadGuard(app::auth::ReadGrant);

impl ReadGuard {
    pub fn grant(&self) -> &app::auth::ReadGrant {
        &self.0
    }
}

/// Proof that the request carried the admin shared secret.
pub struct AdminGuard;

#[derive(Debug, Error)]
pub enum Error {
    #[error("access denied")]
    AccessDenied(#[from] app::auth::AccessDenied),
    #[error("rate limit exceeded")]
    RateLimited,
}

const TOKEN_HEADER: &str = "X-Auth-Token";
const AUTHORIZATION_HEADER: &str = "Authorization";

#[async_trait]
impl<'r> FromRequest<'r> for SpendGuard {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        guard_impl(req, app::auth::get_spend_grant, Self).await
    }
}

#[async_trait]
impl<'r> FromRequest<'r> for ReceiveGuard {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        guard_impl(req, app::auth::get_receive_grant, Self).await
    }
}

#[async_trait]
impl<'r> FromRequest<'r> for ReadGuard {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        guard_impl(req, app::auth::get_read_grant, Self).await
    }
}

#[async_trait]
impl<'r> FromRequest<'r> for AdminGuard {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let state = req.rocket().state::<RocketState>().unwrap();
        match req.headers().get_one(AUTHORIZATION_HEADER) {
            Some(header)
                if header.strip_prefix("Bearer ") == Some(state.audit.admin_secret.as_str()) =>
            {
                Outcome::Success(AdminGuard)
            }
            _ => Outcome::Error((Status::Forbidden, app::auth::AccessDenied.into())),
        }
    }
}

impl<'a> OpenApiFromRequest<'a> for SpendGuard {
    fn from_request_input(
        _: &mut OpenApiGenerator,
        _: String,
        _: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(token_auth())
    }
}

impl<'a> OpenApiFromRequest<'a> for ReceiveGuard {
    fn from_request_input(
        _: &mut OpenApiGenerator,
        _: String,
        _: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(token_auth())
    }
}

impl<'a> OpenApiFromRequest<'a> for ReadGuard {
    fn from_request_input(
        _: &mut OpenApiGenerator,
        _: String,
        _: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(token_auth())
    }
}

impl<'a> OpenApiFromRequest<'a> for AdminGuard {
    fn from_request_input(
        _: &mut OpenApiGenerator,
        _: String,
        _: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(bearer_auth())
    }
}

async fn guard_impl<
    'a,
    'b,
    G: AnyGrant,
    F: Future<Output = Result<G, app::auth::AccessDenied>> + 'a,
    R,
>(
    req: &'a Request<'b>,
    get_grant: impl FnOnce(&'a Database, &'a str) -> F,
    create_guard: impl FnOnce(G) -> R,
) -> Outcome<R, Error> {
    match req.headers().get_one(TOKEN_HEADER) {
        Some(token) => {
            let state = req.rocket().state::<RocketState>().unwrap();
            match get_grant(&state.db, token).await {
                Ok(grant) => {
                    if state.rate_limit.limit(grant.user_id()) {
                        log::info!("rate limiting user {:?}", grant.user_id());
                        Outcome::Error((Status::TooManyRequests, Error::RateLimited))
                    } else {
                        Outcome::Success(create_guard(grant))
                    }
                }
                Err(e) => Outcome::Error((Status::Forbidden, e.into())),
            }
        }
        None => Outcome::Error((Status::Forbidden, app::auth::AccessDenied.into())),
    }
}

/// Helper trait implemented for all grant types.
trait AnyGrant {
    /// Every grant applies to a user.
    fn user_id(&self) -> user::Id;
}

impl AnyGrant for app::auth::SpendGrant {
    fn user_id(&self) -> user::Id {
        self.user_id
    }
}

impl AnyGrant for app::auth::ReceiveGrant {
    fn user_id(&self) -> user::Id {
        self.user_id
    }
}

impl AnyGrant for app::auth::ReadGrant {
    fn user_id(&self) -> user::Id {
        self.user_id
    }
}

fn token_auth() -> RequestHeaderInput {
    api_key_scheme(TOKEN_HEADER, format!("Requires an API key: \"{}\".", TOKEN_HEADER))
}

fn bearer_auth() -> RequestHeaderInput {
    api_key_scheme(
        AUTHORIZATION_HEADER,
        "Requires the admin shared secret as a bearer token.".to_owned(),
    )
}

fn api_key_scheme(header: &str, description: String) -> RequestHeaderInput {
    let security_scheme = SecurityScheme {
        description: Some(description),
        data: SecuritySchemeData::ApiKey {
            name: header.to_owned(),
            location: "header".to_owned(),
        },
        extensions: Object::default(),
    };
    let mut security_req = SecurityRequirement::new();
    security_req.insert(header.to_owned(), Vec::new());
    RequestHeaderInput::Security(header.to_owned(), security_scheme, security_req)
}
