use crate::{
    access,
    error::{self, JsonResult},
    state::RocketState,
};
use app::{audit, notify};
use rocket::{post, serde::json::Json, State};
use rocket_okapi::openapi;
use schemars::JsonSchema;
use serde::Serialize;

#[derive(Debug, Serialize, JsonSchema)]
pub(super) struct DailySummaryResponse {
    success: bool,
    /// Mail relay identifier of the delivered report.
    message_id: String,
}

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(super) enum Error {
    /// The report was produced but could not be delivered.
    DeliveryFailed,
}

/// Run the balance audit now and mail the report. Guarded by the admin
/// shared secret; normally driven by the scheduler, this exists for manual
/// triggering and for the cron fallback.
#[openapi(tag = "Admin")]
#[post("/admin/daily-summary")]
pub(super) async fn daily_summary(
    state: &State<RocketState>,
    _guard: access::AdminGuard,
) -> JsonResult<DailySummaryResponse, Error> {
    let mut node = state.lightning.create_node().await;
    audit::run_and_send(
        &state.db,
        &mut node,
        &state.mailer,
        &state.audit.recipient,
    )
    .await
    .map(|message_id| {
        Json(DailySummaryResponse {
            success: true,
            message_id: message_id.0,
        })
    })
    .map_err(|e: notify::Error| {
        // The audit itself ran; only the notification failed.
        log::error!("daily summary could not be delivered: {}", e);
        error::bad_gateway(
            Error::DeliveryFailed,
            "the report was produced but could not be mailed".to_owned(),
        )
    })
}
