//! The JSON error envelope. User-visible descriptions stay generic; the
//! specific cause is logged where the error is mapped.

use rocket::{http::Status, serde::json::Json};
use schemars::JsonSchema;
use serde::Serialize;

#[derive(Debug, Serialize, JsonSchema)]
pub struct Error<E: Serialize> {
    pub error: Body<E>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct Body<E: Serialize> {
    pub code: u16,
    pub description: String,
    pub reason: Option<&'static str>,
    pub status: E,
}

impl<E: Serialize> Error<E> {
    fn new(http_status: Status, description: String, error: E) -> Self {
        Self {
            error: Body {
                code: http_status.code,
                description,
                reason: http_status.reason(),
                status: error,
            },
        }
    }
}

pub type JsonError<E> = (Status, Json<Error<E>>);

pub type JsonResult<T, E> = Result<Json<T>, JsonError<E>>;

pub fn bad_request<E: Serialize>(error: E, description: String) -> JsonError<E> {
    (
        Status::BadRequest,
        Json(Error::new(Status::BadRequest, description, error)),
    )
}

pub fn bad_gateway<E: Serialize>(error: E, description: String) -> JsonError<E> {
    (
        Status::BadGateway,
        Json(Error::new(Status::BadGateway, description, error)),
    )
}

pub fn internal_server_error<E: Serialize>(error: E, description: String) -> JsonError<E> {
    (
        Status::InternalServerError,
        Json(Error::new(Status::InternalServerError, description, error)),
    )
}

/// A concurrency conflict that outlived its retries. Transient; the client
/// may simply try again.
pub fn transient<E: Serialize>(error: E) -> JsonError<E> {
    internal_server_error(
        error,
        "the operation conflicted with concurrent activity, please try again".to_owned(),
    )
}
