//! Turning handler failures into responses.

use std::error::Error as StdError;

use serde_json::json;
use tandem_core::{BoxError, Error, MultipartError, Response, canonical_reason};
use tracing::warn;

/// Status for an error that escaped a handler. Errors from the request and
/// response model carry their own; anything else is a 500.
pub(crate) fn status_for(err: &(dyn StdError + 'static)) -> u16 {
    if let Some(err) = err.downcast_ref::<Error>() {
        err.status_code()
    } else if let Some(err) = err.downcast_ref::<MultipartError>() {
        err.status_code()
    } else {
        500
    }
}

/// The response sent in place of a failed handler or render.
///
/// Client errors echo the error message as `detail`; server errors only
/// carry the reason phrase.
pub(crate) fn error_response(err: &(dyn StdError + 'static)) -> Response {
    let status = status_for(err);
    warn!(status, error = %err, "request failed before the response started");
    if status == 304 {
        let mut response = Response::bytes(Vec::new()).with_status(status);
        response.headers_mut().remove("content-type");
        return response;
    }
    let detail = if (400..500).contains(&status) {
        err.to_string()
    } else {
        canonical_reason(status).unwrap_or("Error").to_owned()
    };
    match Response::json(&json!({ "detail": detail })) {
        Ok(response) => response.with_status(status),
        Err(_) => Response::text(detail).with_status(status),
    }
}

pub(crate) fn handler_error(err: &BoxError) -> Response {
    error_response(err.as_ref())
}
