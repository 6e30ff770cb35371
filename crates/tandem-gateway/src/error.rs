//! Gateway failures.
//!
//! Handler errors never show up here: before headers are sent they are
//! turned into an error response. What remains are the cases where the
//! response could not be delivered.

use thiserror::Error;

/// Why a response did not reach the client intact.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The host reported that the client went away.
    #[error("client disconnected before the response completed")]
    ClientGone,
    /// The response body failed after the status line went out.
    #[error("response with status {status} aborted after headers were sent")]
    Aborted {
        /// Status already sent.
        status: u16,
        /// What the body source reported.
        #[source]
        source: std::io::Error,
    },
}

impl GatewayError {
    /// Returns true when the client, not the application, ended the exchange.
    #[must_use]
    pub fn is_client_gone(&self) -> bool {
        matches!(self, Self::ClientGone)
    }
}
