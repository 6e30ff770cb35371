//! Gateway adapters for tandem.
//!
//! An adapter sits between a host (the thing that owns sockets) and an
//! application handler:
//!
//! 1. it builds a request facade from the host's native message shape
//!    without reading the body
//! 2. it invokes the handler
//! 3. it renders the returned response and drains it through the host's
//!    send mechanism
//!
//! [`BlockingGateway`] serves hosts that dedicate a thread to each request;
//! [`CooperativeGateway`] serves hosts that multiplex requests over tasks.
//! Both share the same failure policy:
//!
//! - a handler or render error before any header is sent becomes an error
//!   response, with the status taken from the core error kind (else 500)
//! - a body failure after the headers went out aborts the response with
//!   [`GatewayError::Aborted`]
//! - a host send failure trips the request's disconnect signal, stops
//!   pulling the body and returns [`GatewayError::ClientGone`]
//!
//! # Example
//!
//! ```
//! use std::io;
//! use tandem_core::{HeaderMap, Response};
//! use tandem_gateway::{BlockingGateway, Environ, ResponseSink, Scope};
//!
//! #[derive(Default)]
//! struct Captured {
//!     status: u16,
//!     body: Vec<u8>,
//! }
//!
//! impl ResponseSink for Captured {
//!     fn start(&mut self, status: u16, _headers: &HeaderMap) -> io::Result<()> {
//!         self.status = status;
//!         Ok(())
//!     }
//!     fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
//!         self.body.extend_from_slice(chunk);
//!         Ok(())
//!     }
//!     fn finish(&mut self) -> io::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! let environ = Environ::new(Scope::new("GET", "/hello"), io::empty());
//! let mut sink = Captured::default();
//! BlockingGateway::default()
//!     .handle(environ, &mut sink, |request| {
//!         Ok(Response::text(format!("hello from {}", request.path())))
//!     })
//!     .unwrap();
//! assert_eq!(sink.status, 200);
//! assert_eq!(sink.body, b"hello from /hello");
//! ```

#![forbid(unsafe_code)]

pub mod blocking;
pub mod cooperative;
mod error;
mod respond;
mod scope;

pub use blocking::{BlockingGateway, Environ, InputFraming, ResponseSink};
pub use cooperative::{
    CooperativeGateway, Disconnected, Incoming, Outgoing, Receive, Transmit,
};
pub use error::GatewayError;
pub use scope::Scope;

use tandem_core::RequestConfig;

/// Settings shared by both adapters.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    request: RequestConfig,
}

impl GatewayConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Body and multipart limits applied to every request.
    #[must_use]
    pub fn with_request(mut self, request: RequestConfig) -> Self {
        self.request = request;
        self
    }

    #[must_use]
    pub fn request(&self) -> &RequestConfig {
        &self.request
    }
}

/// A response delivered in full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub status: u16,
    /// Body bytes handed to the host.
    pub body_bytes: u64,
}
