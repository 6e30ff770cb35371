//! tandem: write an HTTP handler once, serve it from a blocking or a
//! cooperative host.
//!
//! This crate re-exports the request/response model from `tandem-core` and
//! the adapters from `tandem-gateway`. Most applications only need the
//! [`prelude`].
//!
//! # Example
//!
//! ```
//! use tandem::prelude::*;
//!
//! fn create_item(request: &mut BlockingRequest) -> Result<Response, BoxError> {
//!     let item: serde_json::Value = request.body_json_as()?;
//!     let mut response = Response::json(&item)?.with_status(201);
//!     response.set_cookie(&Cookie::new("last_item", "1"));
//!     Ok(response)
//! }
//!
//! # use std::io;
//! # struct Null(u16);
//! # impl ResponseSink for Null {
//! #     fn start(&mut self, status: u16, _: &HeaderMap) -> io::Result<()> { self.0 = status; Ok(()) }
//! #     fn write(&mut self, _: &[u8]) -> io::Result<()> { Ok(()) }
//! #     fn finish(&mut self) -> io::Result<()> { Ok(()) }
//! # }
//! let body = br#"{"name":"widget"}"#;
//! let scope = Scope::new("POST", "/items")
//!     .with_header("content-type", "application/json")
//!     .with_header("content-length", body.len().to_string());
//! let mut sink = Null(0);
//! let completion = BlockingGateway::default()
//!     .handle(Environ::new(scope, io::Cursor::new(body.to_vec())), &mut sink, create_item)
//!     .unwrap();
//! assert_eq!(completion.status, 201);
//! ```

#![forbid(unsafe_code)]

pub use tandem_core::*;
pub use tandem_gateway::{
    BlockingGateway, Completion, CooperativeGateway, Disconnected, Environ, GatewayConfig,
    GatewayError, Incoming, InputFraming, Outgoing, Receive, ResponseSink, Scope, Transmit,
};

/// Everything a handler usually touches.
pub mod prelude {
    pub use crate::{
        AsyncRequest, BlockingGateway, BlockingRequest, BoxError, Cookie, CooperativeGateway,
        Environ, Error, EventStreamResponse, FileResponse, GatewayConfig, HeaderMap, Method,
        RequestConfig, Response, ResponseSink, Scope, ServerSentEvent,
    };
}
