//! Adapter for hosts that give each request a thread.
//!
//! The host hands over an [`Environ`] (metadata plus a raw [`Read`] input)
//! and a [`ResponseSink`]. The adapter builds a [`BlockingRequest`] without
//! touching the input, runs the handler, renders the response and writes
//! it chunk by chunk. A sink write failure means the client is gone: the
//! body is dropped unread (closing files, stopping generators) and
//! [`GatewayError::ClientGone`] is returned.

use std::fmt;
use std::io::{self, Read};

use tandem_core::{
    BlockingBody, BlockingRequest, BodyStream, BoxError, DisconnectSignal, HeaderMap, Rendered,
    Request, RequestHead, Response,
};
use tracing::{debug, error};

use crate::respond::{error_response, handler_error};
use crate::{Completion, GatewayConfig, GatewayError, Scope};

/// How the request body is delimited on the raw input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputFraming {
    /// Decide from `Transfer-Encoding` and `Content-Length`; neither means
    /// an empty body.
    #[default]
    Detect,
    /// Exactly this many bytes.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Everything until the input reports EOF.
    UntilEof,
}

/// One request as a blocking host sees it.
pub struct Environ {
    pub scope: Scope,
    pub input: Box<dyn Read + Send>,
    pub framing: InputFraming,
}

impl fmt::Debug for Environ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environ")
            .field("scope", &self.scope)
            .field("framing", &self.framing)
            .finish_non_exhaustive()
    }
}

impl Environ {
    /// Framing is detected from the headers unless set explicitly.
    pub fn new<R>(scope: Scope, input: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self {
            scope,
            input: Box::new(input),
            framing: InputFraming::Detect,
        }
    }

    #[must_use]
    pub fn with_framing(mut self, framing: InputFraming) -> Self {
        self.framing = framing;
        self
    }

    fn resolve_framing(&self) -> tandem_core::Result<InputFraming> {
        if self.framing != InputFraming::Detect {
            return Ok(self.framing);
        }
        let chunked = self
            .scope
            .header("transfer-encoding")
            .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));
        if chunked {
            return Ok(InputFraming::Chunked);
        }
        match self.scope.header("content-length") {
            Some(raw) => raw
                .trim()
                .parse()
                .map(InputFraming::Length)
                .map_err(|_| tandem_core::Error::MalformedHeader(format!("content-length {raw:?}"))),
            None => Ok(InputFraming::Length(0)),
        }
    }
}

/// Where a blocking host writes the response.
///
/// Any error is taken to mean the client disconnected.
pub trait ResponseSink {
    /// Send the status line and headers.
    fn start(&mut self, status: u16, headers: &HeaderMap) -> io::Result<()>;

    /// Send one non-empty body chunk.
    fn write(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// The body is complete.
    fn finish(&mut self) -> io::Result<()>;
}

impl<S: ResponseSink + ?Sized> ResponseSink for &mut S {
    fn start(&mut self, status: u16, headers: &HeaderMap) -> io::Result<()> {
        (**self).start(status, headers)
    }

    fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        (**self).write(chunk)
    }

    fn finish(&mut self) -> io::Result<()> {
        (**self).finish()
    }
}

/// Serves requests on the calling thread.
#[derive(Debug, Clone, Default)]
pub struct BlockingGateway {
    config: GatewayConfig,
}

impl BlockingGateway {
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run `handler` for one request and deliver its response to `sink`.
    ///
    /// Handler and render failures become error responses; only delivery
    /// failures are returned as errors.
    pub fn handle<H, S>(
        &self,
        environ: Environ,
        mut sink: S,
        handler: H,
    ) -> Result<Completion, GatewayError>
    where
        H: FnOnce(&mut BlockingRequest) -> Result<Response, BoxError>,
        S: ResponseSink,
    {
        let signal = DisconnectSignal::new();
        let (head, rendered) = match self.build_request(environ, &signal) {
            Ok(mut request) => {
                let response = match handler(&mut request) {
                    Ok(response) => response,
                    Err(err) => handler_error(&err),
                };
                let head = request.head().clone();
                let rendered = render(response, &head);
                (head, rendered)
            }
            Err((head, err)) => {
                let rendered = render(error_response(&err), &head);
                (head, rendered)
            }
        };
        debug!(
            method = %head.method(),
            path = head.path(),
            status = rendered.status,
            "sending response"
        );
        send(rendered, &mut sink, &signal)
    }

    fn build_request(
        &self,
        environ: Environ,
        signal: &DisconnectSignal,
    ) -> Result<BlockingRequest, (RequestHead, tandem_core::Error)> {
        let built = environ
            .scope
            .to_head()
            .and_then(|head| environ.resolve_framing().map(|framing| (head, framing)));
        let (head, framing) = match built {
            Ok(parts) => parts,
            Err(err) => return Err((environ.scope.fallback_head(), err)),
        };

        let chunk_size = self.config.request().body().chunk_size();
        let body = match framing {
            InputFraming::Length(len) => BodyStream::from_reader(environ.input, Some(len), chunk_size),
            InputFraming::Chunked => BodyStream::chunked(environ.input, chunk_size),
            InputFraming::UntilEof | InputFraming::Detect => {
                BodyStream::from_reader(environ.input, None, chunk_size)
            }
        };
        Ok(Request::new(head, body)
            .with_config(self.config.request().clone())
            .with_disconnect(signal.clone()))
    }
}

/// Render, falling back to an error response rendered the same way.
fn render(response: Response, head: &RequestHead) -> Rendered<BlockingBody> {
    match response.render_blocking(head) {
        Ok(rendered) => rendered,
        Err(err) => match error_response(&err).render_blocking(head) {
            Ok(rendered) => rendered,
            Err(_) => Rendered {
                status: 500,
                headers: HeaderMap::new(),
                body: Box::new(std::iter::empty::<io::Result<Vec<u8>>>()),
            },
        },
    }
}

fn send<S: ResponseSink>(
    rendered: Rendered<BlockingBody>,
    sink: &mut S,
    signal: &DisconnectSignal,
) -> Result<Completion, GatewayError> {
    let Rendered {
        status,
        headers,
        body,
    } = rendered;
    let gone = |err: io::Error| {
        signal.trip();
        debug!(status, error = %err, "client disconnected while sending response");
        GatewayError::ClientGone
    };

    sink.start(status, &headers).map_err(gone)?;
    let mut body_bytes = 0u64;
    for chunk in body {
        let chunk = chunk.map_err(|source| {
            error!(status, error = %source, "response body failed after headers were sent");
            GatewayError::Aborted { status, source }
        })?;
        if chunk.is_empty() {
            continue;
        }
        sink.write(&chunk).map_err(gone)?;
        body_bytes += chunk.len() as u64;
    }
    sink.finish().map_err(gone)?;
    Ok(Completion { status, body_bytes })
}
