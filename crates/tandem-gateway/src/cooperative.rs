//! Adapter for hosts that multiplex requests over tasks.
//!
//! The host exchanges messages with the adapter: request body chunks come
//! in through [`Receive`], the response goes out through [`Transmit`] as
//! one [`Outgoing::Start`] followed by [`Outgoing::Body`] messages, the
//! last of which has `more: false`.
//!
//! The handler is an async closure over an [`AsyncRequest`]. Nothing is
//! spawned here; every await happens on the task that calls
//! [`CooperativeGateway::handle`].
//!
//! The receiver outlives the request: while the response is sent the
//! adapter keeps listening for [`Incoming::Disconnect`] and stops pulling
//! the response body as soon as it arrives.

use std::future::Future;
use std::sync::Arc;

use futures::future::{Either, select};
use futures::lock::Mutex;
use futures::stream::{self, Stream, StreamExt};
use tandem_core::{
    AsyncBody, AsyncBodyStream, AsyncRequest, BoxError, DisconnectSignal, HeaderMap, Rendered,
    Request, RequestHead, Response, StreamReadError,
};
use thiserror::Error;
use tracing::{debug, error};

use crate::respond::{error_response, handler_error};
use crate::{Completion, GatewayConfig, GatewayError, Scope};

/// A message from the host about the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// More body bytes; `more: false` marks the last chunk.
    Body { chunk: Vec<u8>, more: bool },
    /// The client went away.
    Disconnect,
}

/// A message to the host about the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Start { status: u16, headers: HeaderMap },
    Body { chunk: Vec<u8>, more: bool },
}

/// The host could not deliver a message because the client is gone.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("client disconnected")]
pub struct Disconnected;

/// Source of request messages.
///
/// Once the last body chunk was delivered, `receive` resolves only when
/// the client disconnects.
pub trait Receive: Send + 'static {
    fn receive(&mut self) -> impl Future<Output = Incoming> + Send;
}

/// Sink for response messages.
pub trait Transmit {
    fn send(&mut self, message: Outgoing) -> impl Future<Output = Result<(), Disconnected>>;
}

type SharedReceiver<R> = Arc<Mutex<R>>;

struct Inbound<R> {
    receiver: SharedReceiver<R>,
    signal: DisconnectSignal,
    done: bool,
}

/// Request body chunks pulled from the host on demand.
fn inbound<R: Receive>(
    receiver: SharedReceiver<R>,
    signal: DisconnectSignal,
) -> impl Stream<Item = Result<Vec<u8>, StreamReadError>> + Send {
    let state = Inbound {
        receiver,
        signal,
        done: false,
    };
    stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        let incoming = state.receiver.lock().await.receive().await;
        match incoming {
            Incoming::Body { chunk, more } => {
                state.done = !more;
                Some((Ok(chunk), state))
            }
            Incoming::Disconnect => {
                state.done = true;
                state.signal.trip();
                debug!("client disconnected while the request body was read");
                Some((Err(StreamReadError::Disconnected), state))
            }
        }
    })
}

/// Resolves once the host reports a disconnect. Body messages the handler
/// left unread are discarded.
async fn host_disconnect<R: Receive>(receiver: SharedReceiver<R>, signal: DisconnectSignal) {
    if signal.is_tripped() {
        return;
    }
    if Arc::strong_count(&receiver) > 1 {
        // The request body moved into the response and reports the
        // disconnect itself.
        return std::future::pending().await;
    }
    let mut receiver = receiver.lock().await;
    while let Incoming::Body { .. } = receiver.receive().await {}
    signal.trip();
}

/// Serves requests on the calling task.
#[derive(Debug, Clone, Default)]
pub struct CooperativeGateway {
    config: GatewayConfig,
}

impl CooperativeGateway {
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run `handler` for one request, reading from `receiver` and writing
    /// to `transmitter`.
    ///
    /// Handler and render failures become error responses; only delivery
    /// failures are returned as errors.
    pub async fn handle<R, T, H>(
        &self,
        scope: Scope,
        receiver: R,
        mut transmitter: T,
        handler: H,
    ) -> Result<Completion, GatewayError>
    where
        R: Receive,
        T: Transmit,
        H: AsyncFnOnce(&mut AsyncRequest) -> Result<Response, BoxError>,
    {
        let signal = DisconnectSignal::new();
        let receiver = Arc::new(Mutex::new(receiver));
        let (head, rendered) = match self.build_request(&scope, Arc::clone(&receiver), &signal) {
            Ok(mut request) => {
                let response = match handler(&mut request).await {
                    Ok(response) => response,
                    Err(err) => handler_error(&err),
                };
                let head = request.head().clone();
                let rendered = render(response, &head).await;
                (head, rendered)
            }
            Err((head, err)) => {
                let rendered = render(error_response(&err), &head).await;
                (head, rendered)
            }
        };
        debug!(
            method = %head.method(),
            path = head.path(),
            status = rendered.status,
            "sending response"
        );
        let watch = host_disconnect(receiver, signal.clone());
        send(rendered, &mut transmitter, &signal, watch).await
    }

    fn build_request<R: Receive>(
        &self,
        scope: &Scope,
        receiver: SharedReceiver<R>,
        signal: &DisconnectSignal,
    ) -> Result<AsyncRequest, (RequestHead, tandem_core::Error)> {
        let head = scope
            .to_head()
            .map_err(|err| (scope.fallback_head(), err))?;
        let declared = head
            .headers()
            .content_length()
            .map_err(|err| (scope.fallback_head(), err))?;

        let mut body = AsyncBodyStream::new(inbound(receiver, signal.clone()));
        if let Some(len) = declared {
            body = body.with_declared_length(len);
        }
        Ok(Request::new(head, body)
            .with_config(self.config.request().clone())
            .with_disconnect(signal.clone()))
    }
}

async fn render(response: Response, head: &RequestHead) -> Rendered<AsyncBody> {
    match response.render_async(head).await {
        Ok(rendered) => rendered,
        Err(err) => match error_response(&err).render_async(head).await {
            Ok(rendered) => rendered,
            Err(_) => Rendered {
                status: 500,
                headers: HeaderMap::new(),
                body: Box::pin(stream::empty::<std::io::Result<Vec<u8>>>()),
            },
        },
    }
}

/// Drain `rendered` into the host. `watch` resolving means the client is
/// gone; the body is then dropped without another pull.
async fn send<T, W>(
    rendered: Rendered<AsyncBody>,
    transmitter: &mut T,
    signal: &DisconnectSignal,
    watch: W,
) -> Result<Completion, GatewayError>
where
    T: Transmit,
    W: Future<Output = ()>,
{
    let Rendered {
        status,
        headers,
        mut body,
    } = rendered;
    let client_gone = || {
        signal.trip();
        debug!(status, "client disconnected while sending response");
        GatewayError::ClientGone
    };
    if signal.is_tripped() {
        return Err(client_gone());
    }

    transmitter
        .send(Outgoing::Start { status, headers })
        .await
        .map_err(|_: Disconnected| client_gone())?;
    let mut watch = Box::pin(watch);
    let mut body_bytes = 0u64;
    loop {
        let next = match select(watch.as_mut(), body.next()).await {
            Either::Left(((), _)) => return Err(client_gone()),
            Either::Right((next, _)) => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(|source| {
            error!(status, error = %source, "response body failed after headers were sent");
            GatewayError::Aborted { status, source }
        })?;
        if chunk.is_empty() {
            continue;
        }
        body_bytes += chunk.len() as u64;
        transmitter
            .send(Outgoing::Body { chunk, more: true })
            .await
            .map_err(|_: Disconnected| client_gone())?;
    }
    transmitter
        .send(Outgoing::Body {
            chunk: Vec::new(),
            more: false,
        })
        .await
        .map_err(|_: Disconnected| client_gone())?;
    Ok(Completion { status, body_bytes })
}
