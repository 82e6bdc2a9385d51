//! Local in-memory transport
//!
//! Every submitted request gets its own [`tokio::io::duplex`] connection
//! served by hyper's HTTP/1.1 server, so the deployment writes exactly the
//! bytes it would write on a real socket. Once the response bytes are read,
//! the transport waits on the request's [`CompletionSignal`](crate::signal::CompletionSignal)
//! for a bounded time before handing the bytes back.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http_body_util::{BodyExt, Full};
use hyper::{
    body::Incoming,
    server::conn::http1,
    service::Service,
    Request,
    Response
};
use hyper_util::rt::{TokioIo, TokioTimer};
use std::{
    io::ErrorKind as IoErrorKind,
    sync::{Arc, Mutex, atomic::{AtomicU64, Ordering}},
    time::Duration
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use crate::{
    bridge::ExecutionContext,
    codec::{ensure_host, SyntheticRequest, TransportResponse},
    deployment::Deployment,
    dump::DumpSink,
    error::Error,
    signal::WaitOutcome
};

pub use context::{RequestContext, RequestScope};

pub mod context;

const DUPLEX_BUFFER_SIZE: usize = 64 * 1024;

/// Default bound on the completion wait
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(10);

/// Host used when a request carries none
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Lets another thread interrupt a blocked completion wait.
///
/// An interrupt is consumed by the wait it ends; later requests run normally.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    token: Arc<Mutex<CancellationToken>>
}

impl InterruptHandle {
    /// Interrupts the current (or next) completion wait
    pub fn interrupt(&self) {
        self.current().cancel();
    }

    /// Returns `true` if an interrupt is waiting to be consumed
    pub fn is_interrupted(&self) -> bool {
        self.current().is_cancelled()
    }

    pub(crate) fn current(&self) -> CancellationToken {
        self.token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn clear(&self) {
        let mut token = self.token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }
}

/// Submits request bytes into a [`Deployment`] without opening a socket
pub struct LocalTransport {
    deployment: Arc<Deployment>,
    completion_timeout: Duration,
    default_host: String,
    dump: Option<Arc<dyn DumpSink>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    interrupts: InterruptHandle,
    next_id: AtomicU64,
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("completion_timeout", &self.completion_timeout)
            .field("default_host", &self.default_host)
            .field("in_flight", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

impl LocalTransport {
    /// Creates a transport in front of `deployment`
    pub fn new(deployment: Arc<Deployment>) -> Self {
        Self {
            deployment,
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
            default_host: DEFAULT_HOST.into(),
            dump: None,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            interrupts: InterruptHandle::default(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Sets the bound on the completion wait
    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }

    /// Sets the host inserted into requests that carry none
    pub fn with_default_host(mut self, host: impl Into<String>) -> Self {
        self.default_host = host.into();
        self
    }

    /// Hands every parsed response to `sink`
    pub fn with_dump(mut self, sink: Arc<dyn DumpSink>) -> Self {
        self.dump = Some(sink);
        self
    }

    /// Returns the deployment requests are submitted to
    #[inline]
    pub fn deployment(&self) -> &Arc<Deployment> {
        &self.deployment
    }

    /// Returns the handle that interrupts completion waits of this transport
    #[inline]
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupts.clone()
    }

    /// Submits wire-format request bytes and returns the exact response bytes
    pub async fn submit(&self, request: &[u8]) -> Result<Bytes, Error> {
        self.exchange(request, ExecutionContext::new())
            .await
            .map(|(response, _)| response)
    }

    /// Submits wire-format request bytes along with `execution`.
    ///
    /// Returns the response bytes and the execution context as the bridge
    /// left it once the completion signal fired or the wait bound elapsed.
    pub async fn exchange(
        &self,
        request: &[u8],
        execution: ExecutionContext
    ) -> Result<(Bytes, ExecutionContext), Error> {
        if self.tracker.is_closed() {
            return Err(Error::transport("transport has been shut down"));
        }

        let request = ensure_host(request, &self.default_host)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let context = RequestContext::new(id, execution);

        let (client, server) = tokio::io::duplex(DUPLEX_BUFFER_SIZE);
        let connection = Connection {
            deployment: self.deployment.clone(),
            scope: context.scope().clone()
        };
        self.tracker.spawn(connection.serve(server, self.shutdown.clone()));

        let response = round_trip(client, &request).await?;
        if response.is_empty() {
            return Err(Error::protocol("deployment closed the connection without a response"));
        }

        let interrupt = self.interrupts.current();
        match context.signal().wait(self.completion_timeout, &interrupt).await {
            Ok(WaitOutcome::Signaled) => tracing::debug!(request = id, "completion signaled"),
            Ok(WaitOutcome::Abandoned) => tracing::debug!(request = id, "completion notifier released without signal"),
            Ok(WaitOutcome::TimedOut) => tracing::warn!(
                request = id,
                timeout = ?self.completion_timeout,
                "completion signal did not fire in time; proceeding"
            ),
            Err(err) => {
                self.interrupts.clear();
                return Err(err);
            }
        }

        if let Some(dump) = &self.dump {
            let submitted = SyntheticRequest::parse(&request)?;
            let parsed = TransportResponse::new(response.clone()).parse()?;
            dump.dump(submitted.method(), submitted.path(), &parsed)?;
        }

        Ok((response, context.into_execution()))
    }

    /// Stops accepting requests and drops in-flight connections without
    /// waiting for them
    pub fn close(&self) {
        self.tracker.close();
        self.shutdown.cancel();
    }

    /// Stops accepting requests and waits up to `timeout` for in-flight
    /// connections to finish.
    ///
    /// Connections still running after `timeout` are dropped.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), Error> {
        self.tracker.close();

        let interrupt = self.interrupts.current();
        let joined = tokio::select! {
            biased;
            _ = interrupt.cancelled() => {
                self.interrupts.clear();
                Err(Error::interrupted("shutdown join"))
            }
            joined = tokio::time::timeout(timeout, self.tracker.wait()) => {
                if joined.is_err() {
                    tracing::warn!(
                        in_flight = self.tracker.len(),
                        "transport shutdown timed out; abandoning connections"
                    );
                }
                Ok(())
            }
        };

        self.shutdown.cancel();
        joined
    }
}

/// Writes `request` into the connection, closes the write half and reads
/// the response until the server closes
async fn round_trip(client: DuplexStream, request: &[u8]) -> Result<Bytes, Error> {
    let (mut reader, mut writer) = tokio::io::split(client);
    let mut response = Vec::new();

    let write = async {
        writer.write_all(request).await?;
        writer.shutdown().await
    };
    let read = reader.read_to_end(&mut response);
    let (written, read) = tokio::join!(write, read);

    read?;
    match written {
        // the server may answer and close before consuming the whole body
        Err(err) if err.kind() == IoErrorKind::BrokenPipe && !response.is_empty() => (),
        Err(err) => return Err(err.into()),
        Ok(()) => ()
    }
    Ok(Bytes::from(response))
}

/// Serves one in-memory connection
#[derive(Clone)]
struct Connection {
    deployment: Arc<Deployment>,
    scope: RequestScope
}

impl Service<Request<Incoming>> for Connection {
    type Response = Response<Full<Bytes>>;
    type Error = Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    #[inline]
    fn call(&self, request: Request<Incoming>) -> Self::Future {
        Box::pin(Self::handle_request(
            request,
            self.deployment.clone(),
            self.scope.clone()
        ))
    }
}

impl Connection {
    async fn serve(self, io: DuplexStream, shutdown: CancellationToken) {
        let connection = http1::Builder::new()
            .keep_alive(false)
            .half_close(true)
            .timer(TokioTimer::new())
            .serve_connection(TokioIo::new(io), self);

        tokio::select! {
            served = connection => {
                if let Err(err) = served {
                    tracing::error!("error serving connection: {err:#}");
                }
            }
            _ = shutdown.cancelled() => {
                tracing::debug!("connection dropped on shutdown");
            }
        }
    }

    async fn handle_request(
        request: Request<Incoming>,
        deployment: Arc<Deployment>,
        scope: RequestScope
    ) -> Result<Response<Full<Bytes>>, Error> {
        let (parts, body) = request.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                // the chain never runs, so nobody would fire the signal
                drop(scope.take_notifier());
                return Err(err.into());
            }
        };

        let response = deployment
            .dispatch(Request::from_parts(parts, body), scope)
            .await;
        Ok(response.map(Full::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        deployment::DeploymentBuilder,
        http::Results,
        middleware::{make_fn, HttpContext}
    };
    use serde_json::json;

    fn transport() -> LocalTransport {
        let deployment = DeploymentBuilder::new()
            .with_front_controller(make_fn(|ctx: HttpContext, next| async move {
                match ctx.path() {
                    "/hello" => Results::text("Hello World!"),
                    "/echo" => Results::text(String::from_utf8_lossy(ctx.body()).into_owned()),
                    "/host" => {
                        let host = ctx.headers()
                            .get("host")
                            .and_then(|h| h.to_str().ok())
                            .unwrap_or_default()
                            .to_owned();
                        Results::text(host)
                    }
                    "/visit" => {
                        let session = ctx.session(true)?.unwrap();
                        let visits = session.attribute("visits")?.and_then(|v| v.as_i64()).unwrap_or(0);
                        session.set_attribute("visits", json!(visits + 1))?;
                        ctx.set_var("visits", json!(visits + 1));
                        Results::text(format!("{}", visits + 1))
                    }
                    _ => next(ctx).await
                }
            }))
            .build()
            .unwrap();
        LocalTransport::new(Arc::new(deployment))
            .with_completion_timeout(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn it_returns_raw_response_bytes() {
        let transport = transport();

        let response = transport
            .submit(b"GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let text = String::from_utf8(response.to_vec()).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("\r\n\r\nHello World!"));
    }

    #[tokio::test]
    async fn it_inserts_default_host() {
        let transport = transport().with_default_host("10.0.0.1");

        let response = transport
            .submit(b"GET /host HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        assert!(response.ends_with(b"10.0.0.1"));
    }

    #[tokio::test]
    async fn it_sends_request_body() {
        let transport = transport();

        let response = transport
            .submit(b"POST /echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap();

        assert!(response.ends_with(b"\r\n\r\nhello"));
    }

    #[tokio::test]
    async fn it_returns_execution_context_after_completion() {
        let transport = transport();

        let (_, execution) = transport
            .exchange(b"GET /visit HTTP/1.1\r\n\r\n", ExecutionContext::new())
            .await
            .unwrap();

        assert_eq!(execution.request_scoped_var("visits"), Some(&json!(1)));
        assert_eq!(execution.session_scoped_var("visits"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn it_falls_through_to_not_found_without_waiting_for_timeout() {
        let transport = transport().with_completion_timeout(Duration::from_secs(30));

        let response = tokio::time::timeout(
            Duration::from_secs(5),
            transport.submit(b"GET /missing HTTP/1.1\r\n\r\n")
        ).await.unwrap().unwrap();

        assert!(response.starts_with(b"HTTP/1.1 404 Not Found\r\n"));
    }

    #[tokio::test]
    async fn it_rejects_malformed_request() {
        let transport = transport();

        let err = transport.submit(b"\x00\x01garbage\r\n\r\n").await.unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn it_fails_fast_when_body_is_truncated() {
        let transport = transport().with_completion_timeout(Duration::from_secs(30));

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            transport.submit(b"POST /echo HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc")
        ).await.unwrap().unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn it_propagates_interrupt_once() {
        let transport = transport();
        let handle = transport.interrupt_handle();
        handle.interrupt();
        assert!(handle.is_interrupted());

        let err = transport.submit(b"GET /hello HTTP/1.1\r\n\r\n").await.unwrap_err();
        assert!(err.is_interrupted());
        assert!(!handle.is_interrupted());

        let response = transport.submit(b"GET /hello HTTP/1.1\r\n\r\n").await.unwrap();
        assert!(response.starts_with(b"HTTP/1.1 200 OK\r\n"));
    }

    #[tokio::test]
    async fn it_refuses_requests_after_shutdown() {
        let transport = transport();
        transport.submit(b"GET /hello HTTP/1.1\r\n\r\n").await.unwrap();

        transport.shutdown(Duration::from_secs(1)).await.unwrap();

        let err = transport.submit(b"GET /hello HTTP/1.1\r\n\r\n").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Transport);
    }
}
