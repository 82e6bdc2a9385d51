//! Synchronous test harness
//!
//! [`Harness`] owns everything one test run needs: a tokio runtime, the
//! [`Deployment`] and the [`LocalTransport`] in front of it. Its methods block
//! the calling thread for the whole request/response cycle, so they must not
//! be called from inside an async runtime.
//!
//! # Example
//! ```no_run
//! use loopwire::{Harness, SyntheticRequest, http::Results, middleware::make_fn};
//!
//! let harness = Harness::builder()
//!     .with_deployment(|deployment| deployment
//!         .with_front_controller(make_fn(|ctx, next| async move {
//!             match ctx.path() {
//!                 "/hello" => Results::text("Hello World!"),
//!                 _ => next(ctx).await
//!             }
//!         })))
//!     .build()
//!     .unwrap();
//!
//! let response = harness.handle(&SyntheticRequest::get("/hello")).unwrap();
//! assert_eq!(response.status_code(), 200);
//! harness.shutdown().unwrap();
//! ```

use bytes::Bytes;
use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration
};
use tokio::runtime::{Builder as RuntimeBuilder, Runtime};
use crate::{
    bridge::ExecutionContext,
    codec::{SyntheticRequest, TestResponse, TransportResponse},
    deployment::{Deployment, DeploymentBuilder},
    dump::{DumpSink, FileDump},
    error::Error,
    transport::{InterruptHandle, LocalTransport, DEFAULT_COMPLETION_TIMEOUT, DEFAULT_HOST}
};

const DEFAULT_WORKER_THREADS: usize = 2;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const WORKER_THREAD_NAME: &str = "loopwire-worker";

/// Represents the harness configuration
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    completion_timeout: Duration,
    default_host: String,
    dump_dir: Option<PathBuf>,
    worker_threads: usize,
    shutdown_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
            default_host: DEFAULT_HOST.into(),
            dump_dir: None,
            worker_threads: DEFAULT_WORKER_THREADS,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl HarnessConfig {
    /// Creates a default harness configuration:
    /// - completion_timeout: `10 s`
    /// - default_host: `127.0.0.1`
    /// - dump_dir: none, dumping disabled
    /// - worker_threads: `2`
    /// - shutdown_timeout: `5 s`
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long a request waits for its completion signal
    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }

    /// Sets the host inserted into requests that carry none
    pub fn with_default_host(mut self, host: impl Into<String>) -> Self {
        self.default_host = host.into();
        self
    }

    /// Enables the HTTP dump into `dir`
    pub fn with_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_dir = Some(dir.into());
        self
    }

    /// Sets the number of runtime worker threads
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    /// Sets how long shutdown waits for in-flight connections
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Returns the completion wait bound
    #[inline]
    pub fn completion_timeout(&self) -> Duration {
        self.completion_timeout
    }

    /// Returns the default host
    #[inline]
    pub fn default_host(&self) -> &str {
        &self.default_host
    }

    /// Returns the dump directory, if dumping is enabled
    #[inline]
    pub fn dump_dir(&self) -> Option<&Path> {
        self.dump_dir.as_deref()
    }

    /// Returns the number of runtime worker threads
    #[inline]
    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    /// Returns the shutdown join bound
    #[inline]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }
}

/// Configures and builds a [`Harness`]
#[derive(Default)]
pub struct HarnessBuilder {
    config: HarnessConfig,
    deployment: DeploymentBuilder,
    dump: Option<Arc<dyn DumpSink>>,
}

impl std::fmt::Debug for HarnessBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessBuilder")
            .field("config", &self.config)
            .field("deployment", &self.deployment)
            .finish_non_exhaustive()
    }
}

impl HarnessBuilder {
    /// Creates a builder with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the harness configuration
    pub fn with_config(mut self, config: HarnessConfig) -> Self {
        self.config = config;
        self
    }

    /// Configures the deployment
    pub fn with_deployment<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(DeploymentBuilder) -> DeploymentBuilder
    {
        self.deployment = configure(self.deployment);
        self
    }

    /// Sets a custom dump sink, it takes precedence over the dump directory
    pub fn with_dump_sink(mut self, sink: impl DumpSink) -> Self {
        self.dump = Some(Arc::new(sink));
        self
    }

    /// Starts the runtime and assembles the deployment
    pub fn build(self) -> Result<Harness, Error> {
        let Self { config, deployment, dump } = self;

        let deployment = Arc::new(deployment.build()?);
        let dump = match (dump, config.dump_dir()) {
            (Some(sink), _) => Some(sink),
            (None, Some(dir)) => Some(Arc::new(FileDump::new(dir)?) as Arc<dyn DumpSink>),
            (None, None) => None,
        };

        let runtime = RuntimeBuilder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name(WORKER_THREAD_NAME)
            .enable_all()
            .build()
            .map_err(Error::transport)?;

        let mut transport = LocalTransport::new(deployment)
            .with_completion_timeout(config.completion_timeout)
            .with_default_host(config.default_host.clone());
        if let Some(sink) = dump {
            transport = transport.with_dump(sink);
        }

        tracing::debug!(
            workers = config.worker_threads,
            completion_timeout = ?config.completion_timeout,
            "harness started"
        );

        Ok(Harness {
            runtime: Some(runtime),
            transport,
            config,
        })
    }
}

/// Harness-owned aggregate of runtime, transport and deployment
#[derive(Debug)]
pub struct Harness {
    runtime: Option<Runtime>,
    transport: LocalTransport,
    config: HarnessConfig,
}

impl Harness {
    /// Returns a builder
    #[inline]
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::new()
    }

    /// Returns the harness configuration
    #[inline]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Returns the deployment under test
    #[inline]
    pub fn deployment(&self) -> &Arc<Deployment> {
        self.transport.deployment()
    }

    /// Returns the handle that interrupts a blocked request or shutdown from
    /// another thread
    #[inline]
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.transport.interrupt_handle()
    }

    /// Submits wire-format request bytes and returns the exact response bytes
    pub fn submit(&self, request: &[u8]) -> Result<Bytes, Error> {
        self.block_on(self.transport.submit(request))
    }

    /// Sends `request` and parses the response
    pub fn handle(&self, request: &SyntheticRequest) -> Result<TestResponse, Error> {
        let response = self.submit(&request.to_bytes())?;
        TransportResponse::new(response).parse()
    }

    /// Sends `request` along with `context`.
    ///
    /// On success `context` holds the request- and session-scoped variables
    /// as they were when the request completed.
    pub fn handle_with(
        &self,
        request: &SyntheticRequest,
        context: &mut ExecutionContext
    ) -> Result<TestResponse, Error> {
        let (response, execution) = self.block_on(
            self.transport.exchange(&request.to_bytes(), context.clone()))?;
        *context = execution;
        TransportResponse::new(response).parse()
    }

    /// Waits for in-flight connections and stops the runtime
    pub fn shutdown(mut self) -> Result<(), Error> {
        let Some(runtime) = self.runtime.take() else {
            return Ok(());
        };

        let joined = runtime.block_on(self.transport.shutdown(self.config.shutdown_timeout));
        runtime.shutdown_timeout(self.config.shutdown_timeout);
        tracing::debug!("harness stopped");
        joined
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        match &self.runtime {
            Some(runtime) => runtime.block_on(future),
            // shutdown consumes the harness
            None => unreachable!("harness runtime is gone"),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            self.transport.close();
            runtime.shutdown_background();
        }
    }
}
