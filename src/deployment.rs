//! Deployment assembly
//!
//! A [`Deployment`] is the unit the transport submits requests to. Its filter
//! chain always has the same shape:
//!
//! 1. the lazy session invalidation filter, so it observes everything below;
//! 2. the front controller, wrapped by the execution-context bridge;
//! 3. the overlay resource handler, which answers `404` for unknown paths.
//!
//! Sessions are tracked with a cookie only.

use std::{path::PathBuf, sync::Arc};
use tracing::{Instrument, trace_span};
use crate::{
    bridge::{bridged, ExecutionContextBridge, StateBridge},
    error::Error,
    fs::{resource_handler, ResourceRoots},
    http::{
        cookie::session_cookie,
        header::{HOST, LOCATION},
        response::has_location,
        Cookies,
        HeaderValue,
        HttpRequest,
        HttpResponse,
        Results
    },
    middleware::{make_fn, FilterFn, Filters, HttpContext, Next},
    session::{lazy_invalidation, ContainerSessions, HttpSession, SessionConfig, SessionStore},
    transport::{RequestScope, DEFAULT_HOST}
};

const ROOT_CONTEXT_PATH: &str = "/";

/// Configures a [`Deployment`]
pub struct DeploymentBuilder {
    context_path: String,
    resource_roots: Vec<PathBuf>,
    front_controller: Option<FilterFn>,
    bridge: Arc<dyn StateBridge>,
    session_config: SessionConfig,
    relative_redirect_allowed: bool,
}

impl Default for DeploymentBuilder {
    fn default() -> Self {
        Self {
            context_path: ROOT_CONTEXT_PATH.into(),
            resource_roots: Vec::new(),
            front_controller: None,
            bridge: Arc::new(ExecutionContextBridge),
            session_config: SessionConfig::default(),
            relative_redirect_allowed: false,
        }
    }
}

impl std::fmt::Debug for DeploymentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentBuilder")
            .field("context_path", &self.context_path)
            .field("resource_roots", &self.resource_roots)
            .field("session_config", &self.session_config)
            .field("relative_redirect_allowed", &self.relative_redirect_allowed)
            .finish_non_exhaustive()
    }
}

impl DeploymentBuilder {
    /// Creates a builder with the default settings:
    /// - context path: `/`
    /// - no resource roots
    /// - no front controller
    /// - cookie session tracking with [`SessionConfig::default`]
    /// - relative redirects rewritten to absolute URLs
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the path the deployment is mounted at
    pub fn with_context_path(mut self, path: &str) -> Self {
        self.context_path = normalize_context_path(path);
        self
    }

    /// Appends a resource root.
    ///
    /// Roots are consulted in the order they were added.
    pub fn with_resource_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.resource_roots.push(root.into());
        self
    }

    /// Appends several resource roots in priority order
    pub fn with_resource_roots<I, P>(mut self, roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>
    {
        self.resource_roots.extend(roots.into_iter().map(Into::into));
        self
    }

    /// Sets the application's front controller
    pub fn with_front_controller(mut self, filter: FilterFn) -> Self {
        self.front_controller = Some(filter);
        self
    }

    /// Replaces the execution-context bridge around the front controller
    pub fn with_bridge(mut self, bridge: impl StateBridge) -> Self {
        self.bridge = Arc::new(bridge);
        self
    }

    /// Sets the session tracking configuration
    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Keeps relative `Location` headers as they are when `allowed`
    pub fn with_relative_redirect_allowed(mut self, allowed: bool) -> Self {
        self.relative_redirect_allowed = allowed;
        self
    }

    /// Resolves the resource roots and assembles the filter chain
    pub fn build(self) -> Result<Deployment, Error> {
        let roots = Arc::new(ResourceRoots::new(&self.resource_roots)?);
        let front_controller = self.front_controller.unwrap_or_else(pass_through);

        let mut filters = Filters::new();
        filters.add(lazy_invalidation());
        filters.add(bridged(front_controller, self.bridge));
        filters.add(resource_handler(roots.clone()));

        tracing::debug!(
            context_path = %self.context_path,
            roots = %roots,
            filters = filters.len(),
            "deployment assembled"
        );

        Ok(Deployment {
            context_path: self.context_path,
            roots,
            store: Arc::new(SessionStore::new(&self.session_config)),
            session_config: self.session_config,
            relative_redirect_allowed: self.relative_redirect_allowed,
            pipeline: filters.compose(),
        })
    }
}

/// A deployed application with its fixed filter chain and session store
pub struct Deployment {
    context_path: String,
    roots: Arc<ResourceRoots>,
    store: Arc<SessionStore>,
    session_config: SessionConfig,
    relative_redirect_allowed: bool,
    pipeline: Next,
}

impl std::fmt::Debug for Deployment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployment")
            .field("context_path", &self.context_path)
            .field("roots", &self.roots)
            .field("sessions", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl Deployment {
    /// Returns a builder
    #[inline]
    pub fn builder() -> DeploymentBuilder {
        DeploymentBuilder::new()
    }

    /// Returns the path the deployment is mounted at
    #[inline]
    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    /// Returns the resolved resource roots
    #[inline]
    pub fn resource_roots(&self) -> &ResourceRoots {
        &self.roots
    }

    /// Returns the session store of the deployment
    #[inline]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Runs `request` through the filter chain.
    ///
    /// Errors from the chain are turned into `500` responses.
    pub async fn dispatch(&self, request: HttpRequest, scope: RequestScope) -> HttpResponse {
        let method = request.method().clone();
        let path = request.uri().path().to_owned();
        let span = trace_span!("request", %method, %path, id = scope.id());

        self.dispatch_core(request, scope)
            .instrument(span)
            .await
    }

    async fn dispatch_core(&self, request: HttpRequest, scope: RequestScope) -> HttpResponse {
        let request_path = request.uri().path().to_owned();
        let Some(path_info) = self.path_info(&request_path) else {
            release_notifier(&scope);
            return Results::not_found().unwrap_or_else(Error::into_response);
        };

        let requested_id = Cookies::from(request.headers())
            .value(self.session_config.cookie_name())
            .map(str::to_owned);
        let host = request.headers()
            .get(HOST)
            .and_then(|host| host.to_str().ok())
            .filter(|host| !host.is_empty())
            .unwrap_or(DEFAULT_HOST)
            .to_owned();

        let sessions = Arc::new(ContainerSessions::new(self.store.clone(), requested_id));
        let ctx = HttpContext::new(request, sessions.clone(), scope.clone())
            .with_path_info(path_info);

        let mut response = match (self.pipeline)(ctx).await {
            Ok(response) => response,
            Err(err) => err.into_response(),
        };
        release_notifier(&scope);

        if let Some(session) = sessions.created() {
            let mut cookies = Cookies::new();
            cookies.add(session_cookie(
                self.session_config.cookie_name(),
                &session.id(),
                self.session_config.cookie_path().unwrap_or(&self.context_path)
            ));
            cookies.set_cookies(response.headers_mut());
            tracing::debug!(session = %session.id(), "session cookie issued");
        }

        let live = sessions
            .current_id()
            .filter(|id| self.store.get(id).is_some());
        scope.record_session(live);

        if !self.relative_redirect_allowed && has_location(&response) {
            absolutize_location(&mut response, &host, &request_path);
        }
        response
    }

    /// Returns the request path relative to the context path, or `None` if
    /// the request is outside the deployment
    fn path_info(&self, path: &str) -> Option<String> {
        if self.context_path == ROOT_CONTEXT_PATH {
            return Some(path.to_owned());
        }
        let rest = path.strip_prefix(self.context_path.as_str())?;
        match rest {
            "" => Some(ROOT_CONTEXT_PATH.into()),
            rest if rest.starts_with('/') => Some(rest.to_owned()),
            _ => None,
        }
    }
}

/// The front controller used when none is configured
fn pass_through() -> FilterFn {
    make_fn(|ctx: HttpContext, next: Next| next(ctx))
}

/// Drops a completion notifier the bridge never took, so the transport does
/// not wait for a signal that cannot come
#[inline]
fn release_notifier(scope: &RequestScope) {
    if scope.take_notifier().is_some() {
        tracing::debug!("completion notifier released by the container");
    }
}

fn normalize_context_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        ROOT_CONTEXT_PATH.into()
    } else {
        format!("/{trimmed}")
    }
}

/// Returns `true` if `location` starts with a URL scheme
fn is_absolute(location: &str) -> bool {
    match location.split_once(':') {
        Some((scheme, _)) => {
            let mut chars = scheme.chars();
            chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Rewrites a relative `Location` to `http://{host}{path}`
fn absolutize_location(response: &mut HttpResponse, host: &str, request_path: &str) {
    let Some(location) = response.headers()
        .get(LOCATION)
        .and_then(|location| location.to_str().ok()) else {
        return;
    };
    if is_absolute(location) {
        return;
    }

    let absolute = if location.starts_with("//") {
        format!("http:{location}")
    } else if location.starts_with('/') {
        format!("http://{host}{location}")
    } else {
        let dir = request_path
            .rfind('/')
            .map_or("/", |pos| &request_path[..=pos]);
        format!("http://{host}{dir}{location}")
    };

    if let Ok(value) = HeaderValue::from_str(&absolute) {
        tracing::trace!(location = %absolute, "relative redirect rewritten");
        response.headers_mut().insert(LOCATION, value);
    }
}
