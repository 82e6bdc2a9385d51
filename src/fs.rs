//! Overlay resource roots
//!
//! A deployment may serve static content from several directories. They are
//! consulted in the order they were configured and the first root that
//! contains the requested file wins.

use mime::Mime;
use percent_encoding::percent_decode_str;
use std::{
    fmt,
    path::{Component, Path, PathBuf},
    sync::Arc
};
use crate::{
    error::{Error, ErrorKind},
    http::{HttpResult, Method, Results},
    middleware::{make_fn, FilterFn, HttpContext, Next}
};

const ALLOWED_METHODS: &str = "GET, HEAD";

#[inline]
pub fn get_mime_or_octet_stream<P: AsRef<Path>>(path: P) -> Mime {
    mime_guess::from_path(&path)
        .first_or_octet_stream()
}

/// Ordered, canonicalized resource roots
#[derive(Debug, Clone, Default)]
pub struct ResourceRoots {
    roots: Vec<PathBuf>
}

impl ResourceRoots {
    /// Canonicalizes every root, keeping their order.
    ///
    /// Fails with [`ErrorKind::InvalidResourceRoot`] if a root does not exist
    /// or is not a directory.
    pub fn new<I, P>(roots: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>
    {
        let configured: Vec<PathBuf> = roots
            .into_iter()
            .map(|root| root.as_ref().to_path_buf())
            .collect();

        let mut roots = Vec::with_capacity(configured.len());
        for root in &configured {
            let canonical = std::fs::canonicalize(root)
                .ok()
                .filter(|path| path.is_dir())
                .ok_or_else(|| invalid_root(root, &configured))?;
            roots.push(canonical);
        }
        Ok(Self { roots })
    }

    /// Returns the canonical roots in priority order
    #[inline]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Returns `true` if no root is configured
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Returns the file that serves `path`, taken from the first root
    /// containing it.
    ///
    /// Paths that try to leave a root and directories resolve to `None`.
    pub async fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = relative_path(path)?;
        for root in &self.roots {
            let candidate = root.join(&relative);
            match tokio::fs::metadata(&candidate).await {
                Ok(metadata) if metadata.is_file() => return Some(candidate),
                _ => continue,
            }
        }
        None
    }
}

impl fmt::Display for ResourceRoots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let roots: Vec<_> = self.roots
            .iter()
            .map(|root| root.display().to_string())
            .collect();
        write!(f, "[{}]", roots.join(", "))
    }
}

fn invalid_root(root: &Path, configured: &[PathBuf]) -> Error {
    let configured: Vec<_> = configured
        .iter()
        .map(|root| root.display().to_string())
        .collect();
    Error::new(
        ErrorKind::InvalidResourceRoot,
        format!(
            "{} is not an existing directory; configured roots: [{}]",
            root.display(),
            configured.join(", ")
        )
    )
}

/// Maps a request path onto a path relative to a root
fn relative_path(path: &str) -> Option<PathBuf> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let mut relative = PathBuf::new();
    for segment in path.split('/') {
        let segment = percent_decode_str(segment).decode_utf8().ok()?;
        if segment.contains(['\\', '/']) {
            return None;
        }
        match Path::new(&*segment).components().next() {
            None | Some(Component::CurDir) => continue,
            Some(Component::Normal(part)) => relative.push(part),
            _ => return None,
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}

/// Creates the filter that serves files from `roots`.
///
/// A request that matches no file falls through to the next link.
pub(crate) fn resource_handler(roots: Arc<ResourceRoots>) -> FilterFn {
    make_fn(move |ctx: HttpContext, next: Next| {
        let roots = roots.clone();
        async move {
            match roots.resolve(ctx.path()).await {
                None => next(ctx).await,
                Some(file) => respond_with_file(ctx.method(), file).await
            }
        }
    })
}

#[inline]
async fn respond_with_file(method: &Method, path: PathBuf) -> HttpResult {
    if method != Method::GET && method != Method::HEAD {
        return Results::method_not_allowed(ALLOWED_METHODS);
    }

    let content = tokio::fs::read(&path)
        .await
        .map_err(Error::handler)?;
    let mime = get_mime_or_octet_stream(&path);

    tracing::trace!(file = %path.display(), "serving resource");
    Results::file(content.into(), mime.as_ref())
}
