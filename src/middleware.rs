//! Filter chain tools
//!
//! A deployment runs every request through an ordered list of filters.
//! Each filter receives the [`HttpContext`] and a [`Next`] link; calling
//! `next(ctx)` hands the request downstream and resolves once everything
//! after the filter has returned.

use futures_util::future::BoxFuture;
use std::{future::Future, sync::Arc};
use crate::http::{HttpResult, Results};

pub use http_context::HttpContext;

pub mod http_context;

const DEFAULT_CHAIN_CAPACITY: usize = 4;

/// Points to the next filter in the chain
pub type Next = Arc<
    dyn Fn(HttpContext) -> BoxFuture<'static, HttpResult>
    + Send
    + Sync
>;

/// Points to a filter function
pub type FilterFn = Arc<
    dyn Fn(HttpContext, Next) -> BoxFuture<'static, HttpResult>
    + Send
    + Sync
>;

/// Wraps a closure into [`FilterFn`]
///
/// # Example
/// ```no_run
/// use loopwire::middleware::make_fn;
///
/// let filter = make_fn(|ctx, next| async move {
///     next(ctx).await
/// });
/// ```
#[inline]
pub fn make_fn<F, Fut>(filter: F) -> FilterFn
where
    F: Fn(HttpContext, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HttpResult> + Send + 'static
{
    let filter = Arc::new(filter);
    Arc::new(move |ctx: HttpContext, next: Next| {
        let filter = filter.clone();
        Box::pin(async move { filter(ctx, next).await })
    })
}

/// Ordered filter chain
#[derive(Clone)]
pub(crate) struct Filters {
    chain: Vec<FilterFn>
}

impl Filters {
    /// Initializes an empty chain
    pub(crate) fn new() -> Self {
        Self { chain: Vec::with_capacity(DEFAULT_CHAIN_CAPACITY) }
    }

    /// Returns the number of filters in the chain
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.chain.len()
    }

    /// Appends a filter to the end of the chain
    #[inline]
    pub(crate) fn add(&mut self, filter: FilterFn) {
        self.chain.push(filter);
    }

    /// Composes filters into a "Linked List" and returns head
    pub(crate) fn compose(&self) -> Next {
        // Whatever falls off the end of the chain is not found.
        let mut next: Next = Arc::new(|_| Box::pin(async { Results::not_found() }));

        for filter in self.chain.iter().rev() {
            let current: FilterFn = filter.clone();
            let prev_next: Next = next.clone();

            next = Arc::new(move |ctx| {
                let current = current.clone();
                let prev_next = prev_next.clone();
                Box::pin(async move {
                    current(ctx, prev_next).await
                })
            });
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{header, StatusCode};
    use crate::middleware::http_context::tests::context;
    use std::sync::Mutex;

    fn recording(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> FilterFn {
        make_fn(move |ctx, next| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("{name}:before"));
                let result = next(ctx).await;
                log.lock().unwrap().push(format!("{name}:after"));
                result
            }
        })
    }

    #[tokio::test]
    async fn it_falls_through_to_not_found() {
        let next = Filters::new().compose();

        let response = next(context("/")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn it_runs_filters_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut filters = Filters::new();
        filters.add(recording("outer", log.clone()));
        filters.add(recording("inner", log.clone()));

        assert_eq!(filters.len(), 2);

        let _ = filters.compose()(context("/")).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec![
            "outer:before", "inner:before", "inner:after", "outer:after"
        ]);
    }

    #[tokio::test]
    async fn it_short_circuits_chain() {
        let mut filters = Filters::new();
        filters.add(make_fn(|_, _| async { Results::text("stop") }));
        filters.add(make_fn(|_, _| async { Results::text("unreachable") }));

        let response = filters.compose()(context("/")).await.unwrap();

        assert_eq!(response.body().as_ref(), b"stop");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain; charset=utf-8");
    }
}
