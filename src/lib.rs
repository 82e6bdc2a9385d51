//! # Loopwire
//!
//! > In-memory HTTP test harness based on [Tokio](https://tokio.rs/) and [hyper](https://hyper.rs/)
//! > that drives a deployed application without opening a socket.
//!
//! ## Features
//! * Byte-exact HTTP/1.1 responses over an in-memory connection
//! * Synchronous request/response API for plain `#[test]` functions
//! * Deferred session invalidation, so post-handler code can still read the session
//! * Overlay resource roots with first-match-wins resolution
//! * Cookie-only session tracking
//! * Runs on stable Rust 1.80+
//!
//! ## Example
//! ```no_run
//! use loopwire::{Harness, SyntheticRequest, http::Results, middleware::make_fn, test::assert_status};
//!
//! let harness = Harness::builder()
//!     .with_deployment(|deployment| deployment
//!         .with_context_path("/app")
//!         .with_front_controller(make_fn(|ctx, next| async move {
//!             match ctx.path() {
//!                 "/logout" => {
//!                     if let Some(session) = ctx.session(false)? {
//!                         session.invalidate()?;
//!                     }
//!                     Results::redirect(303, "/app/login")
//!                 }
//!                 _ => next(ctx).await
//!             }
//!         })))
//!     .build()
//!     .unwrap();
//!
//! let response = harness.handle(&SyntheticRequest::get("/app/logout")).unwrap();
//! assert_status(303, &response);
//! ```

#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

pub mod bridge;
pub mod codec;
pub mod deployment;
pub mod dump;
pub mod error;
pub mod fs;
pub mod harness;
pub mod http;
pub mod middleware;
pub mod session;
pub mod signal;
pub mod transport;

pub use crate::bridge::{ExecutionContext, ExecutionContextBridge, StateBridge};
pub use crate::codec::{SyntheticRequest, TestResponse, TransportResponse};
pub use crate::deployment::{Deployment, DeploymentBuilder};
pub use crate::error::{Error, ErrorKind};
pub use crate::harness::{Harness, HarnessBuilder, HarnessConfig};
pub use crate::session::{HttpSession, SessionAccess, SessionConfig};
pub use crate::transport::{InterruptHandle, LocalTransport};
