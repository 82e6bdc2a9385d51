#![allow(dead_code)]

use std::sync::Once;
use loopwire::{
    http::Results,
    middleware::{make_fn, FilterFn},
    Harness,
    HarnessBuilder,
    TestResponse
};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static TRACING: Once = Once::new();

/// Installs a test subscriber once per test binary, filtered by `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

/// A small application:
/// - `GET /hello` answers `Hello World!`
/// - `GET /host` echoes the `Host` header
/// - `POST /login` starts a session for the `user` in the body
/// - `GET /profile` reads the session user
/// - `GET /logout` invalidates the session, then keeps reading it
/// - `GET /redirect/{code}` redirects with the literal code to `target`
pub fn front_controller() -> FilterFn {
    make_fn(|ctx, next| async move {
        let path = ctx.path().to_owned();
        match path.as_str() {
            "/hello" => Results::text("Hello World!"),
            "/host" => {
                let host = ctx.headers()
                    .get("host")
                    .and_then(|host| host.to_str().ok())
                    .unwrap_or_default()
                    .to_owned();
                Results::text(host)
            }
            "/login" => {
                let user = String::from_utf8_lossy(ctx.body()).into_owned();
                let session = ctx.session(true)?.unwrap();
                session.set_attribute("user", json!(user))?;
                Results::text(format!("welcome {user}"))
            }
            "/profile" => {
                let user = ctx.session(false)?
                    .map(|session| session.attribute("user"))
                    .transpose()?
                    .flatten()
                    .and_then(|user| user.as_str().map(str::to_owned))
                    .unwrap_or_else(|| "anonymous".into());
                Results::text(user)
            }
            "/logout" => {
                let Some(session) = ctx.session(false)? else {
                    return Results::text("no session");
                };
                session.invalidate()?;
                if ctx.var("twice").is_some() {
                    session.invalidate()?;
                }
                let user = session.attribute("user")?.unwrap_or_default();
                ctx.set_var("pending", json!(session.is_invalidation_pending()));
                Results::text(format!("bye {}", user.as_str().unwrap_or_default()))
            }
            _ => match path.strip_prefix("/redirect/") {
                Some(code) => Results::redirect(code.parse().unwrap_or(302), "target"),
                None => next(ctx).await
            }
        }
    })
}

/// Builds a harness around [`front_controller`]
pub fn builder() -> HarnessBuilder {
    init_tracing();
    Harness::builder()
        .with_deployment(|deployment| deployment.with_front_controller(front_controller()))
}

/// Returns the session id set by `response`
pub fn session_id(response: &TestResponse) -> String {
    response.cookie("JSESSIONID").expect("response does not set a session cookie")
}
