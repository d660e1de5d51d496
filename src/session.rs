use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use tracing::debug;
use uuid::Uuid;

/// Cookie carrying the opaque canvas/session identifier, minted once per
/// browser session.
pub const CANVAS_COOKIE: &str = "_canvas_session_id";

/// Cookie carrying the commerce backend's cart id. Owned by the storefront;
/// this service only reads it.
pub const CART_COOKIE: &str = "_cart_id";

/// Identity resolved for one request. Tool side effects and the change feed
/// address the same canvas document through `canvas_id`.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub canvas_id: String,
    pub cart_id: Option<String>,
}

/// Request-interception step running ahead of all routes: mints the canvas
/// session cookie when absent, passes through unchanged otherwise, and
/// stashes the resolved [`SessionContext`] in request extensions so every
/// handler sees a consistent binding.
pub async fn bind_session(jar: CookieJar, mut request: Request, next: Next) -> Response {
    let existing = jar.get(CANVAS_COOKIE).map(|c| c.value().to_string());
    let cart_id = jar.get(CART_COOKIE).map(|c| c.value().to_string());

    let (jar, canvas_id) = match existing {
        Some(id) => (jar, id),
        None => {
            let id = Uuid::new_v4().to_string();
            debug!(canvas_id = id, "minting canvas session");
            let mut cookie = Cookie::new(CANVAS_COOKIE, id.clone());
            cookie.set_path("/");
            cookie.set_http_only(true);
            (jar.add(cookie), id)
        }
    };

    request.extensions_mut().insert(SessionContext { canvas_id, cart_id });

    let response = next.run(request).await;
    // The jar only emits Set-Cookie for cookies it changed.
    (jar, response).into_response()
}

/// Invalidates the canvas session cookie. Used by the canvas reset path so
/// the next visit mints a fresh identifier.
pub fn clear_session_cookie(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(CANVAS_COOKIE).path("/").build())
}
