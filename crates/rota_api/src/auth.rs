use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::state::AppState;

/// HTTP Basic auth guarding every `/api/v1/*` route. `/health` is mounted
/// outside this layer so monitoring doesn't need credentials.
///
/// When `ADMIN_USER`/`ADMIN_PASSWORD` were never set, `admin_identity` is
/// `None` and every request passes through unchallenged — the same
/// "auth is opt-in via env" shape the teacher uses for its own admin
/// surface.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if authorized(request.headers().get(header::AUTHORIZATION), &state.admin_identity) {
        next.run(request).await
    } else {
        unauthorized()
    }
}

fn authorized(header: Option<&HeaderValue>, admin_identity: &Option<(String, String)>) -> bool {
    let Some((user, password)) = admin_identity else {
        return true;
    };
    match header.and_then(decode_basic) {
        Some((got_user, got_password)) => &got_user == user && &got_password == password,
        None => false,
    }
}

fn decode_basic(value: &HeaderValue) -> Option<(String, String)> {
    let value = value.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"rota\"")],
        "unauthorized",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(user: &str, password: &str) -> HeaderValue {
        HeaderValue::from_str(&format!("Basic {}", STANDARD.encode(format!("{user}:{password}"))))
            .unwrap()
    }

    #[test]
    fn passes_through_unchallenged_when_no_admin_identity_configured() {
        assert!(authorized(None, &None));
    }

    #[test]
    fn rejects_missing_credentials_when_admin_identity_set() {
        let identity = Some(("ops".to_string(), "hunter2".to_string()));
        assert!(!authorized(None, &identity));
    }

    #[test]
    fn accepts_correct_credentials() {
        let identity = Some(("ops".to_string(), "hunter2".to_string()));
        let header = header("ops", "hunter2");
        assert!(authorized(Some(&header), &identity));
    }

    #[test]
    fn rejects_wrong_password() {
        let identity = Some(("ops".to_string(), "hunter2".to_string()));
        let header = header("ops", "wrong");
        assert!(!authorized(Some(&header), &identity));
    }

    #[test]
    fn rejects_malformed_header() {
        let identity = Some(("ops".to_string(), "hunter2".to_string()));
        let header = HeaderValue::from_static("Bearer sometoken");
        assert!(!authorized(Some(&header), &identity));
    }
}
