use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

/// Bearer token the admin API requires on every request, when configured
/// (§6.1, §1 "administrative authentication beyond the bearer-token gate ...
/// is out of scope"). `None` disables the gate entirely — a deliberate
/// choice for local/dev deployments, recorded as a resolved decision in
/// DESIGN.md rather than left implicit.
#[derive(Clone, Default)]
pub struct AuthState(pub Option<String>);

pub async fn bearer_auth(
    State(auth): State<AuthState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = auth.0.as_deref() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(next.run(request).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
