use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::engine::Engine;

/// Bearer-token check against the live `admin.api_key`.
pub async fn admin_auth_middleware(
    State(engine): State<Engine>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let config = engine.config();

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match token {
        Some(token) if token == config.admin.api_key => Ok(next.run(request).await),
        _ => {
            tracing::debug!(path = %request.uri().path(), "Rejected admin request");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
