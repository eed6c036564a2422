//! Bearer-token authentication middleware.
//!
//! Every protected request is resolved against the identity provider; the
//! resulting [`AuthUser`] is inserted as a request extension for handlers.
//! `OPTIONS` requests pass through untouched. A provider that cannot be
//! reached yields 500 rather than 401.

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::routes::AppState;
use crate::identity::bearer_token;
use crate::investigation::InvestigationError;

pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if req.method() == Method::OPTIONS {
        return next.run(req).await;
    }

    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string);

    let Some(token) = token else {
        return InvestigationError::Unauthorized.into_response();
    };

    match state.identity.current_user(&token).await {
        Ok(Some(user)) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Ok(None) => InvestigationError::Unauthorized.into_response(),
        Err(e) => InvestigationError::Internal(format!("Identity provider lookup failed: {:#}", e))
            .into_response(),
    }
}
