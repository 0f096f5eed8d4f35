use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use bulwark::{Bulwark, RateLimitCategory, RepositoryProvider};

use crate::{error::LoginRejection, types::ClientIp};

/// State for [`rate_limit_middleware`]: which limiter to charge.
pub struct RateLimitState<R: RepositoryProvider> {
    pub bulwark: Arc<Bulwark<R>>,
    pub category: RateLimitCategory,
}

impl<R: RepositoryProvider> Clone for RateLimitState<R> {
    fn clone(&self) -> Self {
        Self {
            bulwark: self.bulwark.clone(),
            category: self.category,
        }
    }
}

impl<R: RepositoryProvider> RateLimitState<R> {
    pub fn new(bulwark: Arc<Bulwark<R>>, category: RateLimitCategory) -> Self {
        Self { bulwark, category }
    }
}

/// Charge one slot of the configured category per request, keyed by client IP.
///
/// Requests over the limit get `429` with `Retry-After`. Requests whose IP
/// cannot be determined pass through uncounted.
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/contact", post(contact_handler))
///     .layer(axum::middleware::from_fn_with_state(
///         RateLimitState::new(bulwark, RateLimitCategory::ContactForm),
///         rate_limit_middleware,
///     ));
/// ```
pub async fn rate_limit_middleware<R>(
    State(state): State<RateLimitState<R>>,
    ClientIp(ip): ClientIp,
    request: Request,
    next: Next,
) -> Result<Response, LoginRejection>
where
    R: RepositoryProvider,
{
    let Some(ip) = ip else {
        tracing::debug!(category = %state.category, "No client IP, skipping rate limit");
        return Ok(next.run(request).await);
    };

    let decision = state
        .bulwark
        .consume_rate_limit(&ip.to_string(), state.category)
        .await?;

    if let Some(rejection) = LoginRejection::from_decision(&decision) {
        tracing::debug!(ip = %ip, category = %state.category, "Request rate limited");
        return Err(rejection);
    }

    Ok(next.run(request).await)
}
