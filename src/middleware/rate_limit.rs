//! Extractors that consult the rate limiter before the body is read

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::marker::PhantomData;
use std::sync::Arc;

use super::ClientIp;
use crate::app::AppState;
use crate::error::ApiError;
use crate::services::rate_limiter::{RateLimitDecision, RateLimitPolicy};

/// Type-level selector for a policy
pub trait LimitPolicy: Send + Sync + 'static {
    const POLICY: RateLimitPolicy;
}

pub struct Intake;

impl LimitPolicy for Intake {
    const POLICY: RateLimitPolicy = RateLimitPolicy::INTAKE;
}

pub struct IntakeUpload;

impl LimitPolicy for IntakeUpload {
    const POLICY: RateLimitPolicy = RateLimitPolicy::INTAKE_UPLOAD;
}

pub struct Checkout;

impl LimitPolicy for Checkout {
    const POLICY: RateLimitPolicy = RateLimitPolicy::CHECKOUT;
}

/// IP-keyed quota for public routes. Rejects with 429 before the handler runs;
/// the decision is returned so the handler can attach `X-RateLimit-*` headers.
pub struct IpRateLimit<P> {
    pub decision: RateLimitDecision,
    pub client_ip: ClientIp,
    _policy: PhantomData<P>,
}

#[async_trait]
impl<P: LimitPolicy> FromRequestParts<Arc<AppState>> for IpRateLimit<P> {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let client_ip = match ClientIp::from_request_parts(parts, state).await {
            Ok(ip) => ip,
            Err(never) => match never {},
        };
        let decision = state
            .rate_limiter
            .enforce(&P::POLICY, &client_ip.rate_limit_id())
            .await?;

        Ok(Self {
            decision,
            client_ip,
            _policy: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::leads::MAX_INTAKE_PHOTOS;

    #[test]
    fn upload_quota_covers_a_full_submission() {
        assert!(IntakeUpload::POLICY.limit as usize >= 2 * MAX_INTAKE_PHOTOS);
        assert_ne!(IntakeUpload::POLICY.key("ip:1"), Intake::POLICY.key("ip:1"));
    }
}
