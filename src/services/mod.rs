//! Service layer modules for external integrations.
//!
//! Contains clients for the AI service, object storage, payments, email and
//! the rate-limit store.

pub mod ai_client;
pub mod email;
pub mod payments;
pub mod rate_limiter;
pub mod storage;

pub use ai_client::AiClient;
pub use email::EmailClient;
pub use payments::PaymentsClient;
pub use rate_limiter::RateLimiter;
pub use storage::Storage;
