pub mod client_ip;
pub mod rate_limit;
pub mod request_id;

pub use client_ip::ClientIp;
pub use rate_limit::{Checkout, Intake, IntakeUpload, IpRateLimit};
pub use request_id::{request_id_layer, RequestId};
