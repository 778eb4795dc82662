//! Response envelopes shared by every route

pub mod pagination;
pub mod response;

pub use pagination::{Paginated, PaginationParams};
pub use response::DataResponse;
