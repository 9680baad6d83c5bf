//! Public request/response types.

mod options;
mod response;

pub use options::{Headers, MultipartField, MultipartValue, RequestBody, RequestOptions};
pub use response::{RequestError, Response};
