//! HTTP request engine: parser, response builder, CORS.

pub mod cors;
pub mod request;
pub mod response;

pub use cors::Cors;
pub use request::{Body, HttpRequest, head_end, request_complete};
pub use response::{HttpResponse, Reply};
