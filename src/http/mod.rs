//! HTTP message types shared by the server and client sides.

pub mod generator;
pub mod multipart;

mod body;
mod request;
mod response;
mod target;
pub(crate) mod wire;

pub use body::{
    Body, BodyStorage, BytesStorage, DiscardStorage, FileBody, FileStorage, StringStorage,
};
pub use request::{Request, RequestHead};
pub use response::Response;
pub use target::Target;
pub use wire::ResponseHead;

// The vocabulary types come straight from the `http` crate.
pub use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
