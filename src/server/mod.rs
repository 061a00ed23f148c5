//! The server side: listener, HTTP connection pipeline, routing.

pub(crate) mod connection;
pub mod filter;
pub(crate) mod listener;
pub mod request_generator;
pub mod routing;
mod routing_context;

pub use filter::{FileFilter, RequestFilter, TextFilter};
pub use request_generator::RequestGenerator;
pub use routing::{PreflightConfig, Resource, RestError, Router};
pub use routing_context::{RoutingContext, Server, ServerConfig, ServerHandle};
