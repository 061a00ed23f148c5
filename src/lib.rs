//! wharf is an embeddable HTTP/1.1 and WebSocket framework with both
//! server and client sides, over plain TCP and TLS.
//!
//! # High level features
//!
//! - Pattern-matched request routing with nested sub-routers, regex
//!   captures, access policies and automatic CORS preflights.
//! - Two-phase request bodies: handlers pick the body storage (string,
//!   bytes, file on disk, …) *after* seeing the headers and *before* any
//!   body bytes are read.
//! - Full-duplex WebSocket connections with serialized per-direction
//!   action queues, usable from both sides.
//! - File serving, redirects and REST resource binding as first-class
//!   endpoint kinds.
//! - A client controller mirroring the server's body-filter mechanism.
//!
//! # Example
//!
//! ```no_run
//! use wharf::http::{Method, Response, StatusCode};
//! use wharf::server::{RoutingContext, ServerConfig};
//!
//! fn main() -> Result<(), wharf::Error> {
//!     let mut ctx = RoutingContext::new(ServerConfig::default())?;
//!
//!     ctx.router_mut().add(Method::GET, "/", |_req| async {
//!         Response::new(StatusCode::OK).with_text("hello")
//!     })?;
//!
//!     let server = ctx.start()?;
//!     server.stop().wait();
//!     Ok(())
//! }
//! ```
//!
//! # Server and client
//!
//! The server side starts from a [`server::RoutingContext`]; the client
//! side from a [`client::Controller`]. Both take their worker threads
//! from the shared [`runtime::Runtime`] model: `start` owns one, the
//! `*_on_current` flavors embed into an existing tokio runtime.

#![forbid(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod client;
pub mod error;
pub mod http;
pub mod runtime;
pub mod server;
pub mod session;
pub mod stream;
pub mod tls;
pub mod websocket;

pub use crate::error::{ConfigError, Error, ProtocolError, Result};
pub use crate::http::{Body, Request, RequestHead, Response, Target};
pub use crate::server::{Router, RoutingContext, ServerConfig};
pub use crate::websocket::{Message, WebSocketConnection};
