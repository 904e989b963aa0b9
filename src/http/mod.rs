//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs   (Axum setup, request ID, tracing)
//!     → request.rs  (x-request-id generation)
//!     → [rewrite pipeline for POST …/v1/responses]
//!     → body.rs     (rewritten buffer installed, Content-Length fixed)
//!     → upstream.rs (URI/Host/X-Forwarded-For, hop-by-hop stripped)
//!     → upstream response streamed back to the client
//! ```

pub mod body;
pub mod request;
pub mod server;
pub mod upstream;

pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
pub use upstream::{Upstream, UpstreamClient, UpstreamError};
