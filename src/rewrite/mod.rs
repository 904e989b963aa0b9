//! Request body rewriting for the responses endpoint.
//!
//! # Data Flow
//! ```text
//! POST …/v1/responses
//!     → pipeline.rs   (buffer body into a pooled buffer)
//!     → decompress.rs (gzip → plaintext, Content-Encoding removed)
//!     → decision.rs   (one scan of three keys → Action)
//!         ├─ Passthrough / AlreadyKeyed → original buffer
//!         ├─ InjectCacheKey → splice.rs (byte copy), else document.rs
//!         └─ Restructure    → document.rs (borrowed view, re-serialize)
//!     → http::body   (Content-Length set, buffer installed as body)
//! ```
//!
//! # Design Decisions
//! - The scanner is a byte search; it never parses
//! - Parse and serialize failures forward the bytes already read
//! - The document view borrows the input buffer, so the buffer is released
//!   only after re-serialization
//! - Cache keys come from request identity via `cache_key.rs`

pub mod cache_key;
pub mod decision;
pub mod decompress;
pub mod document;
pub mod pipeline;
pub mod scanner;
pub mod splice;

pub use cache_key::CacheIdentity;
pub use decision::{Action, DecisionFlags, FieldScanner};
pub use pipeline::{Outcome, Rewriter};

/// Top-level fields the rewrite reads or writes.
pub const INSTRUCTIONS: &str = "instructions";
pub const INPUT: &str = "input";
pub const PROMPT_CACHE_KEY: &str = "prompt_cache_key";
