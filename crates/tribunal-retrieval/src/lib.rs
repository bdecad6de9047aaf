//! tribunal-retrieval — Content-index retrieval backends.
//!
//! Implements the `ContextRetriever` trait over an external content-index
//! HTTP service, plus an in-memory retriever for tests. Ingestion and
//! embedding of exam material are entirely external; this crate only runs
//! scoped, read-only queries.

pub mod client;
pub mod error;
pub mod mock;

pub use client::ContentIndexClient;
pub use error::RetrievalError;
pub use mock::StaticRetriever;
