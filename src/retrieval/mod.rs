//! Hybrid retrieval engine
//!
//! Control flow for one call: validate, rate-limit, resolve the query
//! embedding, search both providers in parallel under a deadline, fuse,
//! filter, enforce the token budget, audit, respond.

mod orchestrator;

pub use orchestrator::{validate_request, MemoryRetriever, MemoryRetrieverBuilder, ValidatedRequest};
