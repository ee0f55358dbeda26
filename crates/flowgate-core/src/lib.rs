//! Core infrastructure for the flowgate engine.
//!
//! This crate provides the shared functionality the other flowgate crates are
//! built on:
//! - The [`KeyValueStore`] capability interface over the shared store
//!   (Redis-like), plus [`MemoryStore`], an in-process implementation used as
//!   the default backend and in tests
//! - An event-listener system for observability hooks
//! - Epoch-millisecond time helpers
//!
//! Nothing in this crate knows about caching policy, rate limits, or jobs;
//! those live in the crates layered on top.

mod events;
mod kv;
mod time;

pub use events::{EngineEvent, EventListener, EventListeners, FnListener};
pub use kv::{KeyValueStore, KvError, MemoryStore};
pub use time::now_ms;
