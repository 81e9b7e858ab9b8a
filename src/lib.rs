// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod geo;
pub mod ingest;
pub mod metrics;
pub mod recommend;
pub mod store;

pub use crate::api::router;
pub use crate::ingest::types::{Event, EventProvider, RawEvent};
pub use crate::recommend::{recommend, score, ViewerContext};
