//! Queue module: the in-memory broker behind `memory://`.
//!
//! Design intent:
//! - The broker only moves opaque text between publishers and leases.
//! - Retry policy and job state live in the app layer, not here.
//! - The `Broker` trait in `ports` is the seam for a networked broker.

mod memory;

pub use memory::InMemoryBroker;
