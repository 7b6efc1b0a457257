//! Test organization:
//! - expiry.rs: TTL and lazy eviction
//! - payloads.rs: heterogeneous payload types and fallible fetches
//! - concurrency.rs: independent and coalesced concurrent misses

mod expiry;
mod payloads;
