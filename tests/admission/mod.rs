//! Test organization:
//! - capacity.rs: quota invariant and tier ordering under concurrency
//! - reclaim.rs: periodic reclaim of aged grants
//! - quota.rs: pausing on upstream quota telemetry

mod reclaim;
