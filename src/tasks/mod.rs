//! Background Tasks Module
//!
//! Periodic work driven by the host rather than by the cache itself.
//!
//! # Tasks
//! - Maintenance: expires stale entries and enforces the size cap at
//!   configured intervals

mod maintenance;

pub use maintenance::spawn_maintenance_task;
