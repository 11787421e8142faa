//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Retention sweep: deletes records older than their family's retention window

mod sweep;

pub use sweep::spawn_sweep_task;
