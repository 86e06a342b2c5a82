//! Background Tasks Module
//!
//! Contains background tasks that run alongside cache instances.
//!
//! # Tasks
//! - Expiry sweep: removes expired in-process entries at a fixed interval

mod sweep;

pub(crate) use sweep::spawn_sweep_task;
