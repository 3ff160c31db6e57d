//! Background services.
//!
//! Currently only garbage collection of stale entities.

pub mod reaper;

pub use reaper::spawn_reapers;
