//! Domain managers for server state.
//!
//! Managers own state that lives beside the entity topology rather than in
//! it, so it can be read without taking the store lock.

pub mod stats;
