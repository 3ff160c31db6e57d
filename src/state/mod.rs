//! State management module.
//!
//! Contains the [`Store`] (shared server state) and the entities it owns.

mod channel;
mod clock;
mod connection;
pub mod managers;
mod store;
mod user;

pub use clock::SystemClock;
pub use connection::{Connection, DeliveryQueue, SharedRecord};
pub use store::{Store, StoreGuard};

#[cfg(test)]
pub use clock::{Clock, testing};
