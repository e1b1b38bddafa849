pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod identity;
pub mod model;
pub mod notify;
pub mod protocol;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod transport;

#[cfg(test)]
mod testing;

pub use tidetable_sdk as api;
