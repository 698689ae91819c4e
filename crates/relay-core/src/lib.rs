//! Shared library for the Event Hub: wire protocol, typed ids, error
//! taxonomy, configuration, the clock abstraction, and structured logging
//! setup, used by both the `relay-hub` binary and its test harness.

pub mod clock;
pub mod config;
pub mod data;
pub mod errors;
pub mod id;
pub mod log;
pub mod protocol;

pub use chrono;
pub use serde;
pub use serde_json;
pub use tracing;
pub use uuid;
