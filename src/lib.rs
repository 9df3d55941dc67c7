//! Device registration and telemetry endpoint agent.
//!
//! Exposes the device record and runtime status over HTTP and accepts
//! registration updates that are merged into a file-backed configuration
//! store. See [`store::DeviceStore`] for the precedence and caching rules.

pub mod device;
pub mod extract;
pub mod secret;
pub mod server;
pub mod status;
pub mod store;
pub mod sysuuid;
