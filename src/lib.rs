//! Robot Studio script execution bridge.
//!
//! Locates a Python interpreter, runs UI-submitted scripts and pip installs as
//! child processes, and relays their output as events over an allow-listed
//! request/event protocol.

pub mod bridge;
pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod printer;
pub mod process;
pub mod relay;
pub mod utils;

pub use bridge::{Bridge, BridgeRequest, Response};
pub use config::{Config, Settings};
pub use error::BridgeError;
pub use process::python::{ProcessRunner, RunHandle};
pub use relay::{BridgeEvent, EventChannel, OutputRelay};
