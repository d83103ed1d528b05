//! Sprig Telemetry - Logging setup for Sprig.
//!
//! Thin configuration layer over `tracing-subscriber`: pick a level, a
//! format and a target, and install the global subscriber once at startup.
//!
//! # Example
//!
//! ```rust,no_run
//! use sprig_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), sprig_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Pretty)
//!     .with_directive("sprig_loader=trace");
//!
//! setup_logging(&config)?;
//! tracing::info!("logging ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging,
};
