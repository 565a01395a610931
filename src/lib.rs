//! RTT Console
//!
//! Streams Real Time Transfer output from an embedded target into a console
//! that can be paused and scrolled back without losing or reordering lines.
//! Data comes either from a telnet-style relay run by the debug-probe driver
//! or straight from target memory through probe-rs.

pub mod acquisition;
pub mod config;
pub mod console;
pub mod error;
pub mod session;
pub mod terminal;
pub mod transport;

pub use config::Config;
pub use error::{ConsoleError, Result};
pub use session::{Session, SessionHandle, SessionSummary};
