//! Network Infrastructure
//!
//! Transport pieces for the decision engine's execution-client channel:
//! line-framed TCP, a single retry policy for transient I/O, and clock
//! helpers shared by time-dependent components.

pub mod error;
pub mod line;
pub mod listener;
pub mod retry;
pub mod time;

// Re-export commonly used types
pub use error::{Result, TransportError};
pub use line::{LineReader, LineWriter};
pub use listener::LineListener;
pub use retry::RetryPolicy;
pub use time::{elapsed_us, safe_system_timestamp_ns, window_elapsed, Clock, ManualClock, SystemClock};

pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;
