//! tc-core: stable foundation for tcadctl.
//!
//! Contains:
//! - units (uom SI types + constructors for bias, current, time, frequency)
//! - numeric (Real + tolerances + float helpers)
//! - location (deck source locations used in diagnostics)
//! - timing (wall-clock timers for per-command summaries)
//! - error (shared error types)

pub mod error;
pub mod location;
pub mod numeric;
pub mod timing;
pub mod units;

pub use error::{TcError, TcResult};
pub use location::SourceLocation;
pub use numeric::*;
pub use units::*;
