//! Stopwatch and log for hours worked. A foreground timer measures work, finished runs are stored
//! as sessions and totals can be priced under a few rounding policies.

pub mod aggregate;
pub mod cli;
pub mod session;
pub mod storage;
pub mod timer;
pub mod utils;
