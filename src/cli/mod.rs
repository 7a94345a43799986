//! Terminal presentation for the `dsview` binary.

pub mod report;
pub mod watch;
