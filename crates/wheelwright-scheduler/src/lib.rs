//! Matrix expansion and job scheduling for Wheelwright.

pub mod matrix;
pub mod report;
pub mod scheduler;

pub use matrix::MatrixExpander;
pub use report::{RunReport, RunTotals};
pub use scheduler::JobScheduler;
