//! Step execution for Wheelwright jobs.
//!
//! The executor walks a job's steps in order, honoring conditions,
//! failure policies, retries and timeouts, restores and saves the
//! workflow cache around cached steps, and collects the wheel a
//! build job leaves behind. Commands run through the [`ActionRunner`]
//! trait so tests can substitute scripted runners for a real shell.

pub mod action;
pub mod collect;
pub mod executor;
pub mod shell;

pub use action::{ActionContext, ActionOutcome, ActionRunner, CacheHint};
pub use collect::collect_artifact;
pub use executor::JobExecutor;
pub use shell::ShellRunner;
