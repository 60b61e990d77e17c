//! Action runner trait and invocation types.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

use wheelwright_core::Result;

/// How the cache lookup for a step went, exported to the command as
/// `WHEELWRIGHT_CACHE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHint {
    Exact,
    Partial,
    Miss,
}

impl CacheHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheHint::Exact => "exact",
            CacheHint::Partial => "partial",
            CacheHint::Miss => "miss",
        }
    }
}

/// Everything a runner needs to invoke one step command.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub step_name: String,
    /// Fully interpolated shell command.
    pub command: String,
    /// Effective working directory.
    pub workspace: PathBuf,
    pub env: HashMap<String, String>,
    pub cache: Option<CacheHint>,
}

/// Raw result of one command invocation.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub exit_code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub duration_ms: u64,
}

impl ActionOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Trait for invoking step commands.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    /// Invoke one command to completion, capturing its output.
    ///
    /// An `Err` means the command could not be run at all; a command that
    /// runs and fails reports through the outcome's exit code.
    async fn invoke(&self, ctx: &ActionContext) -> Result<ActionOutcome>;
}
