//! `${{ ... }}` variable interpolation for step fields.

use std::collections::HashMap;

use regex::Regex;

/// Context for variable interpolation within one job.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    /// Matrix attributes of the current job, including its role.
    pub matrix: HashMap<String, String>,
    /// Workflow environment merged with step-level overrides.
    pub env: HashMap<String, String>,
}

impl InterpolationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpolate `${{ matrix.key }}` and `${{ env.VAR }}` references.
    ///
    /// Unknown references resolve to the empty string so a step template
    /// shared across jobs never fails late on an attribute only some
    /// jobs carry.
    pub fn interpolate(&self, input: &str) -> String {
        let re = Regex::new(r"\$\{\{\s*([^}]+)\s*\}\}").unwrap();

        re.replace_all(input, |caps: &regex::Captures| {
            let expr = caps.get(1).map_or("", |m| m.as_str()).trim();
            self.resolve(expr)
        })
        .to_string()
    }

    fn resolve(&self, expr: &str) -> String {
        if let Some(key) = expr.strip_prefix("matrix.") {
            return self.matrix.get(key).cloned().unwrap_or_default();
        }
        if let Some(var) = expr.strip_prefix("env.") {
            return self
                .env
                .get(var)
                .cloned()
                .or_else(|| std::env::var(var).ok())
                .unwrap_or_default();
        }
        self.env.get(expr).cloned().unwrap_or_default()
    }
}
