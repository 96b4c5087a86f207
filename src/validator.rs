use std::time::Duration;

use serde::Serialize;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::renderer::{Diagnostic, RendererAdapter};

/// Reported when the widget rejects a command without saying why.
pub const EXECUTION_FAILED: &str = "Failed to execute the GeoGebra command.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandValidationResult {
    pub command: String,
    pub valid: bool,
    pub error: Option<String>,
}

impl CommandValidationResult {
    pub fn valid(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            valid: true,
            error: None,
        }
    }

    pub fn invalid(command: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            valid: false,
            error: Some(error.into()),
        }
    }
}

pub fn all_valid(results: &[CommandValidationResult]) -> bool {
    results.iter().all(|result| result.valid)
}

pub fn failures(results: &[CommandValidationResult]) -> Vec<CommandValidationResult> {
    results.iter().filter(|result| !result.valid).cloned().collect()
}

/// Renders failures as `Command: ..\nError: ..` entries separated by blank lines.
pub fn describe_failures(failures: &[CommandValidationResult]) -> String {
    failures
        .iter()
        .map(|failure| {
            format!(
                "Command: {}\nError: {}",
                failure.command,
                failure.error.as_deref().unwrap_or(EXECUTION_FAILED)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Trial-runs commands on a sandbox widget and collects a verdict per command.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    window: Duration,
}

impl CommandValidator {
    /// `window` is how long to wait for an out-of-band diagnostic after each command.
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Evaluates every non-blank command in order without resetting the sandbox,
    /// so later commands can use objects created by earlier ones. A failure does
    /// not stop the batch. Resetting before the batch is the caller's job.
    pub async fn validate(
        &self,
        sandbox: &mut dyn RendererAdapter,
        commands: &[String],
    ) -> Vec<CommandValidationResult> {
        let mut results = Vec::with_capacity(commands.len());
        for command in commands {
            let command = command.trim();
            if command.is_empty() {
                continue;
            }
            let result = self.validate_one(sandbox, command).await;
            if result.valid {
                debug!(command, "command passed validation");
            } else {
                debug!(command, error = ?result.error, "command failed validation");
            }
            results.push(result);
        }
        results
    }

    async fn validate_one(
        &self,
        sandbox: &mut dyn RendererAdapter,
        command: &str,
    ) -> CommandValidationResult {
        let stale = sandbox.drain_diagnostics();
        if stale > 0 {
            debug!(stale, "discarded diagnostics from earlier commands");
        }

        let receipt = match sandbox.eval_command(command).await {
            Ok(receipt) => receipt,
            Err(err) => {
                warn!(command, %err, "sandbox raised while evaluating command");
                return CommandValidationResult::invalid(command, err.to_string());
            }
        };

        match (self.await_diagnostic(sandbox, receipt.seq).await, receipt.success) {
            (Some(diagnostic), _) => CommandValidationResult::invalid(command, diagnostic.text),
            (None, true) => CommandValidationResult::valid(command),
            (None, false) => CommandValidationResult::invalid(command, EXECUTION_FAILED),
        }
    }

    /// Waits up to the window for a diagnostic attributable to `seq`. Diagnostics
    /// correlated with a different command are skipped.
    async fn await_diagnostic(
        &self,
        sandbox: &mut dyn RendererAdapter,
        seq: u64,
    ) -> Option<Diagnostic> {
        let deadline = Instant::now() + self.window;
        loop {
            match timeout_at(deadline, sandbox.next_diagnostic()).await {
                Ok(Some(diagnostic)) if diagnostic.belongs_to(seq) => return Some(diagnostic),
                Ok(Some(diagnostic)) => {
                    debug!(?diagnostic.seq, seq, "ignoring diagnostic for another command");
                }
                Ok(None) | Err(_) => return None,
            }
        }
    }
}
