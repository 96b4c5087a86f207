use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RendererError {
    #[error("renderer is not connected")]
    Disconnected,
    #[error("renderer did not answer within the allotted time")]
    Timeout,
    #[error("renderer raised an exception: {0}")]
    Exception(String),
}

/// Acknowledgement of one `eval_command` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalReceipt {
    /// Per-renderer sequence number of the call; diagnostics may echo it back.
    pub seq: u64,
    /// Whether the widget reported the command as executed.
    pub success: bool,
}

/// Error text raised by the widget out of band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Sequence number of the command that produced it, when the host knows it.
    pub seq: Option<u64>,
    pub text: String,
}

impl Diagnostic {
    pub fn correlated(seq: u64, text: impl Into<String>) -> Self {
        Self {
            seq: Some(seq),
            text: text.into(),
        }
    }

    pub fn uncorrelated(text: impl Into<String>) -> Self {
        Self {
            seq: None,
            text: text.into(),
        }
    }

    /// A diagnostic without a sequence number is attributed by timing alone.
    pub fn belongs_to(&self, seq: u64) -> bool {
        self.seq.map_or(true, |own| own == seq)
    }
}

/// A geometry widget instance that can execute DSL commands.
///
/// Each instance is owned by exactly one phase: the sandbox by validation, the
/// live one by application.
#[async_trait]
pub trait RendererAdapter: Send {
    /// Resolves once the widget has finished loading.
    async fn ready(&mut self) -> Result<(), RendererError>;

    async fn reset(&mut self) -> Result<(), RendererError>;

    async fn eval_command(&mut self, command: &str) -> Result<EvalReceipt, RendererError>;

    /// Waits for the next diagnostic. `None` means the channel is closed.
    async fn next_diagnostic(&mut self) -> Option<Diagnostic>;

    fn try_diagnostic(&mut self) -> Option<Diagnostic>;

    /// Discards diagnostics left over from earlier commands.
    fn drain_diagnostics(&mut self) -> usize {
        let mut dropped = 0;
        while self.try_diagnostic().is_some() {
            dropped += 1;
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncorrelated_diagnostic_matches_any_command() {
        let diagnostic = Diagnostic::uncorrelated("Unknown command X");
        assert!(diagnostic.belongs_to(1));
        assert!(diagnostic.belongs_to(42));
    }

    #[test]
    fn test_correlated_diagnostic_matches_only_its_command() {
        let diagnostic = Diagnostic::correlated(3, "Undefined variable");
        assert!(diagnostic.belongs_to(3));
        assert!(!diagnostic.belongs_to(4));
    }
}
