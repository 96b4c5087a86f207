use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::correction_channel::{CorrectionChannel, OutboundMessage};
use crate::llm_interaction::{ModelClient, TransportError};
use crate::validator::{describe_failures, CommandValidationResult, EXECUTION_FAILED};
use crate::{Role, WireMessage};

/// Everything a requester needs to ask for a corrected response.
#[derive(Debug, Clone, Copy)]
pub struct FeedbackRequest<'a> {
    /// Turns sent to the model so far, preamble included.
    pub conversation: &'a [WireMessage],
    pub user_query: &'a str,
    /// The full response whose commands failed.
    pub response_text: &'a str,
    pub failures: &'a [CommandValidationResult],
    pub error_record_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackOutcome {
    /// A corrected full response, available now.
    Corrected(String),
    /// Corrections will be pushed later; one reply per failing command.
    Pending { expected_replies: usize },
}

#[async_trait]
pub trait FeedbackRequester: Send + Sync {
    async fn request_correction(
        &self,
        request: FeedbackRequest<'_>,
    ) -> Result<FeedbackOutcome, TransportError>;
}

pub fn correction_prompt(failures: &[CommandValidationResult]) -> String {
    format!(
        "Error occurred during command execution. Please provide the corrected command:\n\n{}",
        describe_failures(failures)
    )
}

/// Asks the generation endpoint again with the failures appended as a user turn.
pub struct RequestResponseFeedback {
    model: Arc<dyn ModelClient>,
    model_id: String,
}

impl RequestResponseFeedback {
    pub fn new(model: Arc<dyn ModelClient>, model_id: impl Into<String>) -> Self {
        Self {
            model,
            model_id: model_id.into(),
        }
    }
}

#[async_trait]
impl FeedbackRequester for RequestResponseFeedback {
    #[instrument(skip_all, fields(failures = request.failures.len()))]
    async fn request_correction(
        &self,
        request: FeedbackRequest<'_>,
    ) -> Result<FeedbackOutcome, TransportError> {
        let mut messages = request.conversation.to_vec();
        messages.push(WireMessage::new(Role::Assistant, request.response_text));
        messages.push(WireMessage::new(Role::User, correction_prompt(request.failures)));
        debug!(turns = messages.len(), "requesting corrected response");

        let corrected = self.model.generate(&self.model_id, &messages).await?;
        Ok(FeedbackOutcome::Corrected(corrected))
    }
}

/// Reports failures over the persistent channel; the backend pushes the fix.
pub struct StreamingFeedback {
    channel: CorrectionChannel,
}

impl StreamingFeedback {
    pub fn new(channel: CorrectionChannel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl FeedbackRequester for StreamingFeedback {
    #[instrument(skip_all, fields(failures = request.failures.len()))]
    async fn request_correction(
        &self,
        request: FeedbackRequest<'_>,
    ) -> Result<FeedbackOutcome, TransportError> {
        if !self.channel.is_open() {
            return Err(TransportError::ChannelClosed);
        }

        self.channel.send(OutboundMessage::Query {
            query: request.user_query.to_string(),
        })?;
        for failure in request.failures {
            self.channel.send(OutboundMessage::CommandResult {
                command: failure.command.trim().to_string(),
                llm_response: request.response_text.to_string(),
                success: false,
                error: failure
                    .error
                    .clone()
                    .unwrap_or_else(|| EXECUTION_FAILED.to_string()),
                regenerate_full: true,
                error_block_id: request.error_record_id.map(|id| id.to_string()),
            })?;
        }
        info!(expected = request.failures.len(), "correction requested over push channel");

        Ok(FeedbackOutcome::Pending {
            expected_replies: request.failures.len(),
        })
    }
}
