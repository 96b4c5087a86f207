use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::constants;
use crate::correction_channel::InboundEvent;
use crate::error_log::ErrorLog;
use crate::extractor::{extract_commands, replace_command};
use crate::feedback::{FeedbackOutcome, FeedbackRequest, FeedbackRequester};
use crate::llm_interaction::{ModelClient, TransportError};
use crate::renderer::{RendererAdapter, RendererError};
use crate::validator::{self, describe_failures, CommandValidationResult, CommandValidator};
use crate::{ChatMessage, Conversation};

pub fn interim_notice(attempt: usize, max_attempts: usize) -> String {
    format!(
        "Command errors detected, regenerating the answer (attempt {}/{})...",
        attempt, max_attempts
    )
}

pub fn exhausted_notice(max_attempts: usize) -> String {
    format!(
        "Exceeded the maximum number of command modification attempts ({} times). Please try a different question.",
        max_attempts
    )
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub model: String,
    pub max_attempts: usize,
    pub validation_window: Duration,
    /// How long a turn may wait for pushed corrections before it is failed.
    pub correction_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            model: constants::DEFAULT_MODEL.clone(),
            max_attempts: constants::MAX_FEEDBACK_RETRY,
            validation_window: *constants::VALIDATION_WINDOW,
            correction_timeout: *constants::CORRECTION_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    AwaitingModelResponse,
    ExtractingCommands,
    Validating,
    RequestingFeedback,
    Applying,
}

/// Bookkeeping for pushed corrections of the current feedback round.
#[derive(Debug, Clone)]
struct AwaitingPush {
    expected: usize,
    received: usize,
    /// Candidate text with every command correction received so far applied.
    patched: String,
    // When the round was requested; partial replies do not extend it.
    requested_at: Instant,
}

/// Retry state of one user turn. Replaced on every submission.
#[derive(Debug, Clone)]
pub struct RetrySession {
    pub attempt: usize,
    pub max_attempts: usize,
    pub user_query: String,
    pub commands: Vec<String>,
    pub response_text: String,
    pub error_record_id: Option<Uuid>,
    interim_index: Option<usize>,
    awaiting: Option<AwaitingPush>,
}

impl RetrySession {
    fn new(max_attempts: usize, user_query: &str) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            user_query: user_query.to_string(),
            commands: Vec::new(),
            response_text: String::new(),
            error_record_id: None,
            interim_index: None,
            awaiting: None,
        }
    }

    pub fn is_awaiting_correction(&self) -> bool {
        self.awaiting.is_some()
    }

    fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Every command validated and was replayed on the live renderer.
    Applied {
        applied: Vec<String>,
        /// Commands the live renderer still refused during replay.
        rejected: Vec<String>,
        regenerated: bool,
    },
    /// Retries ran out; only the individually valid commands were drawn.
    PartiallyApplied {
        applied: Vec<String>,
        rejected: Vec<String>,
        failures: Vec<CommandValidationResult>,
    },
    /// Waiting for the correction channel to push a fix.
    AwaitingCorrection { attempt: usize },
    Failed { message: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("a turn is already in progress")]
    Busy,
    #[error("input is empty")]
    EmptyInput,
}

enum Reply {
    Full {
        content: String,
        error_block_id: Option<String>,
    },
    Patch {
        original: String,
        corrected: String,
    },
}

/// Drives one chat turn from user input to commands drawn on the live renderer,
/// validating on the sandbox and asking for corrections in between.
pub struct FeedbackController {
    config: ControllerConfig,
    validator: CommandValidator,
    model: Arc<dyn ModelClient>,
    feedback: Box<dyn FeedbackRequester>,
    // Only apply/replay touches `live`; only validation touches `sandbox`.
    live: Box<dyn RendererAdapter>,
    sandbox: Box<dyn RendererAdapter>,
    conversation: Conversation,
    error_log: ErrorLog,
    // Single source of truth for `is_loading`
    state: ControllerState,
    // Current turn; kept after it finishes so late push replies can be matched
    session: Option<RetrySession>,
    // Pushed replies still owed for rounds nobody is waiting on any more.
    stale_replies: usize,
}

impl FeedbackController {
    pub fn new(
        config: ControllerConfig,
        model: Arc<dyn ModelClient>,
        feedback: Box<dyn FeedbackRequester>,
        live: Box<dyn RendererAdapter>,
        sandbox: Box<dyn RendererAdapter>,
    ) -> Self {
        Self {
            validator: CommandValidator::new(config.validation_window),
            config,
            model,
            feedback,
            live,
            sandbox,
            conversation: Conversation::default(),
            error_log: ErrorLog::new(),
            state: ControllerState::Idle,
            session: None,
            stale_replies: 0,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn is_loading(&self) -> bool {
        self.state != ControllerState::Idle
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn error_log(&self) -> &ErrorLog {
        &self.error_log
    }

    pub fn session(&self) -> Option<&RetrySession> {
        self.session.as_ref()
    }

    pub fn attempt(&self) -> usize {
        self.session.as_ref().map_or(0, |session| session.attempt)
    }

    /// Waits for both renderers to finish loading.
    pub async fn wait_until_ready(&mut self) -> Result<(), RendererError> {
        self.live.ready().await?;
        self.sandbox.ready().await?;
        Ok(())
    }

    /// Clears the chat, the error log and the live figure.
    pub async fn reset_conversation(&mut self) -> Result<(), ControllerError> {
        if self.is_loading() {
            return Err(ControllerError::Busy);
        }
        self.abandon_session();
        self.conversation.reset();
        self.error_log = ErrorLog::new();
        if let Err(err) = self.live.reset().await {
            warn!(%err, "failed to reset live renderer");
        }
        Ok(())
    }

    /// Starts a new turn. Rejected while a previous turn is still in flight.
    #[instrument(skip(self))]
    pub async fn submit(&mut self, input: &str) -> Result<TurnOutcome, ControllerError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ControllerError::EmptyInput);
        }
        if self.is_loading() {
            return Err(ControllerError::Busy);
        }

        // A new turn supersedes whatever the previous one left behind.
        self.abandon_session();
        self.conversation.push(ChatMessage::user(input));
        if let Err(err) = self.live.reset().await {
            warn!(%err, "failed to reset live renderer");
        }

        self.state = ControllerState::AwaitingModelResponse;
        let wire = self.conversation.to_wire();
        let response = match self.model.generate(&self.config.model, &wire).await {
            Ok(response) => response,
            Err(err) => {
                error!(%err, "model request failed");
                return Ok(self.fail_turn(None, &err));
            }
        };
        info!(chars = response.len(), "model responded");

        let session = RetrySession::new(self.config.max_attempts, input);
        Ok(self.run_session(session, response).await)
    }

    /// Feeds one event from the correction channel into the state machine.
    /// Returns the outcome when the event moved the pending turn forward.
    pub async fn handle_event(&mut self, event: InboundEvent) -> Option<TurnOutcome> {
        match event {
            InboundEvent::FullCorrection {
                content,
                error_block_id,
                ..
            } => {
                self.on_reply(Reply::Full {
                    content,
                    error_block_id,
                })
                .await
            }
            InboundEvent::CommandCorrection {
                original,
                corrected,
                ..
            } => self.on_reply(Reply::Patch { original, corrected }).await,
            InboundEvent::Confirmation { message } => {
                debug!(%message, "correction backend confirmation");
                None
            }
            InboundEvent::Error { message } => {
                warn!(%message, "correction backend reported an error");
                self.fail_pending(TransportError::Status {
                    status: 500,
                    body: message,
                })
            }
            InboundEvent::Unknown => {
                warn!("ignoring correction event with an unrecognised type");
                None
            }
        }
    }

    /// When the pending push round should be given up on, if one is pending.
    pub fn correction_deadline(&self) -> Option<Instant> {
        let awaiting = self.session.as_ref()?.awaiting.as_ref()?;
        Some(awaiting.requested_at + self.config.correction_timeout)
    }

    /// Gives up on a turn that is waiting for pushed corrections.
    pub fn fail_pending(&mut self, err: TransportError) -> Option<TurnOutcome> {
        let mut session = self.session.take()?;
        let Some(awaiting) = session.awaiting.take() else {
            self.session = Some(session);
            return None;
        };
        self.stale_replies += awaiting.expected - awaiting.received;
        // The failed round does not count against the retry budget.
        session.attempt = session.attempt.saturating_sub(1);
        Some(self.fail_turn(Some(session), &err))
    }

    async fn on_reply(&mut self, reply: Reply) -> Option<TurnOutcome> {
        if self.stale_replies > 0 {
            self.stale_replies -= 1;
            debug!(remaining = self.stale_replies, "dropping reply for an abandoned round");
            return None;
        }
        let Some(mut session) = self.session.take() else {
            debug!("correction arrived with no active turn");
            return None;
        };
        let Some(mut awaiting) = session.awaiting.take() else {
            debug!("correction arrived while not waiting for one");
            self.session = Some(session);
            return None;
        };

        if let Reply::Full {
            error_block_id: Some(block_id),
            ..
        } = &reply
        {
            let current = session.error_record_id.map(|id| id.to_string());
            if current.as_deref() != Some(block_id.as_str()) {
                debug!(%block_id, "correction belongs to another error record");
                session.awaiting = Some(awaiting);
                self.session = Some(session);
                return None;
            }
        }

        awaiting.received += 1;
        match reply {
            Reply::Full { content, .. } => {
                self.stale_replies += awaiting.expected.saturating_sub(awaiting.received);
                Some(self.run_session(session, content).await)
            }
            Reply::Patch {
                original,
                corrected,
            } => {
                match replace_command(&awaiting.patched, &original, &corrected) {
                    Some(patched) => awaiting.patched = patched,
                    None => warn!(%original, "correction does not match any pending command"),
                }
                if awaiting.received < awaiting.expected {
                    session.awaiting = Some(awaiting);
                    self.session = Some(session);
                    return None;
                }
                Some(self.run_session(session, awaiting.patched).await)
            }
        }
    }

    /// Validates `candidate`, requesting corrections until it passes, the
    /// budget runs out, or a correction has to be awaited.
    async fn run_session(&mut self, mut session: RetrySession, mut candidate: String) -> TurnOutcome {
        loop {
            self.state = ControllerState::ExtractingCommands;
            session.commands = extract_commands(&candidate);
            session.response_text = candidate.clone();
            debug!(commands = session.commands.len(), attempt = session.attempt, "extracted commands");

            self.state = ControllerState::Validating;
            let results = self.validate_on_sandbox(&session.commands).await;
            if validator::all_valid(&results) {
                return self.apply(session).await;
            }
            let failures = validator::failures(&results);
            if session.exhausted() {
                warn!(attempt = session.attempt, "correction budget exhausted");
                return self.apply_partial(session).await;
            }

            match self.request_feedback(&mut session, &failures).await {
                Ok(FeedbackOutcome::Corrected(next)) => candidate = next,
                Ok(FeedbackOutcome::Pending { expected_replies }) => {
                    let attempt = session.attempt;
                    session.awaiting = Some(AwaitingPush {
                        expected: expected_replies,
                        received: 0,
                        patched: session.response_text.clone(),
                        requested_at: Instant::now(),
                    });
                    self.session = Some(session);
                    return TurnOutcome::AwaitingCorrection { attempt };
                }
                Err(err) => {
                    error!(%err, "feedback request failed");
                    return self.fail_turn(Some(session), &err);
                }
            }
        }
    }

    async fn request_feedback(
        &mut self,
        session: &mut RetrySession,
        failures: &[CommandValidationResult],
    ) -> Result<FeedbackOutcome, TransportError> {
        let record_id = match session.error_record_id {
            Some(id) => id,
            None => {
                let id = self
                    .error_log
                    .create(describe_failures(failures), session.response_text.clone());
                session.error_record_id = Some(id);
                id
            }
        };

        session.attempt += 1;
        self.state = ControllerState::RequestingFeedback;
        info!(attempt = session.attempt, failures = failures.len(), "requesting correction");

        let mut notice = ChatMessage::system(interim_notice(session.attempt, session.max_attempts));
        notice.error_record_id = Some(record_id);
        self.show_interim(session, notice);

        let wire = self.conversation.to_wire();
        let result = self
            .feedback
            .request_correction(FeedbackRequest {
                conversation: &wire,
                user_query: &session.user_query,
                response_text: &session.response_text,
                failures,
                error_record_id: Some(record_id),
            })
            .await;
        if result.is_err() {
            session.attempt -= 1;
        }
        result
    }

    async fn validate_on_sandbox(&mut self, commands: &[String]) -> Vec<CommandValidationResult> {
        if let Err(err) = self.sandbox.reset().await {
            warn!(%err, "failed to reset sandbox renderer");
        }
        self.validator.validate(self.sandbox.as_mut(), commands).await
    }

    /// Resets the live renderer and replays `commands` on it. Commands the
    /// renderer refuses or raises on are returned separately.
    async fn replay_on_live(&mut self, commands: &[String]) -> (Vec<String>, Vec<String>) {
        if let Err(err) = self.live.reset().await {
            warn!(%err, "failed to reset live renderer");
        }
        let mut applied = Vec::with_capacity(commands.len());
        let mut rejected = Vec::new();
        for command in commands {
            match self.live.eval_command(command).await {
                Ok(receipt) if receipt.success => applied.push(command.clone()),
                Ok(_) => {
                    warn!(%command, "live renderer refused a validated command");
                    rejected.push(command.clone());
                }
                Err(err) => {
                    warn!(%command, %err, "live renderer raised on a validated command");
                    rejected.push(command.clone());
                }
            }
        }
        self.live.drain_diagnostics();
        (applied, rejected)
    }

    async fn apply(&mut self, mut session: RetrySession) -> TurnOutcome {
        self.state = ControllerState::Applying;
        let regenerated = session.attempt > 0;
        let (applied, rejected) = self.replay_on_live(&session.commands).await;

        let mut message = ChatMessage::assistant(session.response_text.clone());
        message.is_regenerated = regenerated;
        message.error_record_id = session.error_record_id;
        self.place_response(&mut session, message);

        if let Some(id) = session.error_record_id.take() {
            if regenerated {
                self.error_log.set_resolved(id, true);
            }
        }
        info!(applied = applied.len(), regenerated, "turn applied");
        session.attempt = 0;
        self.session = Some(session);
        self.state = ControllerState::Idle;

        TurnOutcome::Applied {
            applied,
            rejected,
            regenerated,
        }
    }

    async fn apply_partial(&mut self, mut session: RetrySession) -> TurnOutcome {
        self.state = ControllerState::Validating;
        let results = self.validate_on_sandbox(&session.commands).await;
        let valid: Vec<String> = results
            .iter()
            .filter(|result| result.valid)
            .map(|result| result.command.clone())
            .collect();
        let failures = validator::failures(&results);

        self.state = ControllerState::Applying;
        let (applied, rejected) = self.replay_on_live(&valid).await;

        let mut message = ChatMessage::assistant(session.response_text.clone());
        message.is_regenerated = session.attempt > 0;
        message.error_record_id = session.error_record_id;
        self.place_response(&mut session, message);
        if let Some(id) = session.error_record_id {
            self.error_log.set_resolved(id, false);
        }
        self.conversation
            .push(ChatMessage::system(exhausted_notice(session.max_attempts)));

        warn!(applied = applied.len(), failed = failures.len(), "applied partial result");
        self.session = Some(session);
        self.state = ControllerState::Idle;

        TurnOutcome::PartiallyApplied {
            applied,
            rejected,
            failures,
        }
    }

    fn fail_turn(&mut self, session: Option<RetrySession>, err: &TransportError) -> TurnOutcome {
        let message = err.user_message();
        self.conversation.push(ChatMessage::system(message.clone()));
        self.session = session;
        self.state = ControllerState::Idle;
        TurnOutcome::Failed { message }
    }

    /// Inserts the in-progress notice once per turn, then updates it in place.
    fn show_interim(&mut self, session: &mut RetrySession, notice: ChatMessage) {
        match session.interim_index {
            Some(index) if index < self.conversation.len() => {
                self.conversation.replace(index, notice);
            }
            _ => session.interim_index = Some(self.conversation.push(notice)),
        }
    }

    /// The final answer takes the interim notice's slot when there is one.
    fn place_response(&mut self, session: &mut RetrySession, message: ChatMessage) {
        match session.interim_index.take() {
            Some(index) if index < self.conversation.len() => {
                self.conversation.replace(index, message);
            }
            _ => {
                self.conversation.push(message);
            }
        }
    }

    fn abandon_session(&mut self) {
        if let Some(session) = self.session.take() {
            if let Some(awaiting) = session.awaiting {
                self.stale_replies += awaiting.expected - awaiting.received;
            }
        }
    }
}
