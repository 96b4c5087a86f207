#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use geoprompt::controller::{ControllerConfig, FeedbackController};
use geoprompt::feedback::{FeedbackOutcome, FeedbackRequest, FeedbackRequester};
use geoprompt::llm_interaction::{ModelClient, TransportError};
use geoprompt::renderer::{Diagnostic, EvalReceipt, RendererAdapter, RendererError};
use geoprompt::validator::CommandValidationResult;
use geoprompt::WireMessage;

/// What a fake renderer saw, shared with the test after the renderer is boxed.
#[derive(Debug, Default)]
pub struct RendererLog {
    pub resets: usize,
    pub evaluated: Vec<String>,
}

/// Renderer whose verdict per command is scripted up front.
pub struct FakeRenderer {
    /// Command -> diagnostic text. `None` rejects without a diagnostic.
    rejects: HashMap<String, Option<String>>,
    raises: HashSet<String>,
    diagnostics: VecDeque<Diagnostic>,
    seq: u64,
    pub log: Arc<Mutex<RendererLog>>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self {
            rejects: HashMap::new(),
            raises: HashSet::new(),
            diagnostics: VecDeque::new(),
            seq: 0,
            log: Arc::new(Mutex::new(RendererLog::default())),
        }
    }

    pub fn rejecting(mut self, command: &str, diagnostic: &str) -> Self {
        self.rejects.insert(command.to_string(), Some(diagnostic.to_string()));
        self
    }

    pub fn refusing_silently(mut self, command: &str) -> Self {
        self.rejects.insert(command.to_string(), None);
        self
    }

    pub fn raising(mut self, command: &str) -> Self {
        self.raises.insert(command.to_string());
        self
    }

    pub fn log(&self) -> Arc<Mutex<RendererLog>> {
        self.log.clone()
    }
}

#[async_trait]
impl RendererAdapter for FakeRenderer {
    async fn ready(&mut self) -> Result<(), RendererError> {
        Ok(())
    }

    async fn reset(&mut self) -> Result<(), RendererError> {
        self.log.lock().unwrap().resets += 1;
        Ok(())
    }

    async fn eval_command(&mut self, command: &str) -> Result<EvalReceipt, RendererError> {
        self.seq += 1;
        self.log.lock().unwrap().evaluated.push(command.to_string());
        if self.raises.contains(command) {
            return Err(RendererError::Exception(format!("{} crashed the widget", command)));
        }
        match self.rejects.get(command) {
            Some(Some(text)) => {
                self.diagnostics.push_back(Diagnostic::correlated(self.seq, text.clone()));
                Ok(EvalReceipt { seq: self.seq, success: false })
            }
            Some(None) => Ok(EvalReceipt { seq: self.seq, success: false }),
            None => Ok(EvalReceipt { seq: self.seq, success: true }),
        }
    }

    async fn next_diagnostic(&mut self) -> Option<Diagnostic> {
        match self.diagnostics.pop_front() {
            Some(diagnostic) => Some(diagnostic),
            None => std::future::pending().await,
        }
    }

    fn try_diagnostic(&mut self) -> Option<Diagnostic> {
        self.diagnostics.pop_front()
    }
}

/// Model that answers from a queue and records every request.
#[derive(Default)]
pub struct FakeModel {
    replies: Mutex<VecDeque<Result<String, TransportError>>>,
    pub requests: Mutex<Vec<Vec<WireMessage>>>,
}

impl FakeModel {
    pub fn replying(replies: Vec<Result<String, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ModelClient for FakeModel {
    async fn generate(&self, _model: &str, messages: &[WireMessage]) -> Result<String, TransportError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Request("no scripted reply".to_string())))
    }
}

/// Feedback requester that answers from a queue and records the failures it was shown.
#[derive(Default)]
pub struct FakeFeedback {
    outcomes: Mutex<VecDeque<Result<FeedbackOutcome, TransportError>>>,
    pub calls: Mutex<Vec<Vec<CommandValidationResult>>>,
}

impl FakeFeedback {
    pub fn answering(outcomes: Vec<Result<FeedbackOutcome, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl FeedbackRequester for FakeFeedback {
    async fn request_correction(
        &self,
        request: FeedbackRequest<'_>,
    ) -> Result<FeedbackOutcome, TransportError> {
        self.calls.lock().unwrap().push(request.failures.to_vec());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Request("no scripted correction".to_string())))
    }
}

/// Lets a test keep a handle on the feedback fake after the controller takes ownership.
pub struct SharedFeedback(pub Arc<FakeFeedback>);

#[async_trait]
impl FeedbackRequester for SharedFeedback {
    async fn request_correction(
        &self,
        request: FeedbackRequest<'_>,
    ) -> Result<FeedbackOutcome, TransportError> {
        self.0.request_correction(request).await
    }
}

pub fn fenced(lines: &[&str]) -> String {
    format!("Here you go:\n```\n{}\n```", lines.join("\n"))
}

pub fn corrected(lines: &[&str]) -> Result<FeedbackOutcome, TransportError> {
    Ok(FeedbackOutcome::Corrected(fenced(lines)))
}

pub fn config() -> ControllerConfig {
    ControllerConfig {
        model: "gpt-4o-mini".to_string(),
        max_attempts: 3,
        validation_window: Duration::from_millis(10),
        correction_timeout: Duration::from_secs(60),
    }
}

pub fn controller(
    model: Arc<FakeModel>,
    feedback: Arc<FakeFeedback>,
    live: FakeRenderer,
    sandbox: FakeRenderer,
) -> FeedbackController {
    FeedbackController::new(
        config(),
        model,
        Box::new(SharedFeedback(feedback)),
        Box::new(live),
        Box::new(sandbox),
    )
}
