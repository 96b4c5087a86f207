// Renderer adapter for widgets hosted in the browser page served by web_server.
// The page receives BridgeCommands over the /bridge socket and answers with BridgeEvents.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::renderer::{Diagnostic, EvalReceipt, RendererAdapter, RendererError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetId {
    Live,
    Sandbox,
}

/// Instructions for the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    Reset { app: WidgetId },
    Eval { app: WidgetId, seq: u64, command: String },
}

/// Reports from the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    Ready {
        app: WidgetId,
    },
    EvalResult {
        seq: u64,
        success: bool,
    },
    Diagnostic {
        app: WidgetId,
        #[serde(default)]
        seq: Option<u64>,
        text: String,
    },
    #[serde(other)]
    Unknown,
}

/// Shared between the web server's socket handlers and the bridge renderers.
pub struct RendererHub {
    commands: broadcast::Sender<BridgeCommand>,
    pending: Mutex<HashMap<u64, oneshot::Sender<bool>>>,
    diagnostics: Mutex<HashMap<WidgetId, mpsc::UnboundedSender<Diagnostic>>>,
    ready: HashMap<WidgetId, watch::Sender<bool>>,
    next_seq: AtomicU64,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RendererHub {
    pub fn new() -> Arc<Self> {
        let (commands, _) = broadcast::channel(256);
        let ready = [WidgetId::Live, WidgetId::Sandbox]
            .into_iter()
            .map(|app| (app, watch::channel(false).0))
            .collect();
        Arc::new(Self {
            commands,
            pending: Mutex::new(HashMap::new()),
            diagnostics: Mutex::new(HashMap::new()),
            ready,
            next_seq: AtomicU64::new(1),
        })
    }

    /// A stream of commands for one connected page.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeCommand> {
        self.commands.subscribe()
    }

    /// Creates the adapter for `app`. Creating a second one for the same widget
    /// takes over its diagnostics.
    pub fn renderer(self: &Arc<Self>, app: WidgetId, eval_timeout: Duration) -> BridgeRenderer {
        let (tx, rx) = mpsc::unbounded_channel();
        locked(&self.diagnostics).insert(app, tx);
        BridgeRenderer {
            app,
            hub: Arc::clone(self),
            diagnostics: rx,
            ready: self.ready_receiver(app),
            eval_timeout,
        }
    }

    pub fn handle_event(&self, event: BridgeEvent) {
        match event {
            BridgeEvent::Ready { app } => {
                info!(?app, "widget ready");
                if let Some(ready) = self.ready.get(&app) {
                    ready.send_replace(true);
                }
            }
            BridgeEvent::EvalResult { seq, success } => match locked(&self.pending).remove(&seq) {
                Some(waiter) => {
                    let _ = waiter.send(success);
                }
                None => debug!(seq, "eval result with no waiting caller"),
            },
            BridgeEvent::Diagnostic { app, seq, text } => {
                debug!(?app, ?seq, %text, "widget diagnostic");
                if let Some(tx) = locked(&self.diagnostics).get(&app) {
                    let _ = tx.send(Diagnostic { seq, text });
                }
            }
            BridgeEvent::Unknown => warn!("ignoring bridge event with an unrecognised type"),
        }
    }

    /// Called when the page goes away: pending evaluations fail and widgets
    /// must announce themselves again.
    pub fn disconnected(&self) {
        if self.commands.receiver_count() > 0 {
            return;
        }
        locked(&self.pending).clear();
        for ready in self.ready.values() {
            ready.send_replace(false);
        }
    }

    fn ready_receiver(&self, app: WidgetId) -> watch::Receiver<bool> {
        match self.ready.get(&app) {
            Some(sender) => sender.subscribe(),
            None => watch::channel(false).1,
        }
    }

    fn dispatch(&self, command: BridgeCommand) -> Result<(), RendererError> {
        self.commands
            .send(command)
            .map(|_| ())
            .map_err(|_| RendererError::Disconnected)
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }
}

pub struct BridgeRenderer {
    app: WidgetId,
    hub: Arc<RendererHub>,
    diagnostics: mpsc::UnboundedReceiver<Diagnostic>,
    ready: watch::Receiver<bool>,
    eval_timeout: Duration,
}

#[async_trait]
impl RendererAdapter for BridgeRenderer {
    async fn ready(&mut self) -> Result<(), RendererError> {
        self.ready
            .wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| RendererError::Disconnected)
    }

    async fn reset(&mut self) -> Result<(), RendererError> {
        self.hub.dispatch(BridgeCommand::Reset { app: self.app })
    }

    async fn eval_command(&mut self, command: &str) -> Result<EvalReceipt, RendererError> {
        let seq = self.hub.next_seq();
        let (tx, rx) = oneshot::channel();
        locked(&self.hub.pending).insert(seq, tx);

        let sent = self.hub.dispatch(BridgeCommand::Eval {
            app: self.app,
            seq,
            command: command.to_string(),
        });
        if let Err(err) = sent {
            locked(&self.hub.pending).remove(&seq);
            return Err(err);
        }

        match timeout(self.eval_timeout, rx).await {
            Ok(Ok(success)) => Ok(EvalReceipt { seq, success }),
            Ok(Err(_)) => Err(RendererError::Disconnected),
            Err(_) => {
                locked(&self.hub.pending).remove(&seq);
                Err(RendererError::Timeout)
            }
        }
    }

    async fn next_diagnostic(&mut self) -> Option<Diagnostic> {
        self.diagnostics.recv().await
    }

    fn try_diagnostic(&mut self) -> Option<Diagnostic> {
        self.diagnostics.try_recv().ok()
    }
}
