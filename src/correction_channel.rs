use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, instrument, warn};

use crate::llm_interaction::TransportError;

/// Messages the chat sends to the correction backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Query {
        query: String,
    },
    CommandResult {
        command: String,
        llm_response: String,
        success: bool,
        error: String,
        regenerate_full: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_block_id: Option<String>,
    },
}

/// Events pushed by the correction backend. Unrecognised tags parse as `Unknown`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    CommandCorrection {
        original: String,
        corrected: String,
        #[serde(default)]
        error: String,
    },
    FullCorrection {
        content: String,
        #[serde(default)]
        commands: Vec<String>,
        #[serde(default, rename = "errorBlockId", skip_serializing_if = "Option::is_none")]
        error_block_id: Option<String>,
    },
    Confirmation {
        #[serde(default)]
        message: String,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

/// Sending half of the persistent correction channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CorrectionChannel {
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    // Set by either socket task once the connection is gone.
    closed: Arc<AtomicBool>,
}

impl CorrectionChannel {
    /// Wraps an existing queue; whoever owns the receiver delivers the messages.
    pub fn new(outbound: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self {
            outbound,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Opens the WebSocket and spawns one task per socket half. Inbound events
    /// arrive on the returned receiver until the socket closes.
    #[instrument]
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<InboundEvent>), TransportError> {
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|err| TransportError::Connectivity(err.to_string()))?;
        info!("correction channel connected");
        let (mut sink, mut stream) = socket.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutboundMessage>();
        let channel = Self::new(out_tx);

        // Writer: drains the outbound queue into the socket.
        let writer_closed = channel.closed.clone();
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(err) => {
                        warn!(%err, "failed to serialize outbound message");
                        continue;
                    }
                };
                debug!(%json, "sending on correction channel");
                if sink.send(WsMessage::Text(json.into())).await.is_err() {
                    warn!("correction channel send failed, closing writer");
                    writer_closed.store(true, Ordering::SeqCst);
                    break;
                }
            }
        });

        // Reader: parses pushed events until the server goes away.
        let (in_tx, in_rx) = mpsc::unbounded_channel::<InboundEvent>();
        let reader_closed = channel.closed.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<InboundEvent>(&text) {
                        Ok(event) => {
                            if in_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(%err, "dropping malformed correction event"),
                    },
                    Ok(WsMessage::Close(_)) => {
                        info!("correction channel closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%err, "correction channel read failed");
                        break;
                    }
                }
            }
            // Marked before `in_tx` drops, so a drained receiver implies `!is_open()`.
            reader_closed.store(true, Ordering::SeqCst);
        });

        Ok((channel, in_rx))
    }

    pub fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        self.outbound
            .send(message)
            .map_err(|_| TransportError::ChannelClosed)
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_full_correction_with_block_id() {
        let event: InboundEvent = serde_json::from_value(json!({
            "type": "full_correction",
            "content": "fixed\n```\nA(0,0)\n```",
            "commands": ["A(0,0)"],
            "original_command": "A(0,0",
            "errorBlockId": "abc"
        }))
        .unwrap();
        assert_eq!(
            event,
            InboundEvent::FullCorrection {
                content: "fixed\n```\nA(0,0)\n```".to_string(),
                commands: vec!["A(0,0)".to_string()],
                error_block_id: Some("abc".to_string()),
            }
        );
    }

    #[test]
    fn test_parses_command_correction() {
        let event: InboundEvent = serde_json::from_str(
            r#"{"type":"command_correction","original":"Circl(A,2)","corrected":"Circle(A,2)","error":"Unknown command"}"#,
        )
        .unwrap();
        assert!(matches!(event, InboundEvent::CommandCorrection { ref corrected, .. } if corrected == "Circle(A,2)"));
    }

    #[test]
    fn test_unknown_tag_falls_back() {
        let event: InboundEvent =
            serde_json::from_str(r#"{"type":"progress","percent":40}"#).unwrap();
        assert_eq!(event, InboundEvent::Unknown);
    }

    #[test]
    fn test_command_result_wire_shape() {
        let message = OutboundMessage::CommandResult {
            command: "X=".to_string(),
            llm_response: "```\nX=\n```".to_string(),
            success: false,
            error: "Unknown command X".to_string(),
            regenerate_full: true,
            error_block_id: None,
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "type": "command_result",
                "command": "X=",
                "llm_response": "```\nX=\n```",
                "success": false,
                "error": "Unknown command X",
                "regenerate_full": true
            })
        );
    }

    #[test]
    fn test_send_after_receiver_dropped_reports_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = CorrectionChannel::new(tx);
        assert!(channel.is_open());
        drop(rx);
        assert!(!channel.is_open());
        assert!(matches!(
            channel.send(OutboundMessage::Query { query: "q".into() }),
            Err(TransportError::ChannelClosed)
        ));
    }
}
