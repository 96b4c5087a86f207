use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{Html, IntoResponse},
    routing::get,
    serve, Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::bridge::{BridgeEvent, RendererHub};

const TEMPLATE_DIR: &str = "templates";
const STATIC_DIR: &str = "static";

// Shared application state
#[derive(Clone)]
struct AppState {
    templates: Arc<AutoReloader>,
    // Fans bridge commands out to connected pages and routes their events back
    hub: Arc<RendererHub>,
}

// Minijinja Environment setup
fn create_minijinja_env() -> AutoReloader {
    // Use AutoReloader so template edits show up without a restart
    AutoReloader::new(|notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(TEMPLATE_DIR));
        notifier.watch_path(TEMPLATE_DIR, true);
        Ok(env)
    })
}

async fn index_handler(State(state): State<AppState>) -> Result<Html<String>, Html<String>> {
    state
        .templates
        .acquire_env()
        .and_then(|env| {
            env.get_template("index.html").and_then(|tmpl| {
                tmpl.render(minijinja::context! {
                    title => "GeoPrompt",
                    bridge_path => "/bridge",
                })
            })
        })
        .map(Html)
        .map_err(|e| {
            error!("Failed to get or render template: {}", e);
            Html(format!("Internal Server Error: {}", e))
        })
}

async fn bridge_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("bridge connection upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

/// Relays hub commands to the page and page events back to the hub until
/// either side goes away.
async fn handle_socket(socket: WebSocket, hub: Arc<RendererHub>) {
    info!("page connected to bridge");
    let mut commands = hub.subscribe();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            // Command from a bridge renderer, forwarded to the page
            command = commands.recv() => {
                let command = match command {
                    Ok(command) => command,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "page fell behind the command stream");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                match serde_json::to_string(&command) {
                    Ok(json) => {
                        if sink.send(Message::Text(json)).await.is_err() {
                            warn!("bridge send failed, closing connection");
                            break;
                        }
                    }
                    Err(e) => error!("Failed to serialize bridge command: {}", e),
                }
            }

            // Event from the page (ready, eval_result, diagnostic)
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<BridgeEvent>(&text) {
                        Ok(event) => hub.handle_event(event),
                        Err(e) => warn!(%e, "dropping malformed bridge event"),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        info!("page closed the bridge");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => warn!("unexpected binary frame from page"),
                    Some(Ok(_)) => debug!("control frame from page"),
                    Some(Err(e)) => {
                        warn!(%e, "bridge read failed");
                        break;
                    }
                }
            }
        }
    }

    // Unsubscribe first so `disconnected` sees whether another page is still attached
    drop(commands);
    hub.disconnected();
    info!("bridge connection closed");
}

/// Host page at `/`, the widget bridge at `/bridge`, page assets under `/static`.
pub fn router(hub: Arc<RendererHub>) -> Router {
    let state = AppState {
        templates: Arc::new(create_minijinja_env()),
        hub,
    };

    Router::new()
        .route("/", get(index_handler))
        .route("/bridge", get(bridge_handler))
        // Static files live under /static so they cannot shadow the routes above
        .nest_service("/static", ServeDir::new(STATIC_DIR))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_web_server(port: u16, hub: Arc<RendererHub>) -> Result<()> {
    let app = router(hub);

    // Loopback only: the page drives the user's widgets
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
