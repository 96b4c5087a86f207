use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use geoprompt::bridge::{RendererHub, WidgetId};
use geoprompt::constants::{self, MODEL_OPTIONS};
use geoprompt::controller::{ControllerConfig, ControllerError, FeedbackController, TurnOutcome};
use geoprompt::correction_channel::{CorrectionChannel, InboundEvent};
use geoprompt::extractor::extract_commands;
use geoprompt::feedback::{FeedbackRequester, RequestResponseFeedback, StreamingFeedback};
use geoprompt::llm_interaction::{HttpModelClient, ModelClient, TransportError};
use geoprompt::search::{SearchClient, DEFAULT_TOP_K};
use geoprompt::{web_server, Conversation, Role};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Serve the widget page and chat with the model on stdin.
    Start {
        #[arg(long, default_value_t = 9900, help = "Port for the widget page.")]
        port: u16,
        #[arg(long, value_parser = parse_model, help = "Model id (see `geoprompt models`).")]
        model: Option<String>,
        #[arg(long, help = "Receive corrections over the backend's push channel.")]
        stream: bool,
    },
    /// Look up commands similar to a description.
    Search {
        query: String,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },
    /// Print the commands of the last fenced block read from stdin.
    Extract,
    /// List the supported model ids.
    Models,
}

fn parse_model(raw: &str) -> Result<String, String> {
    if constants::is_known_model(raw) {
        Ok(raw.to_string())
    } else {
        let known: Vec<&str> = MODEL_OPTIONS.iter().map(|(id, _)| *id).collect();
        Err(format!("unknown model '{}', expected one of: {}", raw, known.join(", ")))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { port, model, stream } => start(port, model, stream).await?,
        Commands::Search { query, top_k } => {
            let results = SearchClient::new(constants::BACKEND_URL.as_str())
                .search(&query, top_k)
                .await
                .context("Search request failed")?;
            if results.is_empty() {
                println!("No results.");
            }
            for result in results {
                println!("{:>5.1}%  {}", result.similarity, result.command);
                if let Some(syntax) = result.syntax {
                    println!("        {}", syntax);
                }
            }
        }
        Commands::Extract => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read stdin")?;
            for command in extract_commands(&input) {
                println!("{}", command);
            }
        }
        Commands::Models => {
            for (id, name) in MODEL_OPTIONS {
                println!("{:<16}{}", id, name);
            }
        }
    }

    Ok(())
}

async fn start(port: u16, model: Option<String>, stream: bool) -> Result<()> {
    // The hub is shared by the web server (page side) and the bridge renderers (controller side)
    let hub = RendererHub::new();
    let server_hub = hub.clone();
    // Start the web server in a separate asynchronous task
    let mut web_server_handle = tokio::spawn(async move {
        if let Err(e) = web_server::start_web_server(port, server_hub).await {
            error!("Web server failed: {:?}", e);
        }
    });

    let config = ControllerConfig {
        model: model.unwrap_or_else(|| constants::DEFAULT_MODEL.clone()),
        ..ControllerConfig::default()
    };
    info!(model = %config.model, stream, "starting chat");

    let model_client: Arc<dyn ModelClient> =
        Arc::new(HttpModelClient::new(constants::BACKEND_URL.as_str()));
    // With --stream, corrections arrive on `inbound` instead of as a second model call
    let mut inbound = None;
    let feedback: Box<dyn FeedbackRequester> = if stream {
        let (channel, events) = CorrectionChannel::connect(&constants::BACKEND_WS_URL)
            .await
            .context("Failed to open the correction channel")?;
        inbound = Some(events);
        Box::new(StreamingFeedback::new(channel))
    } else {
        Box::new(RequestResponseFeedback::new(model_client.clone(), config.model.clone()))
    };

    // One renderer per widget on the page: `live` is what the user sees, `sandbox` is hidden
    let live = hub.renderer(WidgetId::Live, *constants::EVAL_TIMEOUT);
    let sandbox = hub.renderer(WidgetId::Sandbox, *constants::EVAL_TIMEOUT);
    let mut controller =
        FeedbackController::new(config, model_client, feedback, Box::new(live), Box::new(sandbox));

    println!("Open http://127.0.0.1:{}/ in a browser to load the widgets.", port);
    // Nothing can be validated until the page has loaded both widgets
    tokio::select! {
        ready = controller.wait_until_ready() => ready.context("Widgets never became ready")?,
        _ = tokio::signal::ctrl_c() => return Ok(()),
    }
    println!("Widgets ready. Type a request, /errors to list command errors, or /reset to start over.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shown: Vec<String> = Vec::new();

    // Main loop: user input, pushed corrections, their deadline, server exit and Ctrl+C
    loop {
        let deadline = controller.correction_deadline();
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else { break };
                if line.trim() == "/errors" {
                    print_error_log(&controller);
                    continue;
                }
                if line.trim() == "/reset" {
                    match controller.reset_conversation().await {
                        Ok(()) => shown.clear(),
                        Err(err) => println!("! {}", err),
                    }
                    continue;
                }
                match controller.submit(&line).await {
                    Ok(TurnOutcome::AwaitingCorrection { .. }) if stream && inbound.is_none() => {
                        // The push channel is already gone; no correction can arrive.
                        if let Some(outcome) = controller.fail_pending(TransportError::ChannelClosed) {
                            report(&outcome);
                        }
                    }
                    Ok(outcome) => report(&outcome),
                    Err(ControllerError::EmptyInput) => continue,
                    Err(err) => println!("! {}", err),
                }
                print_changes(controller.conversation(), &mut shown);
            }
            event = next_event(&mut inbound) => {
                let outcome = match event {
                    Some(event) => controller.handle_event(event).await,
                    None => {
                        warn!("correction channel closed");
                        inbound = None;
                        controller.fail_pending(TransportError::ChannelClosed)
                    }
                };
                if let Some(outcome) = outcome {
                    report(&outcome);
                    print_changes(controller.conversation(), &mut shown);
                }
            }
            _ = sleep_until(deadline) => {
                warn!("no correction arrived in time");
                let timed_out = TransportError::Connectivity("timed out waiting for a correction".to_string());
                if let Some(outcome) = controller.fail_pending(timed_out) {
                    report(&outcome);
                    print_changes(controller.conversation(), &mut shown);
                }
            }
            _ = &mut web_server_handle => {
                error!("Web server task finished unexpectedly.");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down.");
                break;
            }
        }
    }

    Ok(())
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_event(inbound: &mut Option<mpsc::UnboundedReceiver<InboundEvent>>) -> Option<InboundEvent> {
    match inbound {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

fn report(outcome: &TurnOutcome) {
    match outcome {
        TurnOutcome::Applied { rejected, .. } if !rejected.is_empty() => {
            warn!(?rejected, "live renderer refused validated commands");
        }
        TurnOutcome::AwaitingCorrection { attempt } => info!(attempt, "waiting for pushed correction"),
        _ => {}
    }
}

fn print_error_log(controller: &FeedbackController) {
    let log = controller.error_log();
    if log.is_empty() {
        println!("No command errors this session.");
        return;
    }
    for record in log.records() {
        let status = if record.is_resolved { "resolved" } else { "unresolved" };
        println!(
            "[{}] {} {}\n{}",
            status,
            record.created_at.format("%H:%M:%S"),
            record.id,
            record.error_text
        );
    }
}

/// Prints conversation entries that are new or were rewritten since last time.
fn print_changes(conversation: &Conversation, shown: &mut Vec<String>) {
    for (index, message) in conversation.messages().iter().enumerate() {
        if shown.get(index) == Some(&message.text) {
            continue;
        }
        let label = match message.role {
            Role::User => "you",
            Role::Assistant if message.is_regenerated => "assistant (regenerated)",
            Role::Assistant => "assistant",
            Role::System => "notice",
        };
        println!("[{}] {}", label, message.text);
        if index < shown.len() {
            shown[index] = message.text.clone();
        } else {
            shown.push(message.text.clone());
        }
    }
    shown.truncate(conversation.len());
}
