//! page-chat - ask a model about the page you are reading

mod panel;

use agent_host::{Coordinator, Dispatcher, GenerationRegistry, NotificationHub};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use panel::{Panel, PanelUpdate};
use providers::GeminiTransport;
use services::credential_store::default_storage_path;
use services::settings_store::{config_path, load_settings_or_default, save_settings};
use services::{FileCredentialStore, HtmlPageExtractor, PageSource};
use shared::agent_api::Request;
use shared::settings::CoordinatorSettings;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

#[derive(Parser)]
#[command(name = "page-chat")]
#[command(about = "Chat with a model about a web page")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the model name
    #[arg(long, global = true)]
    model: Option<String>,

    /// Override the API base URL
    #[arg(long, global = true)]
    api_base: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save the API key
    SetKey {
        key: String,
    },

    /// Print the saved API key
    ShowKey,

    /// Interactive chat about a page (Ctrl-C stops an answer, or quits at the prompt)
    Chat {
        /// Page to fetch
        #[arg(long, conflicts_with = "file")]
        url: Option<String>,

        /// Local HTML file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Ask a single question and exit
        #[arg(short, long)]
        message: Option<String>,
    },

    /// JSON-lines host: requests on stdin, responses and notifications on stdout
    Serve {
        #[arg(long, conflicts_with = "file")]
        url: Option<String>,

        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Write the effective settings to the config file
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings_path = cli.config.clone().or_else(config_path);
    let (mut settings, loaded) = load_settings_or_default(settings_path.as_deref());
    if loaded {
        tracing::debug!(path = ?settings_path, "loaded settings");
    }
    if let Some(model) = cli.model {
        settings.model = model;
    }
    if let Some(base) = cli.api_base {
        settings.api_base_url = base;
    }

    match cli.command {
        Commands::SetKey { key } => {
            let dispatcher = build_dispatcher(&settings, PageSource::None)?;
            let response = dispatcher
                .handle(Request::SaveApiKey { api_key: key })
                .await;
            match response {
                Some(r) if r.is_success() => println!("API key saved."),
                Some(r) => anyhow::bail!(r.error.unwrap_or_else(|| "Failed to save key".into())),
                None => {}
            }
        }
        Commands::ShowKey => {
            let dispatcher = build_dispatcher(&settings, PageSource::None)?;
            if let Some(r) = dispatcher.handle(Request::GetApiKey).await {
                if let Some(error) = r.error {
                    anyhow::bail!(error);
                }
                match r.api_key {
                    Some(key) => println!("{}", key),
                    None => println!("No API key saved."),
                }
            }
        }
        Commands::Chat { url, file, message } => {
            let dispatcher = build_dispatcher(&settings, page_source(url, file))?;
            run_chat(&dispatcher, message).await?;
        }
        Commands::Serve { url, file } => {
            let dispatcher = build_dispatcher(&settings, page_source(url, file))?;
            run_serve(dispatcher).await?;
        }
        Commands::InitConfig => {
            let path = settings_path.context("No config directory available")?;
            save_settings(&path, &settings)?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

fn page_source(url: Option<String>, file: Option<PathBuf>) -> PageSource {
    match (url, file) {
        (Some(url), _) => PageSource::Url(url),
        (None, Some(path)) => PageSource::File(path),
        (None, None) => PageSource::None,
    }
}

fn build_dispatcher(settings: &CoordinatorSettings, source: PageSource) -> Result<Dispatcher> {
    let storage = default_storage_path().unwrap_or_else(|| PathBuf::from("page_chat_storage.json"));
    let transport = GeminiTransport::new(settings)?;
    let coordinator = Coordinator::new(
        Arc::new(GenerationRegistry::new()),
        Arc::new(NotificationHub::new()),
        Arc::new(FileCredentialStore::new(storage)),
        Arc::new(HtmlPageExtractor::new(source, settings.max_page_chars)),
        Arc::new(transport),
    )
    .with_settings(settings);
    Ok(Dispatcher::new(coordinator))
}

async fn run_chat(dispatcher: &Dispatcher, one_shot: Option<String>) -> Result<()> {
    let mut panel = Panel::new();
    let hub = dispatcher.coordinator().hub().clone();
    let mut notifications = hub.subscribe(panel.instance_id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let interactive = one_shot.is_none();
    let mut pending = one_shot;

    loop {
        let text = match pending.take() {
            Some(text) => text,
            None if interactive => {
                print!("you> ");
                std::io::stdout().flush()?;
                // The stop handler below owns SIGINT once installed, so the
                // prompt listens for it too.
                match read_prompt(&mut lines, tokio::signal::ctrl_c()).await? {
                    Some(line) => line,
                    None => {
                        println!();
                        break;
                    }
                }
            }
            None => break,
        };

        let Some(request) = panel.send(&text) else {
            continue;
        };
        if let Some(response) = dispatcher.handle(request).await {
            panel.handle_response(&response);
        }

        while panel.is_streaming() {
            tokio::select! {
                received = notifications.recv() => {
                    let Some(notification) = received else { break };
                    render(panel.apply(&notification))?;
                }
                _ = tokio::signal::ctrl_c() => {
                    if let Some(stop) = panel.stop_request() {
                        if let Some(r) = dispatcher.handle(stop).await {
                            tracing::debug!(?r, "stop requested");
                        }
                    }
                }
            }
        }

        if let Some(error) = panel.last_error() {
            tracing::warn!(error, "generation failed");
        }
    }

    hub.unsubscribe(panel.instance_id());
    Ok(())
}

/// Next input line; `None` at end of input or once `interrupt` fires.
async fn read_prompt<R, F>(lines: &mut Lines<R>, interrupt: F) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    F: Future,
{
    tokio::select! {
        biased;
        _ = interrupt => Ok(None),
        line = lines.next_line() => Ok(line?),
    }
}

fn render(update: PanelUpdate) -> Result<()> {
    let mut out = std::io::stdout();
    match update {
        PanelUpdate::Ignored => {}
        PanelUpdate::Opened => write!(out, "model> ")?,
        PanelUpdate::Appended(text) => write!(out, "{}", text)?,
        PanelUpdate::Finalized { note: Some(note) } => writeln!(out, "\n{}", note)?,
        PanelUpdate::Finalized { note: None } => writeln!(out)?,
        PanelUpdate::Note(note) => writeln!(out, "{}", note)?,
    }
    out.flush()?;
    Ok(())
}

async fn run_serve(dispatcher: Dispatcher) -> Result<()> {
    let mut all = dispatcher.coordinator().hub().subscribe_all();
    let forwarder = tokio::spawn(async move {
        while let Some(notification) = all.recv().await {
            match serde_json::to_string(&notification) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!(error = %e, "failed to encode notification"),
            }
        }
    });

    tracing::info!("serving JSON requests on stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match dispatcher.handle_json(&line).await {
            Ok(Some(response)) => println!("{}", response),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "rejected request"),
        }
    }

    // Running generations hold the hub; the forwarder ends once they finish.
    drop(dispatcher);
    let _ = forwarder.await;
    Ok(())
}
