//! Parley Terminal Client
//!
//! Connects the microphone and a realtime session to the terminal: typed
//! lines become commands or messages, and the transcript is printed as
//! it streams. Credentials and tools go through the Parley API proxy.

mod audio;
mod commands;
mod console;
mod image;

use anyhow::Context;
use audio::CpalMicrophone;
use clap::Parser;
use commands::Input;
use console::ConsoleSink;
use parley_core::{
    Command, SessionConfig, SessionController, SessionPolicy,
    lifecycle::{DEFAULT_VOICE, SessionServices},
    proxy::ProxyClient,
    transport::MediaSource,
};
use parley_realtime::{DEFAULT_REALTIME_MODEL, DEFAULT_REALTIME_URL, WebSocketTransport};
use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Talk to the Parley voice assistant")]
struct Args {
    /// Base URL of the Parley API proxy.
    #[arg(long, env = "PARLEY_SERVER", default_value = "http://localhost:3000")]
    server: String,

    #[arg(long, env = "PARLEY_VOICE", default_value = DEFAULT_VOICE)]
    voice: String,

    /// Overrides the instructions configured on the proxy.
    #[arg(long)]
    instructions: Option<String>,

    #[arg(long, env = "REALTIME_URL", default_value = DEFAULT_REALTIME_URL)]
    realtime_url: String,

    #[arg(long, env = "REALTIME_MODEL", default_value = DEFAULT_REALTIME_MODEL)]
    model: String,

    /// Run without a microphone; only typed messages reach the assistant.
    #[arg(long)]
    no_mic: bool,

    /// Connect as soon as the client starts.
    #[arg(long)]
    connect: bool,

    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log_level))
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let proxy = Arc::new(ProxyClient::new(args.server.clone()));
    let media: Option<Arc<dyn MediaSource>> = if args.no_mic {
        None
    } else {
        Some(Arc::new(CpalMicrophone))
    };
    let services = SessionServices {
        credentials: proxy.clone(),
        media,
        transport: Arc::new(WebSocketTransport::new(
            args.realtime_url.clone(),
            args.model.clone(),
        )),
        tools: proxy.clone(),
    };
    let config = SessionConfig {
        voice: args.voice.clone(),
        instructions: args.instructions.clone(),
    };
    let controller = SessionController::new(
        config,
        SessionPolicy::default(),
        services,
        Box::new(ConsoleSink::new(std::io::stdout())),
    );

    let (commands_tx, commands_rx) = mpsc::channel(32);
    let controller_task = tokio::spawn(controller.run(commands_rx));
    info!(server = %args.server, voice = %args.voice, "Client started");
    println!("{}", commands::HELP);

    if args.connect {
        commands_tx.send(Command::Connect).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read from stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        let command = match commands::parse(&line) {
            Ok(None) => continue,
            Ok(Some(Input::Session(command))) => command,
            Ok(Some(Input::Fetch(filename))) => match proxy.fetch_file(&filename).await {
                Ok(content) => Command::Note(format!("{filename}:\n{content}")),
                Err(err) => Command::Note(format!("Could not fetch {filename}: {err}")),
            },
            Ok(Some(Input::Image(path))) => image::share_image(&path).await,
            Ok(Some(Input::Help)) => {
                println!("{}", commands::HELP);
                continue;
            }
            Ok(Some(Input::Quit)) => break,
            Err(err) => {
                eprintln!("{err}");
                continue;
            }
        };
        if commands_tx.send(command).await.is_err() {
            break;
        }
    }

    let _ = commands_tx.send(Command::Shutdown).await;
    controller_task
        .await
        .context("Session controller task failed")?;
    Ok(())
}
