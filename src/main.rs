use chatdelta::client::ChatClient;
use chatdelta::constants::API_KEY_ENV;
use chatdelta::main_helper::{render_event, render_summary, Args};
use chatdelta::redaction_layer::RedactingWriter;
use chatdelta::session::Session;
use chatdelta::*;

use clap::Parser;
use std::io::Write;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    use tracing_subscriber::prelude::*;

    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => "chatdelta=info".into(),
    };

    let _ = std::fs::create_dir_all(&args.log_dir);
    let file_appender = tracing_appender::rolling::daily(&args.log_dir, "chatdelta.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // stdout carries the model output; diagnostics go to stderr and the file
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(move || RedactingWriter::new(non_blocking.clone()))
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::filter::LevelFilter::WARN),
        )
        .with(tracing_error::ErrorLayer::default())
        .init();

    chatdelta::logging::setup_panic_hook();

    let api_key = match std::env::var(API_KEY_ENV) {
        Ok(k) if !k.is_empty() => k,
        _ => {
            eprintln!("Error: {} environment variable is missing or empty.", API_KEY_ENV);
            eprintln!("Please set it in your .env file or environment.");
            std::process::exit(1);
        }
    };

    let client = match ChatClient::new(args.client_config(api_key)) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, cancelling stream");
            ctrl_c_cancel.cancel();
        }
    });

    let (tx, rx) = mpsc::channel::<EmittedEvent>(64);
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        let mut events = ReceiverStream::new(rx);
        while let Some(event) = events.next().await {
            let _ = write!(stdout, "{}", render_event(&event));
            let _ = stdout.flush();
        }
    });

    let request = {
        let mut request = client.request(args.messages());
        request.max_tokens = args.max_tokens;
        request
    };
    let mut session = Session::new(args.session_options());
    let result = client.stream_chat(&request, &mut session, &cancel, &tx).await;

    drop(tx);
    let _ = printer.await;
    println!();

    match result {
        Ok(summary) => {
            eprintln!("{}", render_summary(&summary));
        }
        Err(e) => {
            tracing::error!("Stream failed: {}", e);
            eprintln!("Error: {}", e.inner);
            std::process::exit(1);
        }
    }
}
