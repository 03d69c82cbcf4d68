//! Keystone CLI
//!
//! Opens one session and bridges it to this terminal's stdin/stdout.
//! Credential prompts are answered with the next stdin line (empty cancels).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use keystone_lib::config::{hosts_file, ConfigStorage, JsonHostStore};
use keystone_lib::credential::CredentialPromptEvent;
use keystone_lib::{init_logging, CreateSessionRequest, SessionBroker};

/// Keystone - terminal session broker
#[derive(Parser, Debug)]
#[command(name = "keystone")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config.json
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to hosts.json
    #[arg(long, value_name = "FILE")]
    hosts: Option<PathBuf>,

    /// Saved host to connect to; opens a local shell when omitted
    #[arg(long, value_name = "ID")]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("keystone: {}", message);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let storage = match cli.config {
        Some(path) => ConfigStorage::with_path(path),
        None => ConfigStorage::new().map_err(|e| e.to_string())?,
    };
    let config = storage.load().await.map_err(|e| e.to_string())?;

    let filter = if cli.verbose {
        Some("debug")
    } else {
        config.log_filter.as_deref()
    };
    init_logging(filter);
    tracing::debug!("Loaded config from {:?}", storage.path());

    let hosts_path = match cli.hosts {
        Some(path) => path,
        None => hosts_file().map_err(|e| e.to_string())?,
    };
    let hosts = JsonHostStore::open(hosts_path)
        .await
        .map_err(|e| e.to_string())?;

    let broker = Arc::new(
        SessionBroker::builder()
            .config(config)
            .hosts(Arc::new(hosts))
            .build(),
    );

    let (prompt_tx, mut prompt_rx) = mpsc::unbounded_channel::<CredentialPromptEvent>();
    let _prompts = broker.on_credential_prompt(move |event| {
        let _ = prompt_tx.send(event.clone());
    });
    let _status = broker.on_session_status(|event| {
        tracing::info!("{} -> {}", event.request_id, event.step);
    });

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    let request = match cli.host {
        Some(host_id) => CreateSessionRequest::remote(host_id),
        None => CreateSessionRequest::local(),
    };
    let creating = {
        let broker = broker.clone();
        tokio::spawn(async move { broker.create_session(request).await })
    };
    tokio::pin!(creating);

    let response = loop {
        tokio::select! {
            result = &mut creating => {
                break result.map_err(|e| format!("creation task failed: {}", e))?;
            }
            Some(prompt) = prompt_rx.recv() => {
                eprint!("{} ", prompt.prompt_label);
                let line = stdin.next_line().await.map_err(|e| e.to_string())?;
                let secret = line.filter(|l| !l.is_empty());
                broker.respond_to_credential_prompt(&prompt.request_id, secret);
            }
        }
    };

    let session_id = match response.session_id {
        Some(id) if response.ok => id,
        _ => return Err(response.error.unwrap_or_else(|| "session creation failed".into())),
    };

    let (data_sub, mut data_rx) = broker.session_data_channel(&session_id);
    let pump = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(chunk) = data_rx.recv().await {
            if stdout.write_all(&chunk).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    while let Some(mut line) = stdin.next_line().await.map_err(|e| e.to_string())? {
        line.push('\n');
        broker.write_to_session(&session_id, line.as_bytes()).await;
    }

    data_sub.unsubscribe();
    broker.shutdown().await;
    pump.abort();
    Ok(())
}
