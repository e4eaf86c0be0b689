use anyhow::{Context, Result, anyhow};
use bitsend::{BitSend, DEFAULT_BASE_URL, Settings, UploadProgress};
use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use iocraft::prelude::*;
use std::{
    io::{self, IsTerminal, Write},
    path::{Path, PathBuf},
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::{
    config::ConfigFile,
    ui::{ConfigHeader, ErrorMessage, InputPrompt, ProgressBar, SuccessMessage},
};

mod config;
mod ui;

#[derive(Parser)]
#[command(name = "bitsend")]
#[command(version)]
#[command(about = "A tool for uploading files to BitSend")]
struct Cli {
    /// Log request headers and raw responses
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file
    Upload {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
        /// File name sent to the server, defaults to the name of FILE
        #[arg(short, long)]
        name: Option<String>,
        /// Request timeout, e.g. 30s or 5m
        #[arg(short, long)]
        timeout: Option<humantime::Duration>,
        /// Do not render a progress bar
        #[arg(short, long)]
        quiet: bool,
    },
    /// Configure bitsend interactively
    Config,
}

fn main() -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let _rt_guard = rt.enter();
    clap_complete::CompleteEnv::with_factory(Cli::command).complete();
    let cli = Cli::parse();
    init_tracing(cli.debug);

    rt.block_on(async {
        match cli.command {
            Commands::Config => interactive_config(),
            Commands::Upload {
                file,
                name,
                timeout,
                quiet,
            } => {
                let mut config = config::read_config()?;
                if let Some(timeout) = timeout {
                    config.timeout = Some(timeout.into());
                }
                let quiet = quiet || !io::stdout().is_terminal();
                upload_file(config.settings(cli.debug), &file, name, quiet).await
            }
        }
    })
}

fn init_tracing(debug: bool) {
    let default_directive = if debug { "bitsend=info" } else { "bitsend=warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn upload_file(
    settings: Settings,
    path: &Path,
    name: Option<String>,
    quiet: bool,
) -> Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let file_size = file
        .metadata()
        .await
        .context("Failed to get file metadata")?
        .len();

    let name = match name {
        Some(name) => name,
        None => path
            .file_name()
            .ok_or_else(|| anyhow!("{} has no file name", path.display()))?
            .to_string_lossy()
            .into_owned(),
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let mut bitsend = BitSend::new(settings)?.with_cancellation(cancel);

    if quiet {
        bitsend
            .do_upload(&name, file_size, file)
            .await
            .context("upload returns error")?;
    } else {
        let (progress_tx, mut progress_rx) = mpsc::channel::<UploadProgress>(64);
        bitsend = bitsend.with_progress(progress_tx);
        let (tx, rx) = watch::channel(0.0);

        let process_upload = async {
            let upload = bitsend.do_upload(&name, file_size, file);
            tokio::pin!(upload);

            loop {
                tokio::select! {
                    biased;
                    result = &mut upload => break result,
                    Some(progress) = progress_rx.recv() => {
                        let _ = tx.send(progress_percent(progress));
                    }
                }
            }
        };
        tokio::pin!(process_upload);

        let mut progress_bar =
            element!(ProgressBar(title: format!("Uploading {}", name), progress: Some(rx)));

        let result = tokio::select! {
            result = &mut process_upload => result,
            _ = progress_bar.render_loop() => (&mut process_upload).await,
        };
        result.context("upload returns error")?;
    }

    bitsend.post_upload()?.print();

    Ok(())
}

fn progress_percent(progress: UploadProgress) -> f32 {
    if progress.total_bytes == 0 {
        return 0.0;
    }
    (progress.bytes_sent as f32 / progress.total_bytes as f32) * 100.0
}

fn read_input(prompt: &str, default: Option<&str>, description: Option<&str>) -> Result<String> {
    element! {
        InputPrompt(
            prompt: prompt.to_string(),
            default: default.map(|s| s.to_string()),
            description: description.map(|s| s.to_string())
        )
    }
    .print();

    print!("> ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim().to_string();

    match default {
        Some(def) if input.is_empty() => Ok(def.to_string()),
        _ => Ok(input),
    }
}

fn print_error(message: String) {
    element!(ErrorMessage(message: message)).print();
    println!();
}

fn interactive_config() -> Result<()> {
    element!(ConfigHeader()).print();

    let base_url = loop {
        let base_url_str = read_input(
            "BitSend Base URL",
            Some(DEFAULT_BASE_URL),
            Some("Used for the referer header and download links"),
        )?;

        match Url::parse(&base_url_str) {
            Ok(url) => break url,
            Err(e) => print_error(format!("Invalid URL: {}", e)),
        }
    };

    let upload_url = loop {
        let upload_url_str = read_input(
            "Upload URL",
            None,
            Some("Optional: override the upload endpoint (defaults to <base URL>/jqu/)"),
        )?;
        if upload_url_str.is_empty() {
            break None;
        }

        match Url::parse(&upload_url_str) {
            Ok(url) => break Some(url),
            Err(e) => print_error(format!("Invalid URL: {}", e)),
        }
    };

    let timeout = loop {
        let timeout_str = read_input(
            "Timeout",
            None,
            Some("Optional: request timeout such as 30s or 5m, empty for none"),
        )?;
        if timeout_str.is_empty() {
            break None;
        }

        match humantime::parse_duration(&timeout_str) {
            Ok(_) => break Some(timeout_str),
            Err(e) => print_error(format!("Invalid timeout: {}", e)),
        }
    };

    let config_file = ConfigFile {
        base_url: Some(base_url),
        upload_url,
        timeout,
        chunk_size: None,
    };
    let path = config::write_config(&config_file)?;

    element!(SuccessMessage(message: format!("Configuration written to {}", path.display())))
        .print();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent_uses_whole_body() {
        // An empty file still has framing to send before the bar is full.
        let preamble_only = UploadProgress {
            bytes_sent: 180,
            total_bytes: 240,
        };
        assert_eq!(progress_percent(preamble_only), 75.0);

        let done = UploadProgress {
            bytes_sent: 240,
            total_bytes: 240,
        };
        assert_eq!(progress_percent(done), 100.0);
        assert_eq!(progress_percent(UploadProgress::default()), 0.0);
    }
}
