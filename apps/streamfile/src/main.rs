//! streamfile entry point: the transfer server and its command-line client.

mod cli;
mod config;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use streamfile_rpc::{RpcClient, RpcServer, RpcServerConfig};
use streamfile_transfer::token::{bearer_headers, generate_token};
use streamfile_transfer::{
    DirectoryHooks, FileTransferService, Progress, TransferClient, TransferOptions,
    TransferOutcome,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::{Args, Command, DEFAULT_SERVER_ADDR, USAGE};
use config::ServerConfig;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,streamfile=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {e}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    match &args.command {
        Command::Help => println!("{USAGE}"),
        Command::Token => println!("{}", generate_token()),
        Command::Serve => serve(&args).await?,
        Command::Info => {
            let info = client(&args)?
                .info()
                .await
                .context("info call failed")?;
            println!("{} {} - {}", info.name, info.version, info.description);
        }
        Command::Upload { identifier, file } => {
            let (opts, progress) = transfer_options(&args);
            let outcome = client(&args)?.upload(identifier, file, &opts).await;
            progress.abort();
            report(identifier, file, outcome?);
        }
        Command::Download { identifier, file } => {
            let (opts, progress) = transfer_options(&args);
            let outcome = client(&args)?.download(identifier, file, &opts).await;
            progress.abort();
            report(identifier, file, outcome?);
        }
    }
    Ok(())
}

async fn serve(args: &Args) -> anyhow::Result<()> {
    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(addr) = &args.addr {
        config.listen = addr
            .parse()
            .with_context(|| format!("invalid listen address '{addr}'"))?;
    }
    if let Some(token) = &args.token {
        config.auth_token = Some(token.clone());
    }

    std::fs::create_dir_all(&config.storage_root).with_context(|| {
        format!("cannot create storage root {}", config.storage_root.display())
    })?;
    let mut hooks = DirectoryHooks::new(&config.storage_root);
    match &config.auth_token {
        Some(token) => hooks = hooks.with_token(token.clone()),
        None => tracing::warn!("no auth token configured, every client is accepted"),
    }
    tracing::info!(
        name = %config.name,
        root = %config.storage_root.display(),
        chunk_size = config.chunk_size,
        "starting streamfile server"
    );

    let service = FileTransferService::new(hooks, config.service_info())
        .with_config(config.service_config());
    let server = RpcServer::new(RpcServerConfig { addr: config.listen }, service);
    let listener = server.listen().await?;

    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve(listener).await })
    };
    tokio::select! {
        result = serving => result??,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
            server.shutdown();
        }
    }

    tracing::info!("server shut down cleanly");
    Ok(())
}

fn client(args: &Args) -> anyhow::Result<TransferClient<RpcClient>> {
    let addr = args.addr.as_deref().unwrap_or(DEFAULT_SERVER_ADDR);
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid server address '{addr}'"))?;
    let mut rpc = RpcClient::new(addr);
    if let Some(token) = &args.token {
        rpc = rpc.with_headers(bearer_headers(token));
    }
    Ok(TransferClient::new(rpc))
}

/// Builds the transfer options and spawns the progress printer. Ctrl-C
/// cancels the transfer.
fn transfer_options(args: &Args) -> (TransferOptions, tokio::task::JoinHandle<()>) {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let (tx, rx) = mpsc::channel(64);
    let printer = tokio::spawn(print_progress(rx));
    let opts = TransferOptions::new()
        .verify(args.verify)
        .cancel_token(cancel)
        .progress(tx);
    (opts, printer)
}

async fn print_progress(mut rx: mpsc::Receiver<Progress>) {
    let mut last_step = None;
    while let Some(progress) = rx.recv().await {
        match progress.percentage() {
            Some(pct) => {
                let step = (pct / 10.0) as u32;
                if last_step != Some(step) {
                    last_step = Some(step);
                    eprintln!("{}: {pct:.0}%", progress.identifier);
                }
            }
            None => {
                tracing::trace!(
                    identifier = %progress.identifier,
                    bytes = progress.transferred,
                    "progress"
                );
            }
        }
    }
}

fn report(identifier: &str, file: &Path, outcome: TransferOutcome) {
    match outcome.digest {
        Some(digest) => println!("{identifier} {} md5:{digest}", file.display()),
        None => println!("{identifier} {}", file.display()),
    }
}
