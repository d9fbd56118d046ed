//! booktimer: reading-time tracker runtime binary.
//! One daemon process holds every tab actor; the other subcommands are
//! thin JSON-RPC clients.

use clap::Parser;

mod actor;
mod catalog;
mod cli;
mod client;
mod clock;
mod cmd_stats;
mod cmd_store;
mod engine;
mod ledger_service;
mod live;
mod poll_loop;
mod server;
mod sites;
mod store;
mod tab_queue;
mod tab_source;
#[cfg(test)]
mod testkit;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match args.command {
        cli::Command::Daemon(opts) => {
            let filter = std::env::var("BOOKTIMER_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("booktimer daemon starting");
            poll_loop::run_daemon(opts, &socket_path).await?;
        }
        cli::Command::Stats { json } => cmd_stats::cmd_stats(&socket_path, json).await?,
        cli::Command::Watch => cmd_stats::cmd_watch(&socket_path).await?,
        cli::Command::Export { output } => {
            cmd_store::cmd_export(&socket_path, output.as_deref()).await?;
        }
        cli::Command::Import { input } => cmd_store::cmd_import(&socket_path, &input).await?,
        cli::Command::Sites => cmd_store::cmd_sites(&socket_path).await?,
        cli::Command::SiteEnable { domain, off } => {
            cmd_store::cmd_site_enable(&socket_path, &domain, !off).await?;
        }
        cli::Command::Settings { set } => {
            cmd_store::cmd_settings(&socket_path, set.as_deref()).await?;
        }
        cli::Command::ResetToday => cmd_store::cmd_reset(&socket_path, false).await?,
        cli::Command::ResetAll => cmd_store::cmd_reset(&socket_path, true).await?,
        cli::Command::Dump => cmd_store::cmd_dump(&socket_path).await?,
        cli::Command::Call { method, params } => {
            cmd_store::cmd_call(&socket_path, &method, params.as_deref()).await?;
        }
    }

    Ok(())
}
