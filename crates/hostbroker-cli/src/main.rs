mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let remote = cli.remote;
    let token = cli.token;
    let config = cli.config;

    match cli.command {
        Command::Serve { bind, port } => {
            if remote.is_some() {
                anyhow::bail!("serve does not support --remote; it starts the server itself");
            }
            commands::serve(config, bind, port).await
        }
        Command::PutTemplate { path } => commands::put_template(remote, token, config, path).await,
        Command::Templates => commands::list_templates(remote, token, config).await,
        Command::RequestMachines { template_id, count, dry_run } => {
            commands::request_machines(remote, token, config, template_id, count, dry_run).await
        }
        Command::ReturnMachines { machine_ids } => {
            commands::return_machines(remote, token, config, machine_ids).await
        }
        Command::Status { request_ids } => commands::status(remote, token, config, request_ids).await,
        Command::Requests => commands::list_requests(remote, token, config).await,
        Command::Cancel { request_id, message } => {
            commands::cancel(remote, token, config, request_id, message).await
        }
    }
}
