use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "hostbroker",
    about = "Host-factory-style EC2 provisioning broker: acquire/return machines against RunInstances, EC2 Fleet, Spot Fleet, and Auto Scaling Groups",
    version
)]
pub struct Cli {
    /// Base URL of a running hostbroker-api server. Omit to run in-process
    /// against the local config/store instead of talking to a server.
    #[arg(long, env = "HOSTBROKER_URL", global = true)]
    pub remote: Option<String>,

    /// Bearer token sent with every request when `--remote` is set.
    #[arg(long, env = "HOSTBROKER_TOKEN", global = true)]
    pub token: Option<String>,

    /// Path to the YAML config file (ignored when `--remote` is set).
    #[arg(long, default_value = "hostbroker.yml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP server (local only).
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,

        #[arg(long, default_value_t = 8080)]
        port: u16,
    },

    /// Register or update a template from a JSON file.
    PutTemplate {
        /// Path to a JSON file containing a single template.
        path: PathBuf,
    },

    /// List registered templates.
    Templates,

    /// Request new machines against a template.
    RequestMachines {
        #[arg(long)]
        template_id: String,

        #[arg(long)]
        count: u32,

        #[arg(long)]
        dry_run: bool,
    },

    /// Return machines to the provider.
    ReturnMachines {
        /// One or more EC2 instance ids (e.g. i-0123456789abcdef0).
        machine_ids: Vec<String>,
    },

    /// Fetch status for one or more requests.
    Status {
        /// One or more request ids.
        request_ids: Vec<String>,
    },

    /// List all known requests.
    Requests,

    /// Cancel a pending or in-progress request.
    Cancel {
        request_id: String,

        #[arg(long)]
        message: Option<String>,
    },
}
