//! CLI definitions for cdpmux.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// cdpmux CLI.
#[derive(Parser)]
#[command(name = "cdpmux")]
#[command(about = "Talk to a browser over one multiplexed DevTools connection")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// HTTP discovery endpoint, e.g. http://localhost:9222
    #[arg(long, global = true, env = "CDPMUX_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Browser WebSocket URL; skips discovery
    #[arg(long, global = true, env = "CDPMUX_WS_URL")]
    pub ws_url: Option<String>,

    /// Send this Host header and rewrite reported URLs back to the endpoint
    #[arg(long, global = true, value_name = "HOST")]
    pub host_override: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Show browser version and the WebSocket URL a connection would use
    Version,

    /// List targets
    Targets,

    /// Send one command and print its result
    Call {
        /// CDP method, e.g. Browser.getVersion
        method: String,

        /// Command parameters as a JSON object
        params: Option<String>,

        /// Attach to this target and send the command on its session
        #[arg(long)]
        target: Option<String>,
    },

    /// Attach to a target and print its events
    Watch {
        /// Target to attach to
        target_id: String,

        #[command(flatten)]
        filter: WatchFilter,

        /// Stop after this many events
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Args)]
#[group(multiple = false)]
pub(crate) struct WatchFilter {
    /// Only events with this method, e.g. Page.loadEventFired
    #[arg(long)]
    pub method: Option<String>,

    /// Only events of this domain, e.g. Network
    #[arg(long)]
    pub domain: Option<String>,
}
