use clap::{Parser, Subcommand};

use crate::config::{LogFormat, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "affinity-proxy",
    about = "Reverse proxy that pins each client to the backend it last selected",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to the YAML configuration file (built-in defaults when omitted)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level override (takes precedence over config file)
    #[arg(short, long, global = true)]
    pub log_level: Option<LogLevel>,

    /// Log format override: json or text
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the proxy (default)
    Serve {
        /// Listen address override, e.g. 0.0.0.0:6000
        #[arg(long)]
        listen: Option<String>,
    },

    /// Run demo backend servers for manual testing
    DemoBackends {
        /// Port to serve on; repeat for several servers
        #[arg(short, long = "port", default_values_t = [8080u16, 5000u16])]
        ports: Vec<u16>,
    },

    /// Validate the configuration and print the target table
    CheckConfig,
}
