mod config;
mod serve;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use postmortem_core::Role;

use crate::config::{Config, ConfigError};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Incident postmortem workflow server.
#[derive(Parser)]
#[command(
    name = "postmortem",
    version,
    about = "Incident postmortem workflow server"
)]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Path to the TOML configuration file
        #[arg(long)]
        config: PathBuf,
        /// Port to listen on (overrides the file and POSTMORTEM_PORT)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate a configuration file without starting the server
    CheckConfig {
        /// Path to the TOML configuration file
        file: PathBuf,
    },

    /// Print the role capability table
    Capabilities {
        /// Only show this role (employee, manager, owner)
        #[arg(long)]
        role: Option<Role>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port } => {
            init_logging();
            cmd_serve(&config, port);
        }
        Commands::CheckConfig { file } => {
            cmd_check_config(&file, cli.output, cli.quiet);
        }
        Commands::Capabilities { role } => {
            cmd_capabilities(role, cli.output);
        }
    }
}

fn cmd_serve(path: &Path, port: Option<u16>) {
    let mut config = match Config::load(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("{}", e);
            process::exit(1);
        }
    };
    if let Some(port) = port {
        config.server.port = port;
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to create tokio runtime");
            process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(serve::start_server(config)) {
        tracing::error!(error = %e, "server error");
        process::exit(1);
    }
}

fn cmd_check_config(path: &Path, output: OutputFormat, quiet: bool) {
    match Config::load(path) {
        Ok(config) => match output {
            OutputFormat::Json => {
                let summary = serde_json::json!({
                    "valid": true,
                    "port": config.server.port,
                    "rate_limit": config.server.rate_limit,
                    "max_body_bytes": config.server.max_body_bytes,
                    "users": config.users.iter().map(|u| serde_json::json!({
                        "id": u.id,
                        "role": u.role,
                    })).collect::<Vec<_>>(),
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&summary)
                        .unwrap_or_else(|e| format!("serialization error: {}", e))
                );
            }
            OutputFormat::Text => {
                if !quiet {
                    println!(
                        "{}: ok ({} users, port {}, rate limit {}/min)",
                        path.display(),
                        config.users.len(),
                        config.server.port,
                        config.server.rate_limit
                    );
                }
            }
        },
        Err(e) => {
            report_config_error(&e, output, quiet);
            process::exit(1);
        }
    }
}

fn report_config_error(err: &ConfigError, output: OutputFormat, quiet: bool) {
    match output {
        OutputFormat::Json => {
            let problems = match err {
                ConfigError::Invalid(problems) => problems.clone(),
                other => vec![other.to_string()],
            };
            let body = serde_json::json!({ "valid": false, "errors": problems });
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&body).unwrap_or_else(|_| err.to_string())
            );
        }
        OutputFormat::Text => {
            if !quiet {
                eprintln!("error: {}", err);
            }
        }
    }
}

fn cmd_capabilities(role: Option<Role>, output: OutputFormat) {
    let roles: Vec<Role> = match role {
        Some(r) => vec![r],
        None => Role::ALL.to_vec(),
    };
    match output {
        OutputFormat::Json => {
            let table: serde_json::Map<String, serde_json::Value> = roles
                .iter()
                .map(|r| {
                    (
                        r.as_str().to_string(),
                        serde_json::json!({
                            "actions": r.capabilities(),
                            "visibility": r.visibility(),
                        }),
                    )
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&table)
                    .unwrap_or_else(|e| format!("serialization error: {}", e))
            );
        }
        OutputFormat::Text => {
            for r in roles {
                let actions: Vec<&str> = r.capabilities().iter().map(|a| a.as_str()).collect();
                println!("{}: {}", r, actions.join(", "));
            }
        }
    }
}
