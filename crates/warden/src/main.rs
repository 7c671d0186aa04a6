//! Warden - Main entry point
//!
//! Batch ACME certificate issuance and renewal for many domains at once.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use warden::commands::{self, auto::AutoArgs, issue::IssueArgs};
use warden::renewal::{DEFAULT_TTL_DAYS, EXIT_COMMAND_ERROR};
use warden::services::{layout_for, Services};
use warden::stores::StorageLayout;
use warden_config::{resolve_server, ConfigOverrides, DEFAULT_CONCURRENCY, DEFAULT_KEY_BITS};

/// Warden - batch ACME certificate issuance and renewal
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// ACME directory URL or alias (letsencrypt, letsencrypt:staging)
    #[arg(long, global = true, env = "WARDEN_SERVER")]
    server: Option<String>,

    /// Directory holding accounts, keys and certificates
    #[arg(long, global = true, env = "WARDEN_STORAGE")]
    storage: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register (or resume) the ACME account
    Setup {
        /// Contact email for the account
        #[arg(long)]
        email: String,
    },
    /// Obtain a certificate covering several domains
    Issue {
        /// Domains separated by ',', ';' or ':'; the first is the common name
        #[arg(short = 'd', long)]
        domains: String,

        /// Document roots, one per domain or a single shared one
        #[arg(short = 'p', long)]
        path: String,

        /// Owner of the challenge proof files
        #[arg(long)]
        user: Option<String>,

        /// RSA domain key size
        #[arg(long, default_value_t = DEFAULT_KEY_BITS)]
        bits: u32,

        /// Generate a new domain key even if one is stored
        #[arg(long)]
        rekey: bool,

        /// Domains authorized at once
        #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
        concurrency: usize,
    },
    /// Exit 0 if a certificate is still valid, 1 if it must be renewed, 2 on error
    Check {
        /// Common name the certificate is stored under
        #[arg(long)]
        name: String,

        /// Names the certificate must cover
        #[arg(long)]
        names: Option<String>,

        /// Days before expiry a certificate counts as due
        #[arg(long, default_value_t = DEFAULT_TTL_DAYS)]
        ttl: u32,
    },
    /// Show the account and every stored certificate
    Status {
        #[arg(long, default_value_t = DEFAULT_TTL_DAYS)]
        ttl: u32,
    },
    /// Revoke a certificate and delete it from storage
    Revoke {
        #[arg(long)]
        name: String,
    },
    /// Renew every certificate listed in the configuration file
    Auto {
        /// Configuration file path
        #[arg(short = 'c', long = "config", env = "WARDEN_CONFIG")]
        config: Option<PathBuf>,

        /// Certificates renewed at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Issue on this process instead of spawning one per certificate
        #[arg(long)]
        in_process: bool,

        /// Seconds after which a child process is killed
        #[arg(long)]
        timeout: Option<u64>,

        #[arg(long, default_value_t = DEFAULT_TTL_DAYS)]
        ttl: u32,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Several rustls providers end up enabled through the HTTP stacks.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    match run(cli) {
        Ok(code) => exit_code(code),
        Err(e) => {
            // The supervisor reads this line back from child processes.
            eprintln!("Error: {e:#}");
            exit_code(EXIT_COMMAND_ERROR)
        }
    }
}

fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start the async runtime")?;
    runtime.block_on(dispatch(cli))
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let Cli {
        server,
        storage,
        verbose,
        command,
    } = cli;

    match command {
        Commands::Auto {
            config,
            concurrency,
            in_process,
            timeout,
            ttl,
        } => {
            let args = AutoArgs {
                config,
                overrides: ConfigOverrides {
                    server,
                    storage,
                    concurrency,
                },
                in_process,
                timeout: timeout.map(Duration::from_secs),
                ttl_days: ttl,
                verbose,
            };
            let run = commands::auto::run(&args).await;
            if let Some(report) = &run.report {
                for line in report.lines() {
                    println!("{line}");
                }
            }
            if let Some(error) = &run.error {
                eprintln!("Error: {error}");
            }
            Ok(run.exit_code)
        }
        Commands::Check { name, names, ttl } => {
            let (_, layout) = layout(server, storage)?;
            let check = commands::check::run(&layout, &name, names.as_deref(), ttl).await?;
            match check.not_after {
                Some(not_after) => debug!(
                    name = %name,
                    not_after = %not_after,
                    missing = ?check.missing,
                    status = ?check.status,
                    "Checked certificate"
                ),
                None => info!(name = %name, "No certificate stored"),
            }
            Ok(check.exit_code())
        }
        Commands::Status { ttl } => {
            let (server, layout) = layout(server, storage)?;
            let report = commands::status::run(&layout, &server, ttl, Utc::now()).await?;
            print!("{report}");
            Ok(0)
        }
        Commands::Setup { email } => {
            let services = system(server, storage)?;
            let outcome = commands::setup::run(&services, &email).await?;
            if outcome.created {
                println!("Account registered on {}", services.server);
            } else {
                println!("Account already registered on {}", services.server);
            }
            println!("  {}", outcome.record.account_url);
            Ok(0)
        }
        Commands::Issue {
            domains,
            path,
            user,
            bits,
            rekey,
            concurrency,
        } => {
            let services = system(server, storage)?;
            let args = IssueArgs {
                domains,
                paths: path,
                user,
                bits,
                rekey,
                concurrency,
            };
            let issued = commands::issue::run(&services, &args).await?;
            println!(
                "Certificate for {} issued, valid until {}",
                issued.names.join(", "),
                issued.not_after.format("%Y-%m-%d")
            );
            Ok(0)
        }
        Commands::Revoke { name } => {
            let services = system(server, storage)?;
            let revoked = commands::revoke::run(&services, &name).await?;
            println!("Certificate for {} revoked", revoked.names.join(", "));
            Ok(0)
        }
    }
}

fn system(server: Option<String>, storage: Option<PathBuf>) -> Result<Services> {
    let services = Services::system(&required(server, "--server")?, required(storage, "--storage")?)
        .context("Failed to set up ACME services")?;
    Ok(services)
}

/// Storage layout without the network services
fn layout(server: Option<String>, storage: Option<PathBuf>) -> Result<(String, StorageLayout)> {
    let server = resolve_server(&required(server, "--server")?)?;
    let layout = layout_for(&server, required(storage, "--storage")?);
    Ok((server, layout))
}

fn required<T>(value: Option<T>, flag: &str) -> Result<T> {
    value.ok_or_else(|| anyhow!("{flag} is required"))
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(EXIT_COMMAND_ERROR as u8))
}
