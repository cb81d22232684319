//! Strandgate - LDAP front-end for an external decision service
//!
//! Answers LDAP binds and searches on a plaintext and a TLS endpoint by
//! asking an HTTP decision service.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use strandgate_core::config::StrandgateConfig;
use strandgate_ldap::tls::generate_self_signed_cert;
use strandgate_ldap::LdapServer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "strandgate")]
#[command(author = "Strandgate Team")]
#[command(version = strandgate_core::VERSION)]
#[command(about = "LDAP front-end for an external decision service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Plaintext LDAP bind address
    #[arg(long, env = "STRANDGATE_LDAP_ADDRESS")]
    ldap_address: Option<String>,

    /// LDAPS bind address
    #[arg(long, env = "STRANDGATE_LDAPS_ADDRESS")]
    ldaps_address: Option<String>,

    /// Do not start the LDAPS listener
    #[arg(long)]
    no_ldaps: bool,

    /// TLS certificate (PEM)
    #[arg(long, env = "STRANDGATE_TLS_CERT")]
    tls_cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long, env = "STRANDGATE_TLS_KEY")]
    tls_key: Option<PathBuf>,

    /// Decision service base URL
    #[arg(long, env = "STRANDGATE_DECISION_URL")]
    decision_url: Option<String>,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "STRANDGATE_METRICS_ADDRESS")]
    metrics_address: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "STRANDGATE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long, env = "STRANDGATE_LOG_FORMAT")]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the LDAP server
    Server,

    /// Generate a self-signed certificate for development
    GenCert {
        /// Certificate output path
        #[arg(long, default_value = "./data/certificate.pem")]
        cert: PathBuf,

        /// Private key output path
        #[arg(long, default_value = "./data/key.pem")]
        key: PathBuf,

        /// Validity in days
        #[arg(long, default_value_t = 365)]
        days: u32,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        StrandgateConfig::from_file(config_path)?
    } else {
        StrandgateConfig::from_env()
    };
    apply_overrides(&mut config, &cli);

    init_logging(&config);

    match cli.command {
        Some(Commands::Version) => {
            println!("strandgate {}", strandgate_core::VERSION);
        }
        Some(Commands::GenCert { cert, key, days }) => {
            generate_self_signed_cert(&cert, &key, days)?;
        }
        Some(Commands::Server) | None => {
            run_server(config).await?;
        }
    }

    Ok(())
}

fn apply_overrides(config: &mut StrandgateConfig, cli: &Cli) {
    if let Some(addr) = &cli.ldap_address {
        config.ldap.bind_address = addr.clone();
    }
    if let Some(addr) = &cli.ldaps_address {
        config.ldaps.bind_address = addr.clone();
    }
    if cli.no_ldaps {
        config.ldaps.enabled = false;
    }
    if let Some(cert) = &cli.tls_cert {
        config.ldaps.cert_file = cert.clone();
    }
    if let Some(key) = &cli.tls_key {
        config.ldaps.key_file = key.clone();
    }
    if let Some(url) = &cli.decision_url {
        config.decision.base_url = url.clone();
    }
    if let Some(addr) = &cli.metrics_address {
        config.metrics.enabled = true;
        config.metrics.bind_address = addr.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.clone();
    }
}

fn init_logging(config: &StrandgateConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn run_server(config: StrandgateConfig) -> anyhow::Result<()> {
    config.validate()?;

    info!("Starting Strandgate {}", strandgate_core::VERSION);
    info!("Decision service: {}", config.decision.base_url);

    let server = LdapServer::new(config).bind().await?;
    if let Ok(addr) = server.ldap_addr() {
        info!("LDAP listening on ldap://{}", addr);
    }
    if let Some(Ok(addr)) = server.ldaps_addr() {
        info!("LDAPS listening on ldaps://{}", addr);
    }

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                let _ = shutdown.send(());
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "strandgate",
            "--ldap-address",
            "127.0.0.1:1389",
            "--no-ldaps",
            "--decision-url",
            "http://authority:8080",
            "--metrics-address",
            "127.0.0.1:9999",
            "server",
        ]);
        let mut config = StrandgateConfig::default();
        apply_overrides(&mut config, &cli);

        assert_eq!(config.ldap.bind_address, "127.0.0.1:1389");
        assert!(!config.ldaps.enabled);
        assert_eq!(config.decision.base_url, "http://authority:8080");
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.bind_address, "127.0.0.1:9999");
        assert!(matches!(cli.command, Some(Commands::Server)));
    }

    #[test]
    fn test_gen_cert_defaults() {
        let cli = Cli::parse_from(["strandgate", "gen-cert"]);
        match cli.command {
            Some(Commands::GenCert { cert, key, days }) => {
                assert_eq!(cert, PathBuf::from("./data/certificate.pem"));
                assert_eq!(key, PathBuf::from("./data/key.pem"));
                assert_eq!(days, 365);
            }
            _ => panic!("expected gen-cert"),
        }
    }
}
