use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use intercept_proxy::config::{self, Config, LoggingConfig};
use intercept_proxy::error::{Result, SigningError};
use intercept_proxy::logging;
use intercept_proxy::policy::{hash_password, PolicyStore};
use intercept_proxy::tls::{strip_port, CertAuthority, SignerOptions};

#[derive(Parser, Debug)]
#[command(name = "intercept-proxy")]
#[command(about = "Access policy and certificate authority for an intercepting forward proxy", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (YAML/JSON/TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Load the policy directory and CA and report what was found
    Check,
    /// Evaluate whether a user may send a request
    Authorize {
        user: String,
        method: String,
        url: String,
    },
    /// Print the passwd hash for a password
    HashPassword { password: String },
    /// Issue a leaf certificate and print the chain as PEM
    Sign {
        #[arg(required = true)]
        hosts: Vec<String>,
    },
    /// Generate a new CA certificate and key
    InitCa {
        #[arg(long, value_name = "FILE")]
        cert: PathBuf,
        #[arg(long, value_name = "FILE")]
        key: PathBuf,
        #[arg(long, default_value = "Intercept Proxy Root CA")]
        common_name: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    match args.command {
        Command::HashPassword { password } => {
            println!("{}", hash_password(&password));
            Ok(ExitCode::SUCCESS)
        }
        Command::InitCa {
            cert,
            key,
            common_name,
        } => {
            logging::init(&LoggingConfig::default(), args.debug);
            let ca = CertAuthority::generate(&common_name, SignerOptions::default())?;
            ca.write_pem(&cert, &key)?;
            print!("{}", ca.ca_cert_pem());
            Ok(ExitCode::SUCCESS)
        }
        Command::Check => {
            let config = setup(args.config.as_ref(), args.debug)?;
            let policy = PolicyStore::from_directory(&config.policy_dir)?;
            let ca = load_authority(&config)?;
            info!(
                "Loaded {} ACL(s) and {} user record(s) from {}",
                policy.acls().len(),
                policy.users().len(),
                config.policy_dir.display()
            );
            info!("CA certificate loaded ({} bytes DER)", ca.ca_cert_der().len());
            println!(
                "ok: {} acl(s), {} user(s)",
                policy.acls().len(),
                policy.users().len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Authorize { user, method, url } => {
            let config = setup(args.config.as_ref(), args.debug)?;
            let policy = PolicyStore::from_directory(&config.policy_dir)?;
            if policy.permits(&user, &method, &url) {
                println!("permit");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("deny");
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Sign { hosts } => {
            let config = setup(args.config.as_ref(), args.debug)?;
            let ca = load_authority(&config)?;
            let hostnames: Vec<String> = hosts.iter().map(|h| strip_port(h).to_string()).collect();
            let cert = tokio::task::spawn_blocking(move || ca.sign_host(&hostnames))
                .await
                .map_err(|e| SigningError::Task(e.to_string()))??;
            print!("{}", cert.chain_pem());
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Load configuration and start logging with it.
fn setup(path: Option<&PathBuf>, debug: bool) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let config = config::load_from_path(path)?;
            logging::init(&config.logging, debug);
            info!("Configuration loaded successfully from {}", path.display());
            config
        }
        None => {
            let config = config::load_from_env_or_file()?;
            logging::init(&config.logging, debug);
            info!("Configuration loaded successfully");
            config
        }
    };
    Ok(config)
}

fn load_authority(config: &Config) -> Result<CertAuthority> {
    Ok(CertAuthority::from_files(
        &config.ca.cert_path,
        &config.ca.key_path,
        config.signer.to_options(),
    )?)
}
