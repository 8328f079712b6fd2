//! Worker registration CLI
//!
//! Signs bind/unbind requests with a local key and sends them to every
//! validator given with `--validators`. The confirmation prompt for bulk
//! unbinds lives here; validators only accept `confirm = true`.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::io::{BufRead, Write};
use tracing::Level;

use silica_validator::crypto::{LocalSigner, SignatureScheme, SignedAction};
use silica_validator::federation::{PeerClient, PeerResult};
use silica_validator::registrar::{BindRequest, UnbindAllRequest, UnbindRequest};

#[derive(Debug, Parser)]
#[command(name = "worker-cli", version, about = "Bind mining workers to a network identity")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a new key seed and print its identity
    Keygen {
        #[arg(long, default_value_t = SignatureScheme::Sr25519)]
        scheme: SignatureScheme,
    },
    /// Print the identity derived from the seed
    Address(KeyArgs),
    /// Bind a worker on every validator
    Bind {
        #[command(flatten)]
        key: KeyArgs,
        #[command(flatten)]
        validators: ValidatorArgs,
        /// Worker name; must contain the identity
        #[arg(long)]
        worker: String,
    },
    /// Release one worker on every validator
    Unbind {
        #[command(flatten)]
        key: KeyArgs,
        #[command(flatten)]
        validators: ValidatorArgs,
        #[arg(long)]
        worker: String,
    },
    /// Release every worker of the identity on every validator
    UnbindAll {
        #[command(flatten)]
        key: KeyArgs,
        #[command(flatten)]
        validators: ValidatorArgs,
        /// Skip the preview and confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// List workers bound to an identity across validators
    List {
        #[command(flatten)]
        validators: ValidatorArgs,
        /// Identity to look up (defaults to the seed's identity)
        #[arg(long)]
        identity: Option<String>,
        #[arg(long, env = "SILICA_WORKER_SEED", hide_env_values = true)]
        seed: Option<String>,
        #[arg(long, default_value_t = SignatureScheme::Sr25519)]
        scheme: SignatureScheme,
    },
}

#[derive(Debug, Args)]
struct KeyArgs {
    /// 32-byte seed in hex
    #[arg(long, env = "SILICA_WORKER_SEED", hide_env_values = true)]
    seed: String,
    #[arg(long, default_value_t = SignatureScheme::Sr25519)]
    scheme: SignatureScheme,
}

impl KeyArgs {
    fn signer(&self) -> Result<LocalSigner> {
        LocalSigner::from_seed_hex(self.scheme, &self.seed)
    }
}

#[derive(Debug, Args)]
struct ValidatorArgs {
    /// Validator base URLs, comma separated
    #[arg(long, env = "SILICA_VALIDATORS", value_delimiter = ',', required = true)]
    validators: Vec<String>,
    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 15)]
    timeout: u64,
}

impl ValidatorArgs {
    fn client(&self) -> Result<PeerClient> {
        let client = PeerClient::new(self.validators.clone(), self.timeout)?;
        if client.peers().is_empty() {
            bail!("No validator URLs given");
        }
        Ok(client)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::WARN)
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Keygen { scheme } => {
            let (signer, seed) = LocalSigner::generate(scheme)?;
            println!("scheme:   {}", scheme);
            println!("seed:     {}", hex::encode(seed));
            println!("identity: {}", signer.identity());
        }
        Command::Address(key) => {
            println!("{}", key.signer()?.identity());
        }
        Command::Bind {
            key,
            validators,
            worker,
        } => {
            let signer = key.signer()?;
            let identity = signer.identity();
            if !worker.contains(&identity) {
                bail!("Worker name must contain the identity {}", identity);
            }

            let timestamp = Utc::now().timestamp();
            let request = BindRequest {
                signature: signer.sign_action(SignedAction::Bind, &worker, timestamp),
                identity,
                worker_name: worker,
                timestamp,
            };
            report(validators.client()?.bind(&request).await, |outcome| outcome);
        }
        Command::Unbind {
            key,
            validators,
            worker,
        } => {
            let signer = key.signer()?;
            let timestamp = Utc::now().timestamp();
            let request = UnbindRequest {
                signature: signer.sign_action(SignedAction::Unbind, &worker, timestamp),
                identity: signer.identity(),
                worker_name: worker,
                timestamp,
            };
            report(validators.client()?.unbind(&request).await, |_| {
                "unbound".to_string()
            });
        }
        Command::UnbindAll {
            key,
            validators,
            yes,
        } => {
            let signer = key.signer()?;
            let identity = signer.identity();
            let client = validators.client()?;

            if !yes {
                let found = client.find_workers(&identity).await;
                if found.is_empty() {
                    println!("No workers bound to {}", identity);
                    return Ok(());
                }
                println!("Workers bound to {}:", identity);
                for (worker, peers) in &found {
                    println!("  {} ({})", worker, peers.join(", "));
                }
                if !confirm(&format!("Unbind all {} workers?", found.len()))? {
                    println!("Aborted");
                    return Ok(());
                }
            }

            // Sign after the prompt so the timestamp is fresh
            let timestamp = Utc::now().timestamp();
            let request = UnbindAllRequest {
                signature: signer.sign_action(SignedAction::UnbindAll, &identity, timestamp),
                identity,
                timestamp,
                confirm: true,
            };
            report(client.unbind_all(&request).await, |removed| {
                format!("removed {}", removed)
            });
        }
        Command::List {
            validators,
            identity,
            seed,
            scheme,
        } => {
            let identity = match (identity, seed) {
                (Some(identity), _) => identity,
                (None, Some(seed)) => LocalSigner::from_seed_hex(scheme, &seed)?.identity(),
                (None, None) => bail!("Pass --identity or a key seed"),
            };

            let found = validators.client()?.find_workers(&identity).await;
            if found.is_empty() {
                println!("No workers bound to {}", identity);
            }
            for (worker, peers) in found {
                println!("{}\t{}", worker, peers.join(","));
            }
        }
    }

    Ok(())
}

fn report<T>(results: Vec<PeerResult<T>>, describe: impl Fn(T) -> String) {
    for PeerResult { peer, result } in results {
        match result {
            Ok(value) => println!("{}: {}", peer, describe(value)),
            Err(e) => println!("{}: rejected ({})", peer, e),
        }
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    std::io::stdout().flush().context("Failed to flush stdout")?;

    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;

    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
