mod blocks;
mod cli;
mod config;
mod store;

use crate::cli::{ConfigCommand, KeyCommand};
use cacheseal_core::{EncryptionProvider, KeyMaterialStore};
use cacheseal_provider::ProviderRegistry;
use clap::Parser;
use color_eyre::Result;
use tracing::warn;
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

const LOG_ENV: &str = "CACHESEAL_LOG";

/// Entry point wiring the CLI to the key store and provider.
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command.unwrap_or(cli::Command::Health) {
        cli::Command::Version => print_version(),
        cli::Command::Health => run_health_check(&config).await?,
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
        cli::Command::Key(cmd) => {
            let key_store = store::production_store(&config);
            println!(
                "{}",
                run_key_command(cmd, &config, key_store.as_ref(), ProviderRegistry::global())?
            );
        }
        cli::Command::Encrypt(args) => {
            run_block(&config, blocks::Direction::Encrypt, &args).await?
        }
        cli::Command::Decrypt(args) => {
            run_block(&config, blocks::Direction::Decrypt, &args).await?
        }
    }

    Ok(())
}

/// Logs go to stderr so `encrypt`/`decrypt` output on stdout stays clean.
/// `CACHESEAL_LOG` takes the usual filter directives; default is `info`.
fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn print_version() {
    println!("cacheseal {}", env!("CARGO_PKG_VERSION"));
}

/// Resolves the provider and round-trips a sample block.
async fn run_health_check(config: &config::Config) -> Result<()> {
    let key_store = store::production_store(config);
    let provider = store::provider(config, key_store.as_ref())?;
    run_provider_health(provider.as_ref()).await?;
    println!("Key {}: ok", config.key_name());
    Ok(())
}

async fn run_provider_health<P: EncryptionProvider + ?Sized>(provider: &P) -> Result<()> {
    let payload = b"ok".to_vec();
    let sealed = provider
        .encrypt_block(Some(payload.clone()))
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    let round_trip = provider
        .decrypt_block(Some(sealed))
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;

    if round_trip != payload {
        color_eyre::eyre::bail!("encryption round-trip failed");
    }
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

fn run_key_command(
    cmd: KeyCommand,
    config: &config::Config,
    store: &dyn KeyMaterialStore,
    registry: &ProviderRegistry,
) -> Result<String> {
    let name = config.key_name();
    let report = |e: cacheseal_core::ProviderError| color_eyre::eyre::eyre!(e.to_string());

    match cmd {
        KeyCommand::Status => {
            let exists = store
                .exists(&name)
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
            Ok(format!(
                "{name}: {}",
                if exists { "present" } else { "absent" }
            ))
        }
        KeyCommand::Create => {
            let replaced = registry
                .rotate(&name, store, &config.provider)
                .map_err(report)?;
            if replaced {
                warn!(%name, "key rotated; previously cached entries can no longer be decrypted");
            }
            Ok(format!("{name}: created"))
        }
        KeyCommand::Delete => {
            let removed = registry.delete_key(&name, store).map_err(report)?;
            Ok(format!(
                "{name}: {}",
                if removed { "deleted" } else { "nothing to delete" }
            ))
        }
    }
}

async fn run_block(
    config: &config::Config,
    direction: blocks::Direction,
    args: &cli::BlockArgs,
) -> Result<()> {
    let key_store = store::production_store(config);
    let provider = store::provider(config, key_store.as_ref())?;
    let written = blocks::transform(provider.as_ref(), direction, args).await?;
    println!("Wrote {written} bytes to {}", args.output.display());
    Ok(())
}
