//! Wallet Broker CLI
//!
//! Developer tool for inspecting wallet catalogs, broker configuration,
//! handler routing and typed-data payloads without a wallet app.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;
use wallet_broker::{select_provider, BrokerConfig};
use wallet_broker_core::deeplink::StaticOpener;
use wallet_broker_core::links::wallet_link;
use wallet_broker_core::typed_data::canonical_string;
use wallet_broker_core::{
    DomainTypedData, TypedDataProvider, TypedStruct, WalletCatalog, WalletRequest,
};

#[derive(Parser)]
#[command(name = "wallet-broker")]
#[command(about = "Wallet Broker CLI", version)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the wallets in a catalog
    Wallets {
        /// Catalog JSON file
        #[arg(short, long)]
        catalog: PathBuf,

        /// URL schemes treated as installed
        #[arg(short, long, value_delimiter = ',')]
        installed: Vec<String>,
    },

    /// Show which handler would serve a request
    Route {
        #[arg(short, long)]
        catalog: PathBuf,

        /// Target wallet id; omitted means QR
        #[arg(short, long)]
        wallet: Option<String>,

        #[arg(short, long, value_delimiter = ',')]
        installed: Vec<String>,

        /// Route through the pairing modal
        #[arg(long)]
        modal: bool,
    },

    /// Build the deeplink that hands a session URI to a wallet
    Link {
        #[arg(short, long)]
        catalog: PathBuf,

        #[arg(short, long)]
        wallet: String,

        /// Relay or pairing URI to embed
        #[arg(short, long)]
        uri: Option<String>,

        #[arg(short, long, value_delimiter = ',')]
        installed: Vec<String>,
    },

    /// Print the canonical EIP-712 payload for a single-struct message
    TypedData {
        /// Domain name
        #[arg(long)]
        name: String,

        #[arg(long, default_value = "1")]
        chain_id: u64,

        /// Domain version
        #[arg(long)]
        version: Option<String>,

        #[arg(long)]
        primary_type: String,

        /// Message field as `name:type:value`
        #[arg(short, long = "field")]
        fields: Vec<String>,
    },

    /// Canonicalize a JSON document
    Canonicalize {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Validate a broker configuration file
    Config {
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Wallets { catalog, installed } => list_wallets(&catalog, installed),
        Commands::Route {
            catalog,
            wallet,
            installed,
            modal,
        } => show_route(&catalog, wallet.as_deref(), installed, modal),
        Commands::Link {
            catalog,
            wallet,
            uri,
            installed,
        } => show_link(&catalog, &wallet, uri.as_deref(), installed),
        Commands::TypedData {
            name,
            chain_id,
            version,
            primary_type,
            fields,
        } => show_typed_data(&name, chain_id, version.as_deref(), &primary_type, &fields),
        Commands::Canonicalize { file } => canonicalize_file(&file),
        Commands::Config { file } => check_config(&file),
    }
}

fn load_catalog(path: &Path) -> Result<WalletCatalog> {
    let catalog = WalletCatalog::from_path(path)
        .with_context(|| format!("loading catalog {}", path.display()))?;
    debug!(wallets = catalog.len(), "Catalog loaded");
    Ok(catalog)
}

fn opener(installed: Vec<String>) -> StaticOpener {
    StaticOpener::schemes(installed)
}

fn list_wallets(path: &Path, installed: Vec<String>) -> Result<()> {
    let catalog = load_catalog(path)?;
    let opener = opener(installed);

    println!("\n{} wallets\n", catalog.len());
    for wallet in catalog.wallets() {
        let connections: Vec<String> = wallet
            .config
            .as_ref()
            .and_then(|config| config.connections.as_ref())
            .map(|connections| {
                connections
                    .iter()
                    .map(|c| c.connection_type().to_string())
                    .collect()
            })
            .unwrap_or_default();
        println!(
            "  {:<16} {:<20} installed={:<5} connections=[{}]",
            wallet.id.as_deref().unwrap_or("-"),
            wallet.display_name(),
            wallet.installed(&opener),
            connections.join(", ")
        );
    }
    Ok(())
}

fn show_route(
    path: &Path,
    wallet_id: Option<&str>,
    installed: Vec<String>,
    modal: bool,
) -> Result<()> {
    let catalog = load_catalog(path)?;
    let wallet = match wallet_id {
        Some(id) => Some(
            catalog
                .find(id)
                .cloned()
                .ok_or_else(|| anyhow!("wallet '{id}' not in catalog"))?,
        ),
        None => None,
    };

    let request = WalletRequest::new(wallet, 1).with_modal(modal);
    let selection = select_provider(&request, &opener(installed));
    info!(handler = %selection.kind, "Route selected");

    println!("Handler:         {}", selection.kind);
    println!("Connection type: {}", selection.connection_type);
    Ok(())
}

fn show_link(
    path: &Path,
    wallet_id: &str,
    uri: Option<&str>,
    installed: Vec<String>,
) -> Result<()> {
    let catalog = load_catalog(path)?;
    let wallet = catalog
        .find(wallet_id)
        .ok_or_else(|| anyhow!("wallet '{wallet_id}' not in catalog"))?;
    let opener = opener(installed);
    let kind = wallet.connection_type(&opener);

    match wallet_link(wallet, uri, &kind, &opener) {
        Some(url) => println!("{url}"),
        None => bail!("no launchable link for '{wallet_id}'"),
    }
    Ok(())
}

fn show_typed_data(
    name: &str,
    chain_id: u64,
    version: Option<&str>,
    primary_type: &str,
    fields: &[String],
) -> Result<()> {
    let mut message = TypedStruct::new(primary_type);
    for raw in fields {
        let mut parts = raw.splitn(3, ':');
        let (Some(field), Some(kind), Some(value)) = (parts.next(), parts.next(), parts.next())
        else {
            bail!("field '{raw}' is not name:type:value");
        };
        message = message.field(field, kind, value);
    }

    let typed = DomainTypedData::new(name, chain_id, version).with_message(message);
    let payload = typed
        .typed_data_string()
        .ok_or_else(|| anyhow!("typed data is incomplete"))?;
    println!("{payload}");
    Ok(())
}

fn canonicalize_file(path: &Path) -> Result<()> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_slice(&data)?;
    println!("{}", canonical_string(&value));
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = BrokerConfig::from_path(path)?;
    config.validate()?;

    let sections = [
        ("relay", config.relay.is_some()),
        ("pairing", config.pairing.is_some()),
        ("appHandoff", config.app_handoff.is_some()),
        ("encryptedDeeplink", config.encrypted_deeplink.is_some()),
    ];
    println!("\nConfiguration OK\n");
    for (section, present) in sections {
        println!("  {:<18} {}", section, if present { "configured" } else { "-" });
    }
    if let Some(deeplink) = &config.encrypted_deeplink {
        deeplink.clusters()?;
        println!("\nSolana broadcast endpoints:");
        for url in &deeplink.mainnet_rpc_urls {
            println!("  {:<18} {}", "mainnet-beta", url);
        }
        for url in &deeplink.devnet_rpc_urls {
            println!("  {:<18} {}", "devnet", url);
        }
    }
    if config.pairing.is_none() {
        println!("\nWarning: the broker requires a pairing section");
    }
    Ok(())
}
