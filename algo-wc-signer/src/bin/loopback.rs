//! Loopback signing demo.
//!
//! Runs a dapp session and a wallet session in one process, connected
//! through the in-memory relay, and signs one payment group.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use algo_txn::{Address, KeyPair, SignedTransaction, SuggestedParams, Transaction};
use algo_wc_signer::{
    ClientSession, KeyPairSigner, LoopbackBridge, PeerMeta, ServerEvent, ServerSession,
    SessionConfig, StaticAccounts, TransactionIntent,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const RECEIVER: &str = "ERKK6KJUTU6VSZST5C5EH63PFVOXT5RMPS2SAAUGLRXSDBBMH6TJTI5XHU";
const TESTNET_GENESIS_ID: &str = "testnet-v1.0";
const TESTNET_GENESIS_HASH: &str = "SGO1GKSzyE7IEPItTxCByw9x8FmnrCDexi9/cOUJOiI=";

/// Sign a payment group between an in-process dapp and wallet.
#[derive(Parser, Debug)]
#[command(name = "algo-wc-loopback")]
#[command(about = "Algorand signing session over an in-process relay")]
#[command(version)]
struct Args {
    /// Session configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Relay URL advertised in the pairing URI (overrides the config file)
    #[arg(long, env = "ALGO_WC_BRIDGE")]
    bridge: Option<String>,

    /// Amount of each payment, in microalgos
    #[arg(long, default_value_t = 1_000_000)]
    amount: u64,

    /// Number of payments in the group
    #[arg(long, default_value_t = 1)]
    group_size: usize,

    /// Message shown to the wallet for the whole group
    #[arg(long)]
    message: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            SessionConfig::load(path)?
        }
        None => SessionConfig::default(),
    };
    if let Some(bridge) = args.bridge {
        config.bridge_url = bridge;
    }

    let keypair = KeyPair::generate();
    let account = keypair.address();
    info!("Generated wallet account {}", account);

    let wallet_meta = PeerMeta {
        description: "Throwaway wallet".to_string(),
        url: "https://example.com/wallet".to_string(),
        icons: vec![],
        name: "algo-wc-loopback wallet".to_string(),
    };
    let (server_end, client_end) = LoopbackBridge::new(config.bridge_url.clone())
        .with_capacity(config.event_capacity)
        .pair(config.metadata.clone(), Some(wallet_meta));

    let server = ServerSession::listen(Arc::new(server_end), &config).await?;
    let mut server_events = server.subscribe();
    info!("Pairing URI: {}", server.uri());

    let mut client = ClientSession::new(Arc::new(client_end), &config);
    client
        .connect(
            &StaticAccounts(vec![account]),
            Arc::new(KeyPairSigner::new(keypair)),
        )
        .await?;

    match tokio::time::timeout(Duration::from_secs(5), server_events.recv()).await?? {
        ServerEvent::Connected(info) => info!("Wallet {} connected", info.peer_id),
        other => return Err(format!("unexpected session event: {:?}", other).into()),
    }

    let receiver: Address = RECEIVER.parse()?;
    let params = SuggestedParams::new(TESTNET_GENESIS_ID, TESTNET_GENESIS_HASH, 1);
    let intents: Vec<_> = (0..args.group_size.max(1))
        .map(|index| {
            let txn = Transaction::payment(account, receiver, args.amount, &params)
                .with_note(format!("loopback payment {}", index));
            TransactionIntent::new(txn)
        })
        .collect();

    let outcome = server
        .sign_transaction_group(&intents, args.message.as_deref())
        .await?;

    for (index, slot) in outcome.iter().enumerate() {
        match slot {
            Some(bytes) => {
                let signed = SignedTransaction::decode(bytes)?;
                info!("Transaction {} id {}", index, signed.txn.id()?);
                info!("Transaction {} signed: {}", index, STANDARD.encode(bytes));
            }
            None => info!("Transaction {} left unsigned", index),
        }
    }

    server.close().await?;
    info!("Session closed");
    Ok(())
}
