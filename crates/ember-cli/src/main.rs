use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use ember_core::Wallet;

#[derive(Parser, Debug)]
#[command(name = "ember-cli")]
#[command(about = "CLI client for the ember blockchain node")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a fresh wallet and print its keys and address
    WalletNew,
    /// Sign and submit a transaction
    Send {
        /// Node base URL (e.g. http://127.0.0.1:8080)
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        node: String,
        /// Sender private key, hex
        #[arg(long)]
        private_key: String,
        /// Recipient address, 40 hex chars
        #[arg(long)]
        to: String,
        /// Amount in microcoins
        #[arg(long)]
        value: u64,
        /// Miner fee in microcoins
        #[arg(long, default_value_t = ember_core::constants::MIN_TRANSACTION_FEE)]
        fee: u64,
        /// Free-form payload
        #[arg(long, default_value = "")]
        data: String,
    },
    /// Fetch a mining job, search for a valid nonce and submit the result
    Mine {
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        node: String,
        /// Reward address, 40 hex chars
        address: String,
        /// Give up on a job after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },
    /// Show the balances of an address
    Balance {
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        node: String,
        /// Address, 40 hex chars
        address: String,
    },
    /// Ask a node to connect to a peer
    Connect {
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        node: String,
        /// Peer HTTP base URL
        peer: String,
    },
    /// Show node info
    Info {
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        node: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    match cli.cmd {
        Command::WalletNew => {
            let wallet = Wallet::generate();
            println!("privateKey: {}", wallet.private_key);
            println!("publicKey:  {}", wallet.public_key);
            println!("address:    {}", wallet.address);
        }
        Command::Send { node, private_key, to, value, fee, data } => {
            let wallet = match Wallet::from_private_hex(&private_key) {
                Ok(wallet) => wallet,
                Err(err) => bail!("invalid private key: {err}"),
            };
            let draft = wallet.create_transaction(&to, value, fee, &data)?;
            let res = client
                .post(format!("{node}/transactions/send"))
                .json(&draft)
                .send()
                .await?;
            let status = res.status();
            let body = res.text().await?;
            println!("status: {}", status);
            println!("{body}");
        }
        Command::Mine { node, address, timeout_secs } => {
            let job: serde_json::Value = client
                .get(format!("{node}/mining/get-mining-job/{address}"))
                .send()
                .await?
                .json()
                .await?;
            let block_data_hash = job["blockDataHash"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("mining job without blockDataHash"))?;
            let difficulty = job["difficulty"].as_u64().unwrap_or(0) as u32;
            println!(
                "mining block {} at difficulty {difficulty}",
                job["index"]
            );

            let timeout = std::time::Duration::from_secs(timeout_secs);
            let result = tokio::task::spawn_blocking(move || {
                ember_core::mine::mine(&block_data_hash, difficulty, timeout)
            })
            .await?;
            let Some(result) = result else {
                bail!("no valid nonce found within {timeout_secs}s");
            };
            println!("found nonce {} -> {}", result.nonce, result.block_hash);

            let res = client
                .post(format!("{node}/mining/submit-mined-block"))
                .json(&result)
                .send()
                .await?;
            let status = res.status();
            let body = res.text().await?;
            println!("status: {}", status);
            println!("{body}");
        }
        Command::Balance { node, address } => {
            let res = client
                .get(format!("{node}/address/{address}/balance"))
                .send()
                .await?;
            let body = res.text().await?;
            println!("{body}");
        }
        Command::Connect { node, peer } => {
            let res = client
                .post(format!("{node}/peers/connect"))
                .json(&serde_json::json!({ "peer": peer }))
                .send()
                .await?;
            let status = res.status();
            let body = res.text().await?;
            println!("status: {}", status);
            println!("{body}");
        }
        Command::Info { node } => {
            let res = client.get(format!("{node}/info")).send().await?;
            let body = res.text().await?;
            println!("{body}");
        }
    }
    Ok(())
}
