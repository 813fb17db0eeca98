use clap::Parser;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use ember_core::constants::DEFAULT_DIFFICULTY;
use ember_core::{hashing, Node};
use ember_node::api::{self, AppState};
use ember_node::sync::SyncService;
use ember_node::SharedNode;

#[derive(Parser, Debug)]
#[command(name = "ember-node", about = "Minimal proof-of-work blockchain node")]
struct Args {
    /// HTTP listen address, e.g. 127.0.0.1:8080
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Peer gossip listen address, advertised to peers via /info
    #[arg(long, default_value = "127.0.0.1:7070")]
    sync_listen: String,

    /// Mining difficulty for new candidate blocks (leading zero hex digits)
    #[arg(long, default_value_t = DEFAULT_DIFFICULTY)]
    difficulty: u32,

    /// HTTP base URLs of peers to connect to on startup (repeatable)
    #[arg(long = "peer")]
    peers: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let node_id = hashing::sha256_hex(
        format!("{}|{}", hashing::iso_timestamp_now(), rand::random::<u64>()).as_bytes(),
    );
    let node = SharedNode::new(Node::new(
        node_id.clone(),
        args.sync_listen.clone(),
        args.difficulty,
    ));
    let sync = SyncService::new(node.clone());

    let sync_listener = TcpListener::bind(&args.sync_listen).await?;
    info!(addr = args.sync_listen, "gossip listening");
    tokio::spawn(sync.clone().serve(sync_listener));

    for peer in &args.peers {
        if let Err(err) = sync.connect(peer).await {
            tracing::warn!(peer, %err, "initial peer connection failed");
        }
    }

    let app = api::router(AppState {
        node,
        sync,
    });
    let addr: SocketAddr = args.listen.parse()?;
    info!(node_id, "ember-node listening on http://{addr}");
    axum::serve(TcpListener::bind(addr).await?, app).await?;
    Ok(())
}
