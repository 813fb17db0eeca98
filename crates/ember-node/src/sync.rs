//! Peer synchronization: a gossip state machine over persistent TCP
//! connections carrying newline-delimited JSON messages.
//!
//! Each connection runs one reader task and one writer task; messages from
//! a single peer are handled strictly sequentially. The peer registry maps
//! node id to an outbound channel and is only populated once a handshake
//! response has proven the peer shares our chain id.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ember_core::{
    Block, BlockOutcome, ChainSnapshot, NodeInfo, Transaction, TransactionDraft,
};

use crate::SharedNode;

/// Bound on the out-of-band /info fetch and the TCP dial; a connect attempt
/// fails cleanly instead of hanging.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeerMessage {
    HandshakeQuery,
    HandshakeResponse(NodeInfo),
    RequestChain,
    ResponseChain(ChainSnapshot),
    RequestPendingTx,
    ResponsePendingTx(Vec<Transaction>),
    BroadcastBlock(Block),
    BroadcastTransaction(Transaction),
    InvalidRequest { reason: String },
}

type Outbound = mpsc::UnboundedSender<PeerMessage>;

pub struct SyncService {
    node: SharedNode,
    peers: Mutex<HashMap<String, Outbound>>,
}

impl SyncService {
    pub fn new(node: SharedNode) -> Arc<Self> {
        Arc::new(Self {
            node,
            peers: Mutex::new(HashMap::new()),
        })
    }

    /// Accept inbound peer connections forever.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(%addr, "inbound peer connection");
                    let service = self.clone();
                    tokio::spawn(service.run_connection(stream));
                }
                Err(err) => warn!(%err, "failed to accept peer connection"),
            }
        }
    }

    /// Dial a peer by its HTTP base URL: fetch its /info out of band, gate
    /// on chain id and duplicate identity, then open the persistent gossip
    /// connection.
    pub async fn connect(self: &Arc<Self>, peer_http_url: &str) -> anyhow::Result<NodeInfo> {
        let url = format!("{}/info", peer_http_url.trim_end_matches('/'));
        let client = reqwest::Client::builder()
            .timeout(CONNECT_TIMEOUT)
            .build()
            .context("building http client")?;
        let info: NodeInfo = client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("fetching {url}"))?
            .json()
            .await
            .context("decoding peer info")?;

        let (local_id, local_chain_id) = {
            let node = self.node.lock();
            (node.node_id().to_string(), node.info().chain_id)
        };
        if info.chain_id != local_chain_id {
            bail!("peer {} follows a different chain", info.node_id);
        }
        if info.node_id == local_id {
            bail!("refusing to connect to self");
        }
        if self.peer_ids().contains(&info.node_id) {
            bail!("already connected to peer {}", info.node_id);
        }

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&info.node_url))
            .await
            .context("peer dial timed out")?
            .with_context(|| format!("dialing {}", info.node_url))?;
        info!(peer = info.node_id, addr = info.node_url, "peer connected");
        tokio::spawn(self.clone().run_connection(stream));
        Ok(info)
    }

    pub fn peer_ids(&self) -> Vec<String> {
        self.peers
            .lock()
            .expect("peer registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Gossip a freshly committed block to every peer.
    pub fn broadcast_block(&self, block: Block) {
        self.broadcast(PeerMessage::BroadcastBlock(block), None);
    }

    /// Gossip a freshly admitted transaction to every peer.
    pub fn broadcast_transaction(&self, tx: Transaction) {
        self.broadcast(PeerMessage::BroadcastTransaction(tx), None);
    }

    fn broadcast(&self, message: PeerMessage, except: Option<&str>) {
        let peers = self.peers.lock().expect("peer registry lock poisoned");
        for (id, outbound) in peers.iter() {
            if Some(id.as_str()) == except {
                continue;
            }
            // a dead channel just means the reader task is tearing down
            let _ = outbound.send(message.clone());
        }
    }

    async fn run_connection(self: Arc<Self>, stream: TcpStream) {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (read_half, mut write_half) = stream.into_split();
        let (outbound, mut outbox) = mpsc::unbounded_channel::<PeerMessage>();

        let writer = tokio::spawn(async move {
            while let Some(message) = outbox.recv().await {
                let mut line = match serde_json::to_string(&message) {
                    Ok(line) => line,
                    Err(err) => {
                        warn!(%err, "failed to encode peer message");
                        continue;
                    }
                };
                line.push('\n');
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        // Step 1: either side of a fresh connection opens with a handshake.
        let _ = outbound.send(PeerMessage::HandshakeQuery);

        let mut registered: Option<String> = None;
        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let flow = match serde_json::from_str::<PeerMessage>(&line) {
                        Ok(message) => self.handle_message(&outbound, &mut registered, message),
                        Err(err) => {
                            let _ = outbound.send(PeerMessage::InvalidRequest {
                                reason: err.to_string(),
                            });
                            ControlFlow::Continue(())
                        }
                    };
                    if flow.is_break() {
                        break;
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }

        if let Some(peer_id) = registered {
            self.peers
                .lock()
                .expect("peer registry lock poisoned")
                .remove(&peer_id);
            info!(peer = peer_id, addr = peer_addr, "peer disconnected");
        } else {
            debug!(addr = peer_addr, "unregistered connection closed");
        }
        writer.abort();
    }

    /// One protocol step. Never awaits: node mutations run under the single
    /// node lock, replies and re-broadcasts go through outbound channels.
    fn handle_message(
        &self,
        outbound: &Outbound,
        registered: &mut Option<String>,
        message: PeerMessage,
    ) -> ControlFlow<()> {
        match message {
            PeerMessage::HandshakeQuery => {
                let info = self.node.lock().info();
                let _ = outbound.send(PeerMessage::HandshakeResponse(info));
            }
            PeerMessage::HandshakeResponse(info) => return self.on_handshake(outbound, registered, info),
            PeerMessage::RequestChain => {
                let snapshot = self.node.lock().ledger().snapshot();
                let _ = outbound.send(PeerMessage::ResponseChain(snapshot));
            }
            PeerMessage::ResponseChain(snapshot) => {
                let replaced = self.node.lock().replace_chain(snapshot);
                match replaced {
                    Ok(()) => {
                        let snapshot = self.node.lock().ledger().snapshot();
                        self.broadcast(
                            PeerMessage::ResponseChain(snapshot),
                            registered.as_deref(),
                        );
                    }
                    Err(err) => debug!(%err, "offered chain not adopted"),
                }
            }
            PeerMessage::RequestPendingTx => {
                let pending = self.node.lock().ledger().pending_transactions().to_vec();
                let _ = outbound.send(PeerMessage::ResponsePendingTx(pending));
            }
            PeerMessage::ResponsePendingTx(transactions) => {
                if self.merge_pending(transactions) {
                    let pending = self.node.lock().ledger().pending_transactions().to_vec();
                    self.broadcast(
                        PeerMessage::ResponsePendingTx(pending),
                        registered.as_deref(),
                    );
                }
            }
            PeerMessage::BroadcastBlock(block) => {
                let outcome = self.node.lock().append_block(block.clone());
                match outcome {
                    BlockOutcome::Valid => {
                        info!(index = block.index(), "gossiped block committed");
                        self.broadcast(PeerMessage::BroadcastBlock(block), registered.as_deref());
                    }
                    BlockOutcome::WayAhead => {
                        // We are behind by more than one block; ask everyone
                        // for a full chain.
                        info!(index = block.index(), "chain is behind, requesting full resync");
                        self.broadcast(PeerMessage::RequestChain, None);
                    }
                    BlockOutcome::Invalid | BlockOutcome::AlreadyMined => {
                        debug!(index = block.index(), ?outcome, "gossiped block dropped");
                    }
                }
            }
            PeerMessage::BroadcastTransaction(tx) => {
                let admitted = {
                    let mut node = self.node.lock();
                    if node.ledger().has_pending(tx.data_hash()) {
                        // idempotent gossip: seeing the same transaction
                        // twice is a no-op
                        false
                    } else {
                        node.add_pending_transaction(&draft_of(&tx))
                            .map_err(|err| debug!(%err, "gossiped transaction rejected"))
                            .is_ok()
                    }
                };
                if admitted {
                    self.broadcast(PeerMessage::BroadcastTransaction(tx), registered.as_deref());
                }
            }
            PeerMessage::InvalidRequest { reason } => {
                warn!(reason, "peer flagged our request as invalid");
            }
        }
        ControlFlow::Continue(())
    }

    /// Steps 2-3 of the handshake: gate on chain id, register the peer, then
    /// either pull their chain or their pending pool.
    fn on_handshake(
        &self,
        outbound: &Outbound,
        registered: &mut Option<String>,
        info: NodeInfo,
    ) -> ControlFlow<()> {
        let (local_id, local_chain_id, wants_chain) = {
            let node = self.node.lock();
            (
                node.node_id().to_string(),
                node.ledger().chain_id().to_string(),
                node.should_sync(info.cumulative_difficulty, &info.latest_block_hash),
            )
        };
        if info.chain_id != local_chain_id {
            warn!(peer = info.node_id, "handshake rejected: incompatible chain id");
            return ControlFlow::Break(());
        }
        if info.node_id == local_id {
            debug!("dropping connection to self");
            return ControlFlow::Break(());
        }
        self.peers
            .lock()
            .expect("peer registry lock poisoned")
            .insert(info.node_id.clone(), outbound.clone());
        info!(peer = info.node_id, "handshake complete");
        *registered = Some(info.node_id);

        if wants_chain {
            let _ = outbound.send(PeerMessage::RequestChain);
        } else if info.pending_transactions > 0 {
            let _ = outbound.send(PeerMessage::RequestPendingTx);
        }
        ControlFlow::Continue(())
    }

    /// Admit every unseen pending transaction from a peer's pool. Returns
    /// whether local state changed.
    fn merge_pending(&self, transactions: Vec<Transaction>) -> bool {
        let mut node = self.node.lock();
        let mut changed = false;
        for tx in transactions {
            if node.ledger().has_pending(tx.data_hash()) {
                continue;
            }
            match node.add_pending_transaction(&draft_of(&tx)) {
                Ok(_) => changed = true,
                Err(err) => debug!(%err, hash = tx.data_hash(), "peer pending transaction rejected"),
            }
        }
        changed
    }
}

/// Re-admission treats gossip like any other untrusted submission: rebuild
/// the canonical draft from the declared fields and run the full pipeline.
fn draft_of(tx: &Transaction) -> TransactionDraft {
    TransactionDraft {
        from: tx.from().to_string(),
        to: tx.to().to_string(),
        value: tx.value(),
        fee: tx.fee(),
        date_created: tx.date_created().to_string(),
        data: tx.data().to_string(),
        sender_pub_key: tx.sender_pub_key().to_string(),
        sender_signature: tx.sender_signature().clone(),
        transaction_data_hash: tx.data_hash().to_string(),
    }
}
