//! Thin HTTP glue over the node core. Handlers take the node lock, call one
//! core operation, map the result to a status code and re-broadcast through
//! the sync service where the protocol calls for it.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::warn;

use ember_core::{Block, BlockOutcome, MinedBlockResult, Transaction, TransactionDraft};

use crate::sync::SyncService;
use crate::SharedNode;

#[derive(Clone)]
pub struct AppState {
    pub node: SharedNode,
    pub sync: Arc<SyncService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/info", get(info))
        .route("/blocks", get(blocks))
        .route("/blocks/{index}", get(block_by_index))
        .route("/transactions/confirmed", get(confirmed_transactions))
        .route("/transactions/pending", get(pending_transactions))
        .route("/transactions/send", post(send_transaction))
        .route("/transactions/{hash}", get(transaction_by_hash))
        .route("/address/{address}/balance", get(address_balance))
        .route("/address/{address}/transactions", get(address_transactions))
        .route("/mining/get-mining-job/{address}", get(mining_job))
        .route("/mining/submit-mined-block", post(submit_mined_block))
        .route("/peers", get(peers))
        .route("/peers/connect", post(connect_peer))
        .route("/debug/reset-chain", get(reset_chain))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn info(State(state): State<AppState>) -> Json<ember_core::NodeInfo> {
    Json(state.node.lock().info())
}

async fn blocks(State(state): State<AppState>) -> Json<Vec<Block>> {
    Json(state.node.lock().ledger().blocks().to_vec())
}

async fn block_by_index(
    State(state): State<AppState>,
    Path(index): Path<u64>,
) -> Result<Json<Block>, (StatusCode, Json<Value>)> {
    state
        .node
        .lock()
        .ledger()
        .block_by_index(index)
        .cloned()
        .map(Json)
        .ok_or_else(|| not_found("Invalid block index"))
}

async fn confirmed_transactions(State(state): State<AppState>) -> Json<Vec<Transaction>> {
    let node = state.node.lock();
    Json(
        node.ledger()
            .blocks()
            .iter()
            .flat_map(|b| b.transactions())
            .cloned()
            .collect(),
    )
}

async fn pending_transactions(State(state): State<AppState>) -> Json<Vec<Transaction>> {
    Json(state.node.lock().ledger().pending_transactions().to_vec())
}

async fn transaction_by_hash(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<Transaction>, (StatusCode, Json<Value>)> {
    state
        .node
        .lock()
        .ledger()
        .find_transaction(&hash)
        .cloned()
        .map(Json)
        .ok_or_else(|| not_found("Transaction not found"))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BalanceView {
    safe_balance: i128,
    confirmed_balance: i128,
    pending_balance: i128,
}

async fn address_balance(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Json<BalanceView> {
    let node = state.node.lock();
    let ledger = node.ledger();
    Json(BalanceView {
        safe_balance: ledger.safe_balance(&address),
        confirmed_balance: ledger.confirmed_balance(&address),
        pending_balance: ledger.pending_balance(&address),
    })
}

async fn address_transactions(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Json<Vec<Transaction>> {
    Json(state.node.lock().ledger().transactions_of_address(&address))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MiningJobView {
    index: u64,
    transactions_included: usize,
    difficulty: u32,
    expected_reward: u64,
    reward_address: String,
    block_data_hash: String,
}

async fn mining_job(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<MiningJobView>, (StatusCode, Json<Value>)> {
    if !ember_core::node::is_valid_address(&address) {
        return Err(bad_request("Invalid miner address"));
    }
    let candidate = state.node.lock().prepare_candidate_block(&address);
    Ok(Json(MiningJobView {
        index: candidate.index(),
        transactions_included: candidate.transactions().len(),
        difficulty: candidate.difficulty(),
        expected_reward: candidate.transactions()[0].value(),
        reward_address: address,
        block_data_hash: candidate.block_data_hash().to_string(),
    }))
}

async fn submit_mined_block(
    State(state): State<AppState>,
    Json(result): Json<MinedBlockResult>,
) -> (StatusCode, Json<Value>) {
    let (outcome, committed) = {
        let mut node = state.node.lock();
        let outcome = node.add_mined_block(&result);
        let committed = (outcome == BlockOutcome::Valid)
            .then(|| node.ledger().last_block().clone());
        (outcome, committed)
    };
    match outcome {
        BlockOutcome::Valid => {
            let block = committed.expect("valid outcome always has a tip");
            let message = format!("Block accepted, reward paid: {} microcoins", block.transactions()[0].value());
            state.sync.broadcast_block(block);
            (StatusCode::OK, Json(json!({ "message": message })))
        }
        BlockOutcome::AlreadyMined => (
            StatusCode::NOT_FOUND,
            Json(json!({ "errorMsg": "Block not found or already mined" })),
        ),
        BlockOutcome::Invalid | BlockOutcome::WayAhead => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "errorMsg": "Block hash is not valid" })),
        ),
    }
}

async fn send_transaction(
    State(state): State<AppState>,
    Json(draft): Json<TransactionDraft>,
) -> (StatusCode, Json<Value>) {
    let admitted = state.node.lock().add_pending_transaction(&draft);
    match admitted {
        Ok(tx) => {
            let hash = tx.data_hash().to_string();
            state.sync.broadcast_transaction(tx);
            (
                StatusCode::CREATED,
                Json(json!({ "transactionDataHash": hash })),
            )
        }
        Err(err) => {
            warn!(%err, "transaction rejected");
            (StatusCode::BAD_REQUEST, Json(json!({ "errorMsg": err.to_string() })))
        }
    }
}

async fn peers(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.sync.peer_ids())
}

#[derive(Deserialize)]
struct ConnectRequest {
    peer: String,
}

async fn connect_peer(
    State(state): State<AppState>,
    Json(request): Json<ConnectRequest>,
) -> (StatusCode, Json<Value>) {
    match state.sync.connect(&request.peer).await {
        Ok(info) => (
            StatusCode::OK,
            Json(json!({ "message": format!("Connected to peer {}", info.node_id) })),
        ),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "errorMsg": err.to_string() })),
        ),
    }
}

async fn reset_chain(State(state): State<AppState>) -> Json<Value> {
    state.node.lock().reset_chain();
    Json(json!({ "message": "The chain was reset to its genesis block" }))
}

fn not_found(msg: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "errorMsg": msg })))
}

fn bad_request(msg: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "errorMsg": msg })))
}
