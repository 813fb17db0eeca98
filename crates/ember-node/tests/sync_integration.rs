//! End-to-end tests over real sockets: two in-process nodes with their HTTP
//! surfaces and gossip connections, exercising handshake sync, transaction
//! gossip and the way-ahead resync path.

use std::time::Duration;

use tokio::net::TcpListener;

use ember_core::{hashing, MinedBlockResult, Node, Wallet};
use ember_node::api::{router, AppState};
use ember_node::sync::SyncService;
use ember_node::SharedNode;

struct TestNode {
    node: SharedNode,
    sync: std::sync::Arc<SyncService>,
    http_url: String,
}

async fn start_node(name: &str) -> TestNode {
    let sync_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let sync_addr = sync_listener.local_addr().unwrap().to_string();

    let node_id = hashing::sha256_hex(format!("{name}|{}", rand::random::<u64>()).as_bytes());
    let node = SharedNode::new(Node::new(node_id, sync_addr, 0));
    let sync = SyncService::new(node.clone());
    tokio::spawn(sync.clone().serve(sync_listener));

    let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_addr = http_listener.local_addr().unwrap();
    let app = router(AppState {
        node: node.clone(),
        sync: sync.clone(),
    });
    tokio::spawn(async move {
        axum::serve(http_listener, app).await.unwrap();
    });

    TestNode {
        node,
        sync,
        http_url: format!("http://{http_addr}"),
    }
}

/// Drive the candidate/submit cycle directly on a node at difficulty 0.
fn mine_block(node: &SharedNode, miner: &str) {
    let mut guard = node.lock();
    let candidate = guard.prepare_candidate_block(miner);
    let date = hashing::iso_timestamp_now();
    let hash = hashing::block_header_hash(candidate.block_data_hash(), &date, 0);
    let result = MinedBlockResult {
        block_data_hash: candidate.block_data_hash().to_string(),
        date_created: date,
        nonce: 0,
        block_hash: hash,
    };
    assert_eq!(guard.add_mined_block(&result), ember_core::BlockOutcome::Valid);
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[tokio::test]
async fn handshake_pulls_the_heavier_chain() {
    let a = start_node("a").await;
    let b = start_node("b").await;

    mine_block(&a.node, "cccccccccccccccccccccccccccccccccccccccc");
    mine_block(&a.node, "cccccccccccccccccccccccccccccccccccccccc");

    b.sync.connect(&a.http_url).await.unwrap();
    wait_until("b to adopt a's chain", || b.node.lock().ledger().blocks().len() == 3).await;

    assert_eq!(
        a.node.lock().ledger().last_block().block_hash().map(str::to_string),
        b.node.lock().ledger().last_block().block_hash().map(str::to_string),
    );
    wait_until("both peers registered", || {
        a.sync.peer_ids().len() == 1 && b.sync.peer_ids().len() == 1
    })
    .await;
}

#[tokio::test]
async fn transactions_gossip_between_peers() {
    let a = start_node("a").await;
    let b = start_node("b").await;

    let wallet = Wallet::generate();
    mine_block(&a.node, &wallet.address);

    b.sync.connect(&a.http_url).await.unwrap();
    wait_until("b to sync the funded chain", || {
        b.node.lock().ledger().blocks().len() == 2
    })
    .await;

    let draft = wallet
        .create_transaction("f51362b7351ef62253a227a77751ad9b2302f911", 1_000, 10, "gossip")
        .unwrap();
    let response = reqwest::Client::new()
        .post(format!("{}/transactions/send", a.http_url))
        .json(&draft)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    wait_until("the transaction to reach b", || {
        b.node.lock().ledger().has_pending(&draft.transaction_data_hash)
    })
    .await;

    // gossiping the same transaction again is a no-op, not a corruption
    let response = reqwest::Client::new()
        .post(format!("{}/transactions/send", a.http_url))
        .json(&draft)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(b.node.lock().ledger().pending_transactions().len(), 1);
}

#[tokio::test]
async fn way_ahead_block_triggers_a_full_resync() {
    let a = start_node("a").await;
    let b = start_node("b").await;

    b.sync.connect(&a.http_url).await.unwrap();
    wait_until("peers to register", || {
        a.sync.peer_ids().len() == 1 && b.sync.peer_ids().len() == 1
    })
    .await;

    // a advances two blocks without gossiping them
    mine_block(&a.node, "cccccccccccccccccccccccccccccccccccccccc");
    mine_block(&a.node, "cccccccccccccccccccccccccccccccccccccccc");

    // the third block goes through the HTTP mining flow, which broadcasts;
    // b sees index 3 against its genesis tip and requests a full chain
    let client = reqwest::Client::new();
    let job: serde_json::Value = client
        .get(format!(
            "{}/mining/get-mining-job/cccccccccccccccccccccccccccccccccccccccc",
            a.http_url
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let block_data_hash = job["blockDataHash"].as_str().unwrap().to_string();
    let date = hashing::iso_timestamp_now();
    let block_hash = hashing::block_header_hash(&block_data_hash, &date, 0);
    let response = client
        .post(format!("{}/mining/submit-mined-block", a.http_url))
        .json(&MinedBlockResult {
            block_data_hash,
            date_created: date,
            nonce: 0,
            block_hash,
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    wait_until("b to resync the full chain", || {
        b.node.lock().ledger().blocks().len() == 4
    })
    .await;
}

#[tokio::test]
async fn connect_is_rejected_for_duplicate_and_self() {
    let a = start_node("a").await;
    let b = start_node("b").await;

    assert!(a.sync.connect(&a.http_url).await.is_err());

    b.sync.connect(&a.http_url).await.unwrap();
    wait_until("peers to register", || b.sync.peer_ids().len() == 1).await;
    assert!(b.sync.connect(&a.http_url).await.is_err());
}

#[tokio::test]
async fn http_surface_serves_chain_state() {
    let a = start_node("a").await;
    let wallet = Wallet::generate();
    mine_block(&a.node, &wallet.address);

    let client = reqwest::Client::new();
    let info: serde_json::Value = client
        .get(format!("{}/info", a.http_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["blocksCount"], 2);

    let blocks: serde_json::Value = client
        .get(format!("{}/blocks", a.http_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(blocks.as_array().unwrap().len(), 2);

    let missing = client
        .get(format!("{}/blocks/99", a.http_url))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    let balance: serde_json::Value = client
        .get(format!("{}/address/{}/balance", a.http_url, wallet.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(balance["confirmedBalance"], 500_000);
    assert_eq!(balance["safeBalance"], 0);
}
