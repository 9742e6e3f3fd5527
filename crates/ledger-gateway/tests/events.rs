//! Event listener scenarios through the public `Network` API.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use ledger_gateway::testing::{
    channel_with_peers, test_identity, MockEventHub, MockOrderer, MockPeerTransport, CHANNEL,
};
use ledger_gateway::{
    listener_fn, BlockNotification, Checkpointer, CommitStrategy, ConnectionState, EventApi,
    FileCheckpointer, GatewayConfig, GatewayError, InMemoryCheckpointer, ListenerCallback,
    ListenerEvent, ListenerOptions, Network, StartPosition, TransactionNotification, TxFilter,
};

type Events = mpsc::UnboundedReceiver<Result<ListenerEvent, GatewayError>>;

fn network(hub: Arc<MockEventHub>) -> Network {
    Network::builder(
        channel_with_peers(&["p1", "p2"]),
        test_identity(),
        Arc::new(MockPeerTransport::new()),
        Arc::new(MockOrderer::new()),
        hub,
    )
    .config(GatewayConfig::for_testing())
    .commit_strategy(CommitStrategy::NoWait)
    .build()
    .unwrap()
}

fn collector() -> (ListenerCallback, Events) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback = listener_fn(move |event| {
        let _ = tx.send(event);
        Ok(())
    });
    (callback, rx)
}

async fn next(rx: &mut Events) -> Result<ListenerEvent, GatewayError> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event in time")
        .expect("channel open")
}

async fn next_block(rx: &mut Events) -> u64 {
    match next(rx).await {
        Ok(ListenerEvent::Block(event)) => event.block_number,
        other => panic!("expected block, got {other:?}"),
    }
}

fn block(n: u64, txs: &[&str]) -> BlockNotification {
    BlockNotification::new(
        n,
        txs.iter().map(|t| TransactionNotification::valid(*t)).collect(),
    )
}

#[tokio::test]
async fn bounded_replay_completes_at_end_block() {
    let hub = Arc::new(MockEventHub::new());
    let network = network(hub.clone());
    let (cb, mut rx) = collector();
    let options = ListenerOptions {
        end_block: Some(2),
        ..ListenerOptions::replay_from(0)
    };
    network.add_block_listener(cb, options).await.unwrap();

    for n in 0..=3 {
        hub.push("p1", block(n, &[]));
    }

    assert_eq!(next_block(&mut rx).await, 0);
    assert_eq!(next_block(&mut rx).await, 1);
    assert_eq!(next_block(&mut rx).await, 2);
    assert!(matches!(
        next(&mut rx).await,
        Ok(ListenerEvent::Completed { block_number: 2 })
    ));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(network.events().listener_count(), 0);
}

#[tokio::test]
async fn premature_end_marker_fails_the_listener() {
    let hub = Arc::new(MockEventHub::new());
    let network = network(hub.clone());
    let (cb, mut rx) = collector();
    let options = ListenerOptions {
        end_block: Some(10),
        ..ListenerOptions::replay_from(0)
    };
    network.add_block_listener(cb, options).await.unwrap();

    hub.push("p1", block(0, &[]));
    hub.push("p1", BlockNotification::end_of_range(4));

    assert_eq!(next_block(&mut rx).await, 0);
    match next(&mut rx).await {
        Err(GatewayError::PrematureEnd {
            block_number,
            end_block,
        }) => {
            assert_eq!(block_number, 4);
            assert_eq!(end_block, 10);
        }
        other => panic!("unexpected {other:?}"),
    }
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(network.events().listener_count(), 0);
}

#[tokio::test]
async fn end_marker_at_end_block_completes() {
    let hub = Arc::new(MockEventHub::new());
    let network = network(hub.clone());
    let (cb, mut rx) = collector();
    let options = ListenerOptions {
        end_block: Some(1),
        ..ListenerOptions::replay_from(0)
    };
    network
        .add_commit_listener(TxFilter::Any, cb, options)
        .await
        .unwrap();

    hub.push("p1", block(0, &["tx0"]));
    hub.push("p1", BlockNotification::end_of_range(1));

    assert!(matches!(next(&mut rx).await, Ok(ListenerEvent::Commit(_))));
    assert!(matches!(
        next(&mut rx).await,
        Ok(ListenerEvent::Completed { block_number: 1 })
    ));
}

#[tokio::test]
async fn replay_resumes_from_file_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let checkpointer = Arc::new(FileCheckpointer::new(dir.path()).await.unwrap());
    let hub = Arc::new(MockEventHub::new());
    let network = network(hub.clone());
    let options = ListenerOptions {
        listener_name: Some("indexer".into()),
        checkpointer: Some(checkpointer.clone()),
        ..ListenerOptions::replay_from(0)
    };

    let (cb, mut rx) = collector();
    let handle = network
        .add_commit_listener(TxFilter::Any, cb, options.clone())
        .await
        .unwrap();
    hub.push("p1", block(5, &["a", "b"]));
    assert!(matches!(next(&mut rx).await, Ok(ListenerEvent::Commit(_))));
    assert!(matches!(next(&mut rx).await, Ok(ListenerEvent::Commit(_))));
    tokio::time::sleep(Duration::from_millis(30)).await;
    network.unregister(&handle).unwrap();

    let saved = checkpointer.load(CHANNEL, "indexer").await.unwrap().unwrap();
    assert_eq!(saved.block_number, 5);
    assert!(saved.block_complete);

    let (cb, _rx) = collector();
    network
        .add_commit_listener(TxFilter::Any, cb, options)
        .await
        .unwrap();
    assert!(hub.wait_for_opens("p1", 2).await);
    assert_eq!(hub.opened_for("p1")[1], StartPosition::Block(6));
}

#[tokio::test]
async fn partially_processed_block_skips_seen_transactions() {
    let checkpointer = Arc::new(InMemoryCheckpointer::new());
    checkpointer.save(CHANNEL, "audit", 3, Some("a")).await.unwrap();

    let hub = Arc::new(MockEventHub::new());
    let network = network(hub.clone());
    let (cb, mut rx) = collector();
    let options = ListenerOptions {
        listener_name: Some("audit".into()),
        checkpointer: Some(checkpointer),
        ..ListenerOptions::replay_from(0)
    };
    network
        .add_commit_listener(TxFilter::Any, cb, options)
        .await
        .unwrap();
    assert!(hub.wait_for_opens("p1", 1).await);
    assert_eq!(hub.opened_for("p1"), vec![StartPosition::Block(3)]);

    hub.push("p1", block(3, &["a", "b"]));
    match next(&mut rx).await {
        Ok(ListenerEvent::Commit(event)) => assert_eq!(event.transaction.tx_id, "b"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn live_stream_reconnects_after_drop() {
    let hub = Arc::new(MockEventHub::new());
    let network = network(hub.clone());
    let (cb, mut rx) = collector();
    network
        .add_block_listener(cb, ListenerOptions::default())
        .await
        .unwrap();

    hub.push("p1", block(20, &[]));
    assert_eq!(next_block(&mut rx).await, 20);

    hub.fail_opens("p1", 1);
    hub.disconnect("p1");
    assert!(hub.wait_for_opens("p1", 3).await);
    assert_eq!(
        hub.opened_for("p1"),
        vec![
            StartPosition::Newest,
            StartPosition::Block(21),
            StartPosition::Block(21)
        ]
    );

    hub.push("p1", block(21, &[]));
    assert_eq!(next_block(&mut rx).await, 21);
    assert_eq!(network.connection_state("p1"), Some(ConnectionState::Ready));
}

#[tokio::test]
async fn lost_stream_reports_disconnect_to_every_listener() {
    let hub = Arc::new(MockEventHub::new());
    let network = network(hub.clone());
    let (block_cb, mut blocks) = collector();
    let (commit_cb, mut commits) = collector();
    network
        .add_block_listener(block_cb, ListenerOptions::default())
        .await
        .unwrap();
    network
        .add_commit_listener(TxFilter::Any, commit_cb, ListenerOptions::default())
        .await
        .unwrap();
    assert!(hub.wait_for_opens("p1", 1).await);

    hub.set_unreachable("p1", true);
    hub.disconnect("p1");

    assert!(matches!(
        next(&mut blocks).await,
        Err(GatewayError::StreamDisconnected { .. })
    ));
    assert!(matches!(
        next(&mut commits).await,
        Err(GatewayError::StreamDisconnected { .. })
    ));
    assert_eq!(
        network.connection_state("p1"),
        Some(ConnectionState::FatalFailure)
    );
    assert_eq!(network.events().listener_count(), 0);
}

#[tokio::test]
async fn one_replay_per_peer_stream() {
    let hub = Arc::new(MockEventHub::new());
    let network = network(hub);
    let (cb, _rx) = collector();

    network
        .add_block_listener(cb.clone(), ListenerOptions::replay_from(1))
        .await
        .unwrap();
    match network
        .add_commit_listener(TxFilter::Any, cb, ListenerOptions::replay_from(1))
        .await
    {
        Err(GatewayError::ReplayAlreadyRegistered { peer }) => assert_eq!(peer, "p1"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn listener_on_submitted_transaction_id() {
    let hub = Arc::new(MockEventHub::new());
    let network = network(hub.clone());
    let tx = network.contract("basic").create_transaction("CreateAsset");
    let (cb, mut rx) = collector();
    network
        .add_commit_listener(
            TxFilter::Id(tx.transaction_id().to_string()),
            cb,
            ListenerOptions::default(),
        )
        .await
        .unwrap();

    tx.submit(vec![]).await.unwrap();
    hub.commit(&["p1"], tx.transaction_id().as_str(), "VALID");

    match next(&mut rx).await {
        Ok(ListenerEvent::Commit(event)) => {
            assert_eq!(event.transaction.tx_id, tx.transaction_id().as_str());
            assert!(event.transaction.is_valid());
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn close_shuts_down_streams() {
    let hub = Arc::new(MockEventHub::new());
    let network = network(hub.clone());
    let (cb, _rx) = collector();
    network
        .add_block_listener(cb, ListenerOptions::default())
        .await
        .unwrap();
    assert!(hub.wait_for_opens("p1", 1).await);

    network.close();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(network.events().listener_count(), 0);
    assert_eq!(network.connection_state("p1"), Some(ConnectionState::Shutdown));
}
