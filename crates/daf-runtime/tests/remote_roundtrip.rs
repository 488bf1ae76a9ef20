//! Cross-node messaging tests
//!
//! Runs two real node runtimes in one process, connected over loopback TCP,
//! and exercises the remote port paths: plain sends into a queue owned by
//! the other node, and blocking receives that dequeue from the other node
//! by proxy (remove/return), in both the parked and the buffered ordering.

use daf_core::RuntimeConfig;
use daf_runtime::{ClusterDef, NodeBuilder, NodeDef, NodeRuntime, QueueDef, TaskDef};
use tokio::time::{timeout, Duration};

fn cluster(base_port: u16) -> ClusterDef {
    ClusterDef {
        name: "pair".to_string(),
        nodes: vec![
            NodeDef {
                name: "alpha".to_string(),
                address: "127.0.0.1".to_string(),
                message_port: base_port,
                admin_port: base_port + 1,
            },
            NodeDef {
                name: "beta".to_string(),
                address: "127.0.0.1".to_string(),
                message_port: base_port + 2,
                admin_port: base_port + 3,
            },
        ],
        queues: vec![QueueDef::new("work", "alpha")],
        tasks: vec![TaskDef::new("collector", "daf.log-sink", "beta").with_queue("work")],
    }
}

async fn start_pair(base_port: u16) -> (NodeRuntime, NodeRuntime) {
    let config = RuntimeConfig {
        connection_retry_ms: 100,
        application_start_delay_ms: 0,
        ..RuntimeConfig::default()
    };

    let mut alpha = NodeBuilder::new("alpha")
        .with_cluster(cluster(base_port))
        .with_config(config.clone())
        .with_builtin_tasks()
        .build()
        .expect("Failed to build alpha");
    let mut beta = NodeBuilder::new("beta")
        .with_cluster(cluster(base_port))
        .with_config(config)
        .with_builtin_tasks()
        .build()
        .expect("Failed to build beta");

    alpha.start().await.expect("Failed to start alpha");
    beta.start().await.expect("Failed to start beta");

    // The queue lives on alpha; peers only know its owner.
    alpha
        .context()
        .queues()
        .create_queue(&QueueDef::new("work", "alpha"));

    (alpha, beta)
}

#[tokio::test]
async fn test_send_to_a_queue_on_another_node() {
    let (mut alpha, mut beta) = start_pair(18711).await;

    let emitter = beta
        .context()
        .ports()
        .create_port("emitter", "work")
        .expect("Failed to open remote port");
    let sink = alpha
        .context()
        .ports()
        .create_port("sink", "work")
        .expect("Failed to open local port");

    let mut msg = beta.context().factory().create();
    msg.set_value("greeting", "hello from beta");
    emitter.send(msg).await.expect("Failed to send");

    let received = timeout(Duration::from_secs(5), sink.receive())
        .await
        .expect("Delivery timed out")
        .expect("Receive failed");

    assert_eq!(received.sender(), "emitter");
    assert_eq!(received.recipient(), "work");
    assert_eq!(
        received.value("greeting").and_then(|v| v.as_str()),
        Some("hello from beta")
    );

    beta.shutdown().await.expect("Failed to shutdown beta");
    alpha.shutdown().await.expect("Failed to shutdown alpha");
}

#[tokio::test]
async fn test_remote_receive_parks_until_a_message_arrives() {
    let (mut alpha, mut beta) = start_pair(18721).await;

    let collector = beta
        .context()
        .ports()
        .create_port("collector", "work")
        .expect("Failed to open remote port");

    // Start the blocking receive before anything is queued so the dequeue
    // request parks on alpha.
    let pending = tokio::spawn(async move { collector.receive().await });
    tokio::time::sleep(Duration::from_millis(300)).await;

    let producer = alpha
        .context()
        .ports()
        .create_port("producer", "work")
        .expect("Failed to open local port");
    let mut msg = alpha.context().factory().create();
    msg.set_value("seq", 7i64);
    producer.send(msg).await.expect("Failed to send");

    let received = timeout(Duration::from_secs(5), pending)
        .await
        .expect("Remote receive timed out")
        .expect("Receiver task panicked")
        .expect("Remote receive failed");
    assert_eq!(received.value("seq").and_then(|v| v.as_int()), Some(7));

    beta.shutdown().await.expect("Failed to shutdown beta");
    alpha.shutdown().await.expect("Failed to shutdown alpha");
}

#[tokio::test]
async fn test_remote_receive_drains_an_already_queued_message() {
    let (mut alpha, mut beta) = start_pair(18731).await;

    let producer = alpha
        .context()
        .ports()
        .create_port("producer", "work")
        .expect("Failed to open local port");
    let mut msg = alpha.context().factory().create();
    msg.set_value("seq", 11i64);
    producer.send(msg).await.expect("Failed to send");

    let collector = beta
        .context()
        .ports()
        .create_port("collector", "work")
        .expect("Failed to open remote port");
    let received = collector
        .receive_timeout(Duration::from_secs(5))
        .await
        .expect("Remote receive failed")
        .expect("Queued message never came back");
    assert_eq!(received.value("seq").and_then(|v| v.as_int()), Some(11));

    beta.shutdown().await.expect("Failed to shutdown beta");
    alpha.shutdown().await.expect("Failed to shutdown alpha");
}

#[tokio::test]
async fn test_cross_node_delivery_preserves_send_order() {
    let (mut alpha, mut beta) = start_pair(18741).await;

    let emitter = beta
        .context()
        .ports()
        .create_port("emitter", "work")
        .expect("Failed to open remote port");
    let sink = alpha
        .context()
        .ports()
        .create_port("sink", "work")
        .expect("Failed to open local port");

    for seq in 0..20i64 {
        let mut msg = beta.context().factory().create();
        msg.set_value("seq", seq);
        emitter.send(msg).await.expect("Failed to send");
    }

    for expected in 0..20i64 {
        let received = timeout(Duration::from_secs(5), sink.receive())
            .await
            .expect("Delivery timed out")
            .expect("Receive failed");
        assert_eq!(
            received.value("seq").and_then(|v| v.as_int()),
            Some(expected)
        );
    }

    beta.shutdown().await.expect("Failed to shutdown beta");
    alpha.shutdown().await.expect("Failed to shutdown alpha");
}
