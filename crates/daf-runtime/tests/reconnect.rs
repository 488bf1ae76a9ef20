//! Sender resilience tests
//!
//! The peer side of these tests is a raw TCP listener owned by the test, so
//! the connection can be cut and refused deliberately. They hold the sender
//! to its contract: a broken link is reopened and the undelivered message is
//! retransmitted before anything newer, and a peer that stays unreachable
//! produces an error-marker file while the node keeps serving local work.

use daf_core::{MessageCodec, RuntimeConfig};
use daf_runtime::{ClusterDef, NodeBuilder, NodeDef, NodeRuntime, QueueDef};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};

fn cluster(alpha_base: u16, beta_message_port: u16) -> ClusterDef {
    ClusterDef {
        name: "pair".to_string(),
        nodes: vec![
            NodeDef {
                name: "alpha".to_string(),
                address: "127.0.0.1".to_string(),
                message_port: alpha_base,
                admin_port: alpha_base + 1,
            },
            NodeDef {
                name: "beta".to_string(),
                address: "127.0.0.1".to_string(),
                message_port: beta_message_port,
                admin_port: 1,
            },
        ],
        queues: vec![QueueDef::new("work", "beta")],
        tasks: Vec::new(),
    }
}

async fn start_alpha(alpha_base: u16, beta_message_port: u16, config: RuntimeConfig) -> NodeRuntime {
    let mut alpha = NodeBuilder::new("alpha")
        .with_cluster(cluster(alpha_base, beta_message_port))
        .with_config(config)
        .build()
        .expect("Failed to build alpha");
    alpha.start().await.expect("Failed to start alpha");
    alpha
}

async fn send_seq(alpha: &NodeRuntime, seq: i64) {
    let port = alpha
        .context()
        .ports()
        .create_port("emitter", "work")
        .expect("Failed to open remote port");
    let mut msg = alpha.context().factory().create();
    msg.set_value("seq", seq);
    port.send(msg).await.expect("Failed to send");
}

async fn read_frame(conn: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; 4];
    conn.read_exact(&mut header)
        .await
        .expect("Failed to read frame header");
    let len = u32::from_be_bytes(header) as usize;
    let mut body = vec![0u8; len];
    conn.read_exact(&mut body)
        .await
        .expect("Failed to read frame body");
    body
}

#[tokio::test]
async fn test_reconnect_retransmits_the_undelivered_message_in_order() {
    let peer = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind fake peer");
    let peer_port = peer.local_addr().expect("Failed to read peer addr").port();

    let config = RuntimeConfig {
        connection_retry_ms: 25,
        ..RuntimeConfig::default()
    };
    let mut alpha = start_alpha(18751, peer_port, config).await;
    let mut codec = MessageCodec::new(8 * 1024 * 1024);

    send_seq(&alpha, 1).await;
    let (mut conn, _) = timeout(Duration::from_secs(5), peer.accept())
        .await
        .expect("Sender never connected")
        .expect("Accept failed");
    let first = codec
        .decode(&read_frame(&mut conn).await)
        .expect("Failed to decode first frame");
    assert_eq!(first.value("seq").and_then(|v| v.as_int()), Some(1));

    // Reset the connection under the sender, then give the peer's kernel a
    // moment to deliver the RST before the next write.
    conn.set_linger(Some(Duration::ZERO))
        .expect("Failed to arm the reset");
    drop(conn);
    tokio::time::sleep(Duration::from_millis(100)).await;

    send_seq(&alpha, 2).await;
    send_seq(&alpha, 3).await;

    let (mut conn, _) = timeout(Duration::from_secs(5), peer.accept())
        .await
        .expect("Sender never reconnected")
        .expect("Accept failed");
    let second = codec
        .decode(&read_frame(&mut conn).await)
        .expect("Failed to decode second frame");
    let third = codec
        .decode(&read_frame(&mut conn).await)
        .expect("Failed to decode third frame");
    assert_eq!(second.value("seq").and_then(|v| v.as_int()), Some(2));
    assert_eq!(third.value("seq").and_then(|v| v.as_int()), Some(3));

    alpha.shutdown().await.expect("Failed to shutdown alpha");
}

#[tokio::test]
async fn test_unreachable_peer_writes_the_error_marker_and_node_stays_up() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let marker = dir.path().join("connection-errors");

    let config = RuntimeConfig {
        connection_retry_ms: 5,
        connection_error_file: Some(marker.clone()),
        ..RuntimeConfig::default()
    };
    // Nothing listens on the beta message port; every connect is refused.
    let mut alpha = start_alpha(18761, 9, config).await;

    send_seq(&alpha, 1).await;

    let mut marker_seen = false;
    for _ in 0..200 {
        if marker.exists() {
            marker_seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(marker_seen, "error marker never appeared");
    let written = std::fs::read_to_string(&marker).expect("Failed to read marker");
    assert!(written.contains("beta"));

    // The node keeps serving local traffic while the sender retries.
    assert!(alpha.is_started());
    alpha
        .context()
        .queues()
        .create_queue(&QueueDef::new("scratch", "alpha"));
    let local = alpha
        .context()
        .ports()
        .create_port("worker", "scratch")
        .expect("Failed to open local port");
    let mut msg = alpha.context().factory().create();
    msg.set_value("probe", true);
    local.send(msg).await.expect("Failed to send locally");
    let received = local
        .receive_timeout(Duration::from_secs(1))
        .await
        .expect("Local receive failed")
        .expect("Local message missing");
    assert_eq!(received.value("probe").and_then(|v| v.as_bool()), Some(true));

    alpha.shutdown().await.expect("Failed to shutdown alpha");
}
