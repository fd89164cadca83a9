//! Integration tests for the control-plane dispatcher
//!
//! Each test drives one or two real nodes (control listener + peer
//! acceptor on ephemeral ports, TCP peer transport) through `Sender`,
//! exactly the way the CLI does.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use pl_core::config::NodeConfig;
use pl_core::error::SessionError;
use pl_core::{Direction, HostId, SessionStatus};
use pl_node::dispatch::{run_peer_acceptor, ControlListener};
use pl_node::transport::TcpPeerTransport;
use pl_node::variant::{ForwardServiceParams, PortForwardVariant, Variant, VariantContext};
use pl_node::{NodeError, NodeState, Sender};
use pl_protocol::{status, MessageKind, Opcode, PoolId, ProtocolCode};

const TEST_DEADLINE: Duration = Duration::from_secs(10);

struct TestNode {
    state: Arc<NodeState>,
    control: SocketAddr,
    peer: SocketAddr,
    cancel: CancellationToken,
}

impl TestNode {
    async fn start(peers: HashMap<String, String>) -> Self {
        let config = NodeConfig {
            control_port: 0,
            peer_port: 0,
            connect_timeout: Duration::from_secs(2),
            peers: peers.clone(),
            ..NodeConfig::default()
        };

        let transport = TcpPeerTransport::bind("127.0.0.1:0", peers, config.connect_timeout)
            .await
            .unwrap();
        let peer = transport.local_addr().unwrap();

        let state = NodeState::new(config, Arc::new(transport));
        let listener = ControlListener::bind(Arc::clone(&state)).await.unwrap();
        let control = listener.local_addr().unwrap();

        let cancel = CancellationToken::new();
        tokio::spawn(run_peer_acceptor(Arc::clone(&state), cancel.clone()));
        tokio::spawn(listener.run(cancel.clone()));

        Self {
            state,
            control,
            peer,
            cancel,
        }
    }

    fn control_address(&self) -> String {
        self.control.to_string()
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// TCP echo service standing in for a forwarded application
async fn spawn_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 || socket.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    addr
}

fn forward_payload(host: &str, target_port: u16) -> Bytes {
    let params = ForwardServiceParams {
        host: HostId::new(host),
        target_port,
    };
    Bytes::from(bincode::serialize(&params).unwrap())
}

fn forward_up(node: &TestNode, pair_id: &str, host: &str, target_port: u16) -> Sender {
    Sender::from_parts(
        MessageKind::new(Opcode::Up, ProtocolCode::ForwardService),
        pair_id,
        forward_payload(host, target_port),
        node.control_address(),
    )
}

fn request(node: &TestNode, opcode: Opcode, protocol: ProtocolCode, pair_id: &str) -> Sender {
    Sender::from_parts(
        MessageKind::new(opcode, protocol),
        pair_id,
        Bytes::new(),
        node.control_address(),
    )
}

fn rejected_status(err: NodeError) -> i32 {
    match err {
        NodeError::Session(SessionError::Rejected { status }) => status,
        other => panic!("Expected a rejected request, got {:?}", other.to_string()),
    }
}

async fn stat_one(node: &TestNode, pair_id: &str) -> Result<SessionStatus, NodeError> {
    let sender = request(node, Opcode::Stat, ProtocolCode::ForwardService, pair_id);
    let (_stream, response) = sender.send().await?;
    let mut sessions: Vec<SessionStatus> = bincode::deserialize(&response.payload).unwrap();
    Ok(sessions.pop().unwrap())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stat_unknown_session_reports_not_found() {
    let node = TestNode::start(HashMap::new()).await;
    let missing = PoolId::mint(ProtocolCode::ForwardService).to_string();

    let err = stat_one(&node, &missing).await.unwrap_err();
    assert_eq!(rejected_status(err), status::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_down_is_idempotent() {
    let node = TestNode::start(HashMap::new()).await;
    let missing = PoolId::mint(ProtocolCode::ForwardService).to_string();

    for _ in 0..2 {
        let sender = request(&node, Opcode::Down, ProtocolCode::ForwardService, &missing);
        sender.send().await.unwrap();
    }
    assert!(node.state.table.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_attach_unknown_session_reports_not_found() {
    let node = TestNode::start(HashMap::new()).await;
    let missing = PoolId::mint(ProtocolCode::ForwardService).to_string();

    let sender = request(&node, Opcode::Attach, ProtocolCode::ForwardService, &missing);
    let err = sender.send().await.unwrap_err();
    assert_eq!(rejected_status(err), status::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_up_with_garbage_payload_is_rejected() {
    let node = TestNode::start(HashMap::new()).await;

    let sender = Sender::from_parts(
        MessageKind::new(Opcode::Up, ProtocolCode::ForwardService),
        "",
        Bytes::from_static(&[0xFF, 0x00, 0x01]),
        node.control_address(),
    );
    let err = sender.send().await.unwrap_err();
    assert_eq!(rejected_status(err), status::DECODE);
    assert!(node.state.table.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_forward_session_end_to_end() {
    let echo = spawn_echo().await;
    let far = TestNode::start(HashMap::new()).await;

    let mut peers = HashMap::new();
    peers.insert("bob".to_string(), far.peer.to_string());
    let near = TestNode::start(peers).await;

    // Open a forward-service session to "bob" targeting the echo port.
    let sender = forward_up(&near, "", "bob", echo.port());
    let (mut stream, response) = timeout(TEST_DEADLINE, sender.send())
        .await
        .unwrap()
        .unwrap();
    let pair_id = response.pair_id.clone();
    assert!(!pair_id.is_empty());

    // Bytes must arrive at the forwarded service and come back verbatim.
    stream.write_all(b"hello tunnel").await.unwrap();
    let mut echoed = [0u8; 12];
    timeout(TEST_DEADLINE, stream.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, b"hello tunnel");

    // Status reflects an established outbound session.
    let status = stat_one(&near, &pair_id).await.unwrap();
    assert!(status.ready);
    assert_eq!(status.direction, Direction::Outbound);
    assert_eq!(status.target, "bob");

    // Both halves share the pair id.
    assert!(far.state.table.get(&pair_id).is_some());
    let far_status = far.state.table.get(&pair_id).unwrap().status();
    assert_eq!(far_status.direction, Direction::Inbound);

    // Teardown drains both tables; the far side learns via the notice.
    let sender = request(&near, Opcode::Down, ProtocolCode::ForwardService, &pair_id);
    sender.send().await.unwrap();

    timeout(TEST_DEADLINE, async {
        while !near.state.table.is_empty() || !far.state.table.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_initiator_pair_id_is_adopted_by_acceptor() {
    let echo = spawn_echo().await;
    let far = TestNode::start(HashMap::new()).await;

    let mut peers = HashMap::new();
    peers.insert("bob".to_string(), far.peer.to_string());
    let near = TestNode::start(peers).await;

    let minted = PoolId::mint(ProtocolCode::ForwardService).to_string();
    let sender = forward_up(&near, &minted, "bob", echo.port());
    let (mut stream, response) = timeout(TEST_DEADLINE, sender.send())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.pair_id, minted);

    // Round-trip a byte so the far half is certainly registered.
    stream.write_all(b"x").await.unwrap();
    let mut one = [0u8; 1];
    timeout(TEST_DEADLINE, stream.read_exact(&mut one))
        .await
        .unwrap()
        .unwrap();

    assert!(far.state.table.get(&minted).is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_up_then_immediate_down_leaks_nothing() {
    // A peer entry that points nowhere reachable keeps the dial
    // in flight long enough for the teardown to race it.
    let mut peers = HashMap::new();
    peers.insert("ghost".to_string(), "203.0.113.1:9".to_string());
    let node = TestNode::start(peers).await;

    let sender = forward_up(&node, "", "ghost", 4242);
    let (_stream, response) = timeout(TEST_DEADLINE, sender.send())
        .await
        .unwrap()
        .unwrap();
    let pair_id = response.pair_id;

    let sender = request(&node, Opcode::Down, ProtocolCode::ForwardService, &pair_id);
    sender.send().await.unwrap();

    // Whether the dial was cancelled or failed on its own, no table
    // entry may survive.
    timeout(TEST_DEADLINE, async {
        while !node.state.table.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let err = stat_one(&node, &pair_id).await.unwrap_err();
    assert_eq!(rejected_status(err), status::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_attach_rebinds_traffic_to_new_endpoint() {
    let echo = spawn_echo().await;
    let far = TestNode::start(HashMap::new()).await;

    let mut peers = HashMap::new();
    peers.insert("bob".to_string(), far.peer.to_string());
    let near = TestNode::start(peers).await;

    let sender = forward_up(&near, "", "bob", echo.port());
    let (mut stream, response) = timeout(TEST_DEADLINE, sender.send())
        .await
        .unwrap()
        .unwrap();
    let pair_id = response.pair_id.clone();

    stream.write_all(b"before").await.unwrap();
    let mut buf = [0u8; 6];
    timeout(TEST_DEADLINE, stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();

    // Lose the local endpoint abruptly (RST, not a clean end-of-stream)
    // so the session parks instead of tearing down.
    let raw = stream.into_inner();
    raw.set_linger(Some(Duration::ZERO)).unwrap();
    drop(raw);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The session must still exist, and attach must hand it this socket.
    let sender = request(&near, Opcode::Attach, ProtocolCode::ForwardService, &pair_id);
    let (mut rebound, _) = timeout(TEST_DEADLINE, sender.send())
        .await
        .unwrap()
        .unwrap();

    rebound.write_all(b"after!").await.unwrap();
    let mut buf = [0u8; 6];
    timeout(TEST_DEADLINE, rebound.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"after!");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_port_forward_accept_loop_end_to_end() {
    let echo = spawn_echo().await;
    let far = TestNode::start(HashMap::new()).await;

    let mut peers = HashMap::new();
    peers.insert("bob".to_string(), far.peer.to_string());
    let near = TestNode::start(peers).await;

    // Grab a free local port for the forward listener.
    let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listen_port = probe.local_addr().unwrap().port();
    drop(probe);

    let ctx = VariantContext {
        control_address: near.control_address(),
        shell_address: "127.0.0.1:22".to_string(),
        connect_timeout: Duration::from_secs(2),
        known_hosts_path: std::env::temp_dir().join("peerlink-test-hosts"),
        accept_changed_host_keys: false,
    };
    let mut variant = Variant::PortForward(PortForwardVariant::new(
        HostId::new("bob"),
        listen_port,
        echo.port(),
    ));
    variant.init(&ctx);
    variant.prepare().unwrap();
    let forward = tokio::spawn(async move { variant.dial().await });

    // The accept loop comes up asynchronously; poll until it answers.
    let mut client = timeout(TEST_DEADLINE, async {
        loop {
            match tokio::net::TcpStream::connect(("127.0.0.1", listen_port)).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
    })
    .await
    .unwrap();

    // Bytes reach the far echo service byte-for-byte and come back.
    client.write_all(b"forwarded").await.unwrap();
    let mut buf = [0u8; 9];
    timeout(TEST_DEADLINE, client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"forwarded");

    // Tearing down the registration stops the accept loop.
    let registration = near
        .state
        .table
        .list()
        .into_iter()
        .find(|s| s.protocol == ProtocolCode::PortForward.as_u16())
        .expect("forward registration should be in the table");
    let sender = request(
        &near,
        Opcode::Down,
        ProtocolCode::PortForward,
        &registration.pair_id,
    );
    sender.send().await.unwrap();

    timeout(TEST_DEADLINE, forward)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_sessions_get_distinct_pool_ids() {
    let echo = spawn_echo().await;
    let far = TestNode::start(HashMap::new()).await;

    let mut peers = HashMap::new();
    peers.insert("bob".to_string(), far.peer.to_string());
    let near = Arc::new(TestNode::start(peers).await);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let sender = forward_up(&near, "", "bob", echo.port());
        handles.push(tokio::spawn(async move {
            let (mut stream, response) = sender.send().await.unwrap();
            // Exercise the session so it is fully established, not
            // just registered.
            stream.write_all(b"ping").await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            response.pair_id
        }));
    }

    let mut pair_ids = std::collections::HashSet::new();
    for handle in handles {
        let pair_id = timeout(TEST_DEADLINE, handle).await.unwrap().unwrap();
        assert!(pair_ids.insert(pair_id));
    }
    assert_eq!(near.state.table.len(), 16);
}
