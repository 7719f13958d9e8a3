//! End-to-end scenarios exercising `Forwarder` across two (or more) agents
//! joined by an in-process overlay. TCP echo is covered by
//! `forwarder::tests::end_to_end_tcp_echo_through_two_agents`; these cover
//! the remaining scenarios.

use forwarder_agent::testutil::MockNetwork;
use forwarder_agent::{new_forwarder, Forwarder};
use forwarder_core::error::ForwarderError;
use forwarder_core::identity::Keypair;
use forwarder_core::protocol::ProtoTag;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::sleep;

async fn settle() {
    sleep(Duration::from_millis(120)).await;
}

async fn connect_tcp_retrying(ip: Ipv4Addr, port: u16, attempts: u32) -> Option<TcpStream> {
    for _ in 0..attempts {
        if let Ok(conn) = TcpStream::connect((ip, port)).await {
            return Some(conn);
        }
        sleep(Duration::from_millis(50)).await;
    }
    None
}

async fn spawn_tcp_echo() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let (mut conn, _) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => break,
            };
            tokio::spawn(async move {
                use tokio::io::{AsyncReadExt, AsyncWriteExt};
                let mut buf = [0u8; 256];
                while let Ok(n) = conn.read(&mut buf).await {
                    if n == 0 || conn.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    port
}

async fn spawn_udp_echo() -> u16 {
    let socket = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
    let port = socket.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        loop {
            let (n, src) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(_) => break,
            };
            if socket.send_to(&buf[..n], src).await.is_err() {
                break;
            }
        }
    });
    port
}

#[tokio::test]
async fn udp_round_trip_preserves_each_sources_reply_path() {
    let network = MockNetwork::new();

    let publisher_keypair = Keypair::generate();
    let publisher_host = network.agent(publisher_keypair.peer_id());
    let (publisher, _publisher_shutdown) = new_forwarder(&publisher_keypair, publisher_host);

    let echo_port = spawn_udp_echo().await;
    let _port_handle = publisher.open_port(ProtoTag::Udp, echo_port).unwrap();

    let subscriber_keypair = Keypair::generate();
    let subscriber_host = network.agent(subscriber_keypair.peer_id());
    let (subscriber, _subscriber_shutdown) = new_forwarder(&subscriber_keypair, subscriber_host);

    let (listen_ip, _scope) = subscriber.connect(&publisher.id()).await.unwrap();
    settle().await;

    let client_a = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
    let client_b = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();

    client_a.send_to(b"from-a", (listen_ip, echo_port)).await.unwrap();
    client_b.send_to(b"from-b", (listen_ip, echo_port)).await.unwrap();

    let mut buf = [0u8; 64];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), client_a.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"from-a");

    let (n, _) = tokio::time::timeout(Duration::from_secs(2), client_b.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"from-b");
}

#[tokio::test]
async fn closing_a_port_tears_down_its_dialer_while_others_keep_working() {
    let network = MockNetwork::new();

    let publisher_keypair = Keypair::generate();
    let publisher_host = network.agent(publisher_keypair.peer_id());
    let (publisher, _publisher_shutdown) = new_forwarder(&publisher_keypair, publisher_host);

    let echo_a = spawn_tcp_echo().await;
    let echo_b = spawn_tcp_echo().await;
    let handle_a = publisher.open_port(ProtoTag::Tcp, echo_a).unwrap();
    let handle_b = publisher.open_port(ProtoTag::Tcp, echo_b).unwrap();

    let subscriber_keypair = Keypair::generate();
    let subscriber_host = network.agent(subscriber_keypair.peer_id());
    let (subscriber, _subscriber_shutdown) = new_forwarder(&subscriber_keypair, subscriber_host);

    let (listen_ip, _scope) = subscriber.connect(&publisher.id()).await.unwrap();
    settle().await;

    assert!(connect_tcp_retrying(listen_ip, echo_a, 20).await.is_some());
    assert!(connect_tcp_retrying(listen_ip, echo_b, 20).await.is_some());

    handle_a.close();
    settle().await;

    assert!(
        connect_tcp_retrying(listen_ip, echo_a, 3).await.is_none(),
        "dialer for the closed port should be gone"
    );
    assert!(
        connect_tcp_retrying(listen_ip, echo_b, 20).await.is_some(),
        "the still-open port must keep forwarding"
    );

    handle_b.close();
}

#[tokio::test]
async fn dialer_retries_on_a_random_port_when_the_advertised_one_is_taken() {
    let network = MockNetwork::new();

    let publisher_keypair = Keypair::generate();
    let publisher_host = network.agent(publisher_keypair.peer_id());
    let (publisher, _publisher_shutdown) = new_forwarder(&publisher_keypair, publisher_host);

    let echo_port = spawn_tcp_echo().await;
    let _port_handle = publisher.open_port(ProtoTag::Tcp, echo_port).unwrap();

    let subscriber_keypair = Keypair::generate();
    let subscriber_host = network.agent(subscriber_keypair.peer_id());
    let (subscriber, _subscriber_shutdown) = new_forwarder(&subscriber_keypair, subscriber_host);

    // The subscriber's first subscription is always leased 127.0.89.1, so
    // occupying that exact address/port ahead of time forces the reconciler's
    // first bind attempt to collide.
    let collider = TcpListener::bind((Ipv4Addr::new(127, 0, 89, 1), echo_port))
        .await
        .unwrap();

    let observed_port: Arc<Mutex<Option<u16>>> = Arc::new(Mutex::new(None));
    let captured = observed_port.clone();
    subscriber.on_info(move |msg| {
        if let Some(rest) = msg.strip_prefix("bound tcp 127.0.89.1:") {
            if let Some(port_str) = rest.split(' ').next() {
                if let Ok(port) = port_str.parse() {
                    *captured.lock().unwrap() = Some(port);
                }
            }
        }
    });

    let (listen_ip, _scope) = subscriber.connect(&publisher.id()).await.unwrap();
    settle().await;

    let retried_port = observed_port
        .lock()
        .unwrap()
        .expect("the retry path should have logged the port it fell back to");
    assert_ne!(retried_port, echo_port);

    let mut conn = connect_tcp_retrying(listen_ip, retried_port, 20)
        .await
        .expect("the retried listener should still reach the publisher's echo port");

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    conn.write_all(b"ok").await.unwrap();
    let mut buf = [0u8; 2];
    conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ok");

    drop(collider);
}

#[tokio::test]
async fn subscriber_cap_rejects_the_256th_concurrent_subscription() {
    let network = MockNetwork::new();

    let subscriber_keypair = Keypair::generate();
    let subscriber_host = network.agent(subscriber_keypair.peer_id());
    let (subscriber, _subscriber_shutdown) = new_forwarder(&subscriber_keypair, subscriber_host);

    let mut publishers: Vec<Arc<Forwarder>> = Vec::new();
    let mut scopes = Vec::new();
    for _ in 0..255 {
        let keypair = Keypair::generate();
        let host = network.agent(keypair.peer_id());
        let (publisher, _shutdown) = new_forwarder(&keypair, host);
        let (_ip, scope) = subscriber.connect(&publisher.id()).await.unwrap();
        scopes.push(scope);
        publishers.push(publisher);
    }

    let one_more_keypair = Keypair::generate();
    let one_more_host = network.agent(one_more_keypair.peer_id());
    let (one_more_publisher, _one_more_shutdown) = new_forwarder(&one_more_keypair, one_more_host);

    let err = subscriber
        .connect(&one_more_publisher.id())
        .await
        .unwrap_err();
    assert!(matches!(err, ForwarderError::MaxConnections));

    for scope in scopes {
        scope.cancel();
    }
}

#[tokio::test]
async fn shutdown_tears_down_listeners_within_a_second() {
    let network = MockNetwork::new();

    let publisher_keypair = Keypair::generate();
    let publisher_host = network.agent(publisher_keypair.peer_id());
    let (publisher, _publisher_shutdown) = new_forwarder(&publisher_keypair, publisher_host);

    let echo_port = spawn_tcp_echo().await;
    let _port_handle = publisher.open_port(ProtoTag::Tcp, echo_port).unwrap();

    let subscriber_keypair = Keypair::generate();
    let subscriber_host = network.agent(subscriber_keypair.peer_id());
    let (subscriber, subscriber_shutdown) = new_forwarder(&subscriber_keypair, subscriber_host);

    let (listen_ip, _scope) = subscriber.connect(&publisher.id()).await.unwrap();
    settle().await;
    assert!(connect_tcp_retrying(listen_ip, echo_port, 20).await.is_some());

    subscriber_shutdown.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if TcpStream::connect((listen_ip, echo_port)).await.is_err() {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "listener should be gone within a second of shutdown");
}
