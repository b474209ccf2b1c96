// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! End-to-end tests driving a live `Server` over real loopback TCP sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use broker::config::Config;
use broker::server::Server;
use broker::session::Session;
use broker::stream::Stream;
use broker::types::SessionKind;
use mqtt_codec::{
    ByteArray, ConnectAckPacket, ConnectPacket, DecodeError, DecodePacket, FixedHeader, Packet,
    PacketId, QoS, SubscribePacket,
};
use tokio::net::{TcpListener, TcpStream};

/// Binds an ephemeral listener on `server` that tags every accepted
/// connection with `kind`, mirroring what a real client or peer listener
/// would do, and returns the bound address.
async fn spawn_listener_for(server: &Arc<Server>, kind: SessionKind) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accept_server = Arc::clone(server);
    tokio::spawn(async move {
        loop {
            let (tcp, _) = listener.accept().await.unwrap();
            let session_id = accept_server.next_session_id();
            let session = Arc::new(Session::new(session_id, kind, Stream::Tcp(tcp)));
            let server = Arc::clone(&accept_server);
            tokio::spawn(async move { session.read_loop(server).await });
        }
    });

    addr
}

async fn spawn_test_broker() -> (Arc<Server>, SocketAddr) {
    let server = Server::new(Config::default());
    let addr = spawn_listener_for(&server, SessionKind::LocalTcp).await;
    (server, addr)
}

/// Dials `peer_addr`, sends a peer CONNECT identifying as `local_name`, and
/// registers the resulting session in `server`'s peer registry exactly like
/// the real cluster health loop's outbound dial does, minus the periodic
/// redial/ping bookkeeping this test drives manually.
async fn link_peer(server: &Arc<Server>, local_name: &str, peer_addr: SocketAddr) {
    let tcp = TcpStream::connect(peer_addr).await.unwrap();
    let session_id = server.next_session_id();
    let session = Arc::new(Session::new(session_id, SessionKind::PeerOutbound, Stream::Tcp(tcp)));

    let mut connect = ConnectPacket::new(local_name).unwrap();
    connect.set_clean_session(true);
    session.write_packet(&Packet::Connect(connect)).await.unwrap();
    session.mark_authenticated();
    session.set_client_id(local_name);
    server.peers.insert(local_name.to_string(), Arc::clone(&session));

    let server = Arc::clone(server);
    tokio::spawn(async move { session.read_loop(server).await });
}

/// Reads exactly one packet off `stream`, blocking until it is fully framed.
async fn read_one(stream: &mut TcpStream) -> Packet {
    use tokio::io::AsyncReadExt;
    let mut buf = Vec::new();
    loop {
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before a full packet arrived");
        buf.extend_from_slice(&chunk[..n]);

        let mut ba = ByteArray::new(&buf);
        match FixedHeader::decode(&mut ba) {
            Ok(header) => {
                let total = header.bytes() + header.remaining_length();
                if buf.len() >= total {
                    return mqtt_codec::read_packet(&buf[..total]).unwrap();
                }
            }
            Err(DecodeError::OutOfRangeError) => {}
            Err(err) => panic!("malformed packet: {err:?}"),
        }
    }
}

async fn write_packet(stream: &mut TcpStream, packet: &Packet) {
    use tokio::io::AsyncWriteExt;
    let mut buf = Vec::new();
    mqtt_codec::write_packet(&mut buf, packet).unwrap();
    stream.write_all(&buf).await.unwrap();
}

async fn connect(stream: &mut TcpStream, client_id: &str) -> ConnectAckPacket {
    let connect = ConnectPacket::new(client_id).unwrap();
    write_packet(stream, &Packet::Connect(connect)).await;
    match read_one(stream).await {
        Packet::ConnectAck(ack) => ack,
        other => panic!("expected ConnectAck, got {other:?}"),
    }
}

#[tokio::test]
async fn test_connect_accepted() {
    let (_server, addr) = spawn_test_broker().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let ack = connect(&mut stream, "clienta").await;
    assert_eq!(ack.return_code(), mqtt_codec::ConnectReturnCode::Accepted);
}

#[tokio::test]
async fn test_exact_publish_delivered_to_subscriber() {
    let (_server, addr) = spawn_test_broker().await;

    let mut sub = TcpStream::connect(addr).await.unwrap();
    connect(&mut sub, "subscriber").await;
    let subscribe = SubscribePacket::new("room/1", QoS::AtMostOnce, PacketId::new(1)).unwrap();
    write_packet(&mut sub, &Packet::Subscribe(subscribe)).await;
    match read_one(&mut sub).await {
        Packet::SubscribeAck(_) => {}
        other => panic!("expected SubscribeAck, got {other:?}"),
    }

    let mut publisher = TcpStream::connect(addr).await.unwrap();
    connect(&mut publisher, "publisher").await;
    let publish = mqtt_codec::PublishPacket::new("room/1", QoS::AtMostOnce, b"hello").unwrap();
    write_packet(&mut publisher, &Packet::Publish(publish)).await;

    match read_one(&mut sub).await {
        Packet::Publish(publish) => {
            assert_eq!(publish.topic(), "room/1");
            assert_eq!(publish.payload(), b"hello");
        }
        other => panic!("expected Publish, got {other:?}"),
    }
}

#[tokio::test]
async fn test_retained_message_replayed_on_subscribe() {
    let (_server, addr) = spawn_test_broker().await;

    let mut publisher = TcpStream::connect(addr).await.unwrap();
    connect(&mut publisher, "publisher").await;
    let mut publish = mqtt_codec::PublishPacket::new("room/2", QoS::AtMostOnce, b"sticky").unwrap();
    publish.set_retain(true);
    write_packet(&mut publisher, &Packet::Publish(publish)).await;

    // Give the broker a moment to land the retained message before the
    // subscriber arrives; there is no ack for a QoS 0 publish to wait on.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut sub = TcpStream::connect(addr).await.unwrap();
    connect(&mut sub, "latesubscriber").await;
    let subscribe = SubscribePacket::new("room/2", QoS::AtMostOnce, PacketId::new(1)).unwrap();
    write_packet(&mut sub, &Packet::Subscribe(subscribe)).await;

    match read_one(&mut sub).await {
        Packet::SubscribeAck(_) => {}
        other => panic!("expected SubscribeAck, got {other:?}"),
    }
    match read_one(&mut sub).await {
        Packet::Publish(publish) => {
            assert_eq!(publish.topic(), "room/2");
            assert_eq!(publish.payload(), b"sticky");
        }
        other => panic!("expected retained Publish, got {other:?}"),
    }
}

#[tokio::test]
async fn test_displacement_drops_previous_subscriptions() {
    let (server, addr) = spawn_test_broker().await;

    let mut first = TcpStream::connect(addr).await.unwrap();
    connect(&mut first, "duplicateid").await;
    let subscribe = SubscribePacket::new("room/3", QoS::AtMostOnce, PacketId::new(1)).unwrap();
    write_packet(&mut first, &Packet::Subscribe(subscribe)).await;
    match read_one(&mut first).await {
        Packet::SubscribeAck(_) => {}
        other => panic!("expected SubscribeAck, got {other:?}"),
    }
    assert_eq!(server.broker_topics.subscribers("room/3").len(), 1);

    // A second CONNECT with the same client id displaces the first session,
    // which the spec requires to unsubscribe all of its filters.
    let mut second = TcpStream::connect(addr).await.unwrap();
    connect(&mut second, "duplicateid").await;

    assert_eq!(server.broker_topics.subscribers("room/3").len(), 0);
}

#[tokio::test]
async fn test_qos2_handshake_and_duplicate_id_dropped() {
    let (_server, addr) = spawn_test_broker().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    connect(&mut stream, "qos2client").await;

    let mut publish = mqtt_codec::PublishPacket::new("room/4", QoS::ExactOnce, b"once").unwrap();
    publish.set_packet_id(PacketId::new(7));
    write_packet(&mut stream, &Packet::Publish(publish)).await;
    match read_one(&mut stream).await {
        Packet::PublishReceived(ack) => assert_eq!(ack.packet_id(), PacketId::new(7)),
        other => panic!("expected PublishReceived, got {other:?}"),
    }

    // A second PUBLISH with the same id before PUBREL is silently dropped:
    // no PublishReceived is sent for it. Send a PINGREQ right after so the
    // next packet we read off the wire proves the duplicate produced nothing.
    let mut duplicate = mqtt_codec::PublishPacket::new("room/4", QoS::ExactOnce, b"again").unwrap();
    duplicate.set_packet_id(PacketId::new(7));
    write_packet(&mut stream, &Packet::Publish(duplicate)).await;
    write_packet(&mut stream, &Packet::PingRequest(mqtt_codec::PingRequestPacket::new())).await;
    match read_one(&mut stream).await {
        Packet::PingResponse(_) => {}
        other => panic!("expected PingResponse (duplicate PUBLISH produced a reply), got {other:?}"),
    }

    let release = mqtt_codec::PublishReleasePacket::new(PacketId::new(7));
    write_packet(&mut stream, &Packet::PublishRelease(release)).await;
    match read_one(&mut stream).await {
        Packet::PublishComplete(ack) => assert_eq!(ack.packet_id(), PacketId::new(7)),
        other => panic!("expected PublishComplete, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cluster_fanout_and_retained_uniqueness() {
    let n1 = Server::new(Config::default());
    let n1_client_addr = spawn_listener_for(&n1, SessionKind::LocalTcp).await;

    let n2 = Server::new(Config::default());
    let n2_client_addr = spawn_listener_for(&n2, SessionKind::LocalTcp).await;
    let n2_peer_addr = spawn_listener_for(&n2, SessionKind::PeerInbound).await;

    link_peer(&n1, "node1", n2_peer_addr).await;
    // Give the peer CONNECT/CONNACK a moment to land before either node
    // relies on the link being registered.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(n2.peers.get("node1").is_some());

    // N1 holds a retained message for the topic before the cluster ever
    // sees it, and before any subscriber exists.
    let mut retainer = TcpStream::connect(n1_client_addr).await.unwrap();
    connect(&mut retainer, "retainer").await;
    let mut old_retained = mqtt_codec::PublishPacket::new("cluster/1", QoS::AtMostOnce, b"old").unwrap();
    old_retained.set_retain(true);
    write_packet(&mut retainer, &Packet::Publish(old_retained)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(n1.broker_topics.retained_count(), 1);

    // A local subscriber on N1 gets the existing retained message immediately,
    // and its SUBSCRIBE is mirrored across the peer link to N2.
    let mut sub1 = TcpStream::connect(n1_client_addr).await.unwrap();
    connect(&mut sub1, "sub1").await;
    let subscribe = SubscribePacket::new("cluster/1", QoS::AtMostOnce, PacketId::new(1)).unwrap();
    write_packet(&mut sub1, &Packet::Subscribe(subscribe)).await;
    match read_one(&mut sub1).await {
        Packet::SubscribeAck(_) => {}
        other => panic!("expected SubscribeAck, got {other:?}"),
    }
    match read_one(&mut sub1).await {
        Packet::Publish(publish) => assert_eq!(publish.payload(), b"old"),
        other => panic!("expected retained Publish, got {other:?}"),
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(n2.cluster_topics.subscribers("cluster/1").len(), 1);

    // A publish on N2 fans out across the peer link to N1's subscriber.
    let mut pub2 = TcpStream::connect(n2_client_addr).await.unwrap();
    connect(&mut pub2, "pub2").await;
    let fresh = mqtt_codec::PublishPacket::new("cluster/1", QoS::AtMostOnce, b"fresh").unwrap();
    write_packet(&mut pub2, &Packet::Publish(fresh)).await;
    match read_one(&mut sub1).await {
        Packet::Publish(publish) => {
            assert_eq!(publish.topic(), "cluster/1");
            assert_eq!(publish.payload(), b"fresh");
        }
        other => panic!("expected cross-node Publish, got {other:?}"),
    }

    // A retaining publish arriving from the peer clears N1's retained entry
    // instead of replacing it, so the origin node stays the sole holder.
    let mut canonical = mqtt_codec::PublishPacket::new("cluster/1", QoS::AtMostOnce, b"canonical").unwrap();
    canonical.set_retain(true);
    write_packet(&mut pub2, &Packet::Publish(canonical)).await;
    match read_one(&mut sub1).await {
        Packet::Publish(publish) => assert_eq!(publish.payload(), b"canonical"),
        other => panic!("expected cross-node retained Publish, got {other:?}"),
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(n1.broker_topics.retained_count(), 0);

    // A new N1 subscriber sees no retained replay, confirming it was cleared
    // rather than replaced with the peer's copy.
    let mut latesub = TcpStream::connect(n1_client_addr).await.unwrap();
    connect(&mut latesub, "latesub").await;
    let subscribe = SubscribePacket::new("cluster/1", QoS::AtMostOnce, PacketId::new(1)).unwrap();
    write_packet(&mut latesub, &Packet::Subscribe(subscribe)).await;
    match read_one(&mut latesub).await {
        Packet::SubscribeAck(_) => {}
        other => panic!("expected SubscribeAck, got {other:?}"),
    }
    let timed_out = tokio::time::timeout(Duration::from_millis(200), read_one(&mut latesub)).await;
    assert!(timed_out.is_err(), "no retained message should have replayed");
}
