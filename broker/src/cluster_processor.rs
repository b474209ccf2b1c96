// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Server and client sides of peer-to-peer links: inbound peers are treated
//! like regular CONNECTs but register in the peer registry, their
//! SUBSCRIBE/UNSUBSCRIBE mutate the cluster mirror index instead of the
//! local one, and their PUBLISH fans out only to local subscribers so a
//! message never loops back across the link it arrived on.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use mqtt_codec::{
    ConnectAckPacket, ConnectPacket, ConnectReturnCode, Packet, PingRequestPacket,
    PingResponsePacket, PublishPacket,
};
use tokio::net::TcpStream;

use crate::error::Error;
use crate::server::Server;
use crate::session::{Session, SessionHandle};
use crate::stream::Stream;
use crate::types::SessionKind;

const HEALTH_TICK: Duration = Duration::from_secs(20);

pub struct ClusterProcessor;

impl ClusterProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    pub async fn process(
        &self,
        server: &Server,
        session: &SessionHandle,
        packet: Packet,
    ) -> Result<(), Error> {
        if !session.is_authenticated() {
            return match packet {
                Packet::Connect(connect) => self.on_peer_connect(server, session, connect).await,
                _ => {
                    session.mark_dead();
                    Ok(())
                }
            };
        }

        match packet {
            Packet::Subscribe(subscribe) => {
                let identity = session.client_id();
                for topic in subscribe.topics() {
                    let filter = topic.topic().as_ref();
                    server.cluster_topics.subscribe(filter, &identity, session);
                    session.add_subscription(filter);
                }
                Ok(())
            }
            Packet::Unsubscribe(unsubscribe) => {
                let identity = session.client_id();
                for topic in unsubscribe.topics() {
                    let filter = topic.as_ref();
                    server.cluster_topics.unsubscribe(filter, &identity);
                    session.remove_subscription(filter);
                }
                Ok(())
            }
            Packet::Publish(publish) => self.on_peer_publish(server, &publish).await,
            Packet::PingRequest(_) => {
                session
                    .write_packet(&Packet::PingResponse(PingResponsePacket::new()))
                    .await
            }
            Packet::Disconnect(_) => {
                session.mark_dead();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn on_peer_connect(
        &self,
        server: &Server,
        session: &SessionHandle,
        connect: ConnectPacket,
    ) -> Result<(), Error> {
        let peer_name = connect.client_id().to_string();
        session.set_client_id(&peer_name);
        if let Some((_, old)) = server.peers.remove(&peer_name) {
            old.close(&server.cluster_topics).await;
        }
        server.peers.insert(peer_name, session.clone());
        session.mark_authenticated();

        let ack = ConnectAckPacket::new(false, ConnectReturnCode::Accepted);
        session.write_packet(&Packet::ConnectAck(ack)).await
    }

    /// A peer's retained PUBLISH clears the local retained entry for that
    /// topic instead of storing it, so at most one node in the cluster ever
    /// holds the canonical retained copy.
    async fn on_peer_publish(&self, server: &Server, publish: &PublishPacket) -> Result<(), Error> {
        if publish.retain() {
            server.broker_topics.remove_retained(publish.topic());
        }

        let handles = server.broker_topics.subscribers(publish.topic());
        server
            .fan_out_to(handles, &Packet::Publish(publish.clone()))
            .await;
        server.global.pub_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Default for ClusterProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Dials `addr`, sends our own CONNECT as an outbound peer, and runs a read
/// loop identical in structure to a local client session.
async fn dial_peer(server: &Arc<Server>, node_name: &str, addr: &str) -> Result<(), Error> {
    let tcp = TcpStream::connect(addr).await?;
    let stream = Stream::Tcp(tcp);
    let session_id = server.next_session_id();
    let session = Arc::new(Session::new(session_id, SessionKind::PeerOutbound, stream));

    let mut connect = ConnectPacket::new(node_name).map_err(|_| {
        Error::new(crate::error::ErrorKind::ParameterError, "invalid local node name")
    })?;
    connect.set_clean_session(true);
    connect.set_keep_alive(60);
    session
        .write_packet(&Packet::Connect(connect))
        .await?;
    session.mark_authenticated();
    session.set_client_id(node_name);
    server.peers.insert(node_name.to_string(), Arc::clone(&session));

    let server = Arc::clone(server);
    tokio::spawn(async move { session.read_loop(server).await });
    Ok(())
}

/// Every 20 seconds: redial any configured peer missing from the registry,
/// ping any outbound link that is present.
pub async fn run_health_loop(server: Arc<Server>) {
    let mut ticker = tokio::time::interval(HEALTH_TICK);
    loop {
        ticker.tick().await;
        let node_name = server.config.local_node_name().to_string();
        for peer in server.config.cluster_peers() {
            match server.peers.get(&peer.name) {
                None => {
                    if let Err(err) = dial_peer(&server, &node_name, &peer.address).await {
                        log::warn!("cluster: failed to dial {}: {err}", peer.address);
                    }
                }
                Some(entry) if entry.value().kind == SessionKind::PeerOutbound => {
                    let handle = Arc::clone(entry.value());
                    drop(entry);
                    let _ = handle
                        .write_packet(&Packet::PingRequest(PingRequestPacket::new()))
                        .await;
                }
                Some(_) => {}
            }
        }
    }
}
