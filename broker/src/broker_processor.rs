// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Dispatches packets arriving on local client sessions.

use std::sync::atomic::Ordering;

use mqtt_codec::{
    ConnectAckPacket, ConnectReturnCode, Packet, PingResponsePacket, PublishCompletePacket,
    PublishPacket, PublishReceivedPacket, QoS, SubscribeAck, SubscribeAckPacket,
    UnsubscribeAckPacket,
};

use crate::error::Error;
use crate::qos2::Qos2Pending;
use crate::server::Server;
use crate::session::SessionHandle;

pub struct BrokerProcessor {
    qos2: Qos2Pending,
}

impl BrokerProcessor {
    #[must_use]
    pub fn new(max_inflight: usize) -> Self {
        Self {
            qos2: Qos2Pending::new(max_inflight),
        }
    }

    /// Count of QoS 2 messages currently awaiting PUBREL, for the
    /// `$SYS/broker/messages/inflight` counter.
    #[must_use]
    pub fn inflight_count(&self) -> usize {
        self.qos2.len()
    }

    pub async fn process(
        &self,
        server: &Server,
        session: &SessionHandle,
        packet: Packet,
    ) -> Result<(), Error> {
        if !session.is_authenticated() {
            return match packet {
                Packet::Connect(connect) => self.on_connect(server, session, connect).await,
                _ => {
                    log::warn!("session {}: non-CONNECT before CONNECT", session.id);
                    session.mark_dead();
                    Ok(())
                }
            };
        }

        match packet {
            Packet::Connect(_) => {
                log::warn!("session {}: duplicate CONNECT", session.id);
                session.mark_dead();
                Ok(())
            }
            Packet::Publish(publish) => self.on_publish(server, session, publish).await,
            Packet::PublishRelease(release) => {
                self.qos2.release(release.packet_id());
                let ack = PublishCompletePacket::new(release.packet_id());
                session.write_packet(&Packet::PublishComplete(ack)).await
            }
            Packet::Subscribe(subscribe) => self.on_subscribe(server, session, subscribe).await,
            Packet::Unsubscribe(unsubscribe) => {
                self.on_unsubscribe(server, session, unsubscribe).await
            }
            Packet::PingRequest(_) => {
                session
                    .write_packet(&Packet::PingResponse(PingResponsePacket::new()))
                    .await
            }
            Packet::Disconnect(_) => {
                session.set_will(None);
                session.mark_dead();
                Ok(())
            }
            // Acks from a client toward the broker acting as a QoS 1/2 sender
            // have no tracked state yet; accept and discard.
            Packet::PublishAck(_)
            | Packet::PublishReceived(_)
            | Packet::PublishComplete(_)
            | Packet::SubscribeAck(_)
            | Packet::UnsubscribeAck(_)
            | Packet::PingResponse(_)
            | Packet::ConnectAck(_) => Ok(()),
        }
    }

    async fn on_connect(
        &self,
        server: &Server,
        session: &SessionHandle,
        connect: mqtt_codec::ConnectPacket,
    ) -> Result<(), Error> {
        let client_id = connect.client_id().to_string();
        session.set_client_id(&client_id);

        if let Some(will_topic) = connect.will_topic() {
            let mut will =
                PublishPacket::new(will_topic, connect.will_qos(), connect.will_message())?;
            will.set_retain(connect.will_retain());
            session.set_will(Some(will));
        }

        // Displacement: close any existing session under this client id
        // before the new CONNACK is written.
        if let Some((_, old)) = server.sessions.remove(&client_id) {
            old.close(&server.broker_topics).await;
        }
        server.sessions.insert(client_id, session.clone());
        session.mark_authenticated();
        server.global.on_client_connected();

        // Non-conformant to MQTT 3.1.1 but preserved for compatibility: the
        // session-present flag mirrors the client's clean-session flag
        // instead of reflecting prior session state.
        let mut ack = ConnectAckPacket::new(true, ConnectReturnCode::Accepted);
        ack.set_session_present(connect.connect_flags().clean_session());
        session.write_packet(&Packet::ConnectAck(ack)).await
    }

    async fn on_publish(
        &self,
        server: &Server,
        session: &SessionHandle,
        publish: PublishPacket,
    ) -> Result<(), Error> {
        match publish.qos() {
            QoS::AtMostOnce => {}
            QoS::AtLeastOnce => {
                if let Some(packet_id) = publish.packet_id() {
                    let ack = mqtt_codec::PublishAckPacket::new(packet_id);
                    session.write_packet(&Packet::PublishAck(ack)).await?;
                }
            }
            QoS::ExactOnce => {
                let Some(packet_id) = publish.packet_id() else {
                    return Ok(());
                };
                if !self.qos2.save(packet_id) {
                    return Ok(());
                }
                let ack = PublishReceivedPacket::new(packet_id);
                session.write_packet(&Packet::PublishReceived(ack)).await?;
            }
        }

        self.fan_out_publish(server, session, &publish).await
    }

    /// Applies the retain store/remove rule, then fans `publish` out to
    /// local broker subscribers and independently to cluster-mirrored
    /// subscribers. Shared by ordinary client PUBLISHes and by a session's
    /// will, which is dispatched through this same path so a retaining will
    /// is visible to subscribers that join after it fires.
    pub async fn fan_out_publish(
        &self,
        server: &Server,
        _origin: &SessionHandle,
        publish: &PublishPacket,
    ) -> Result<(), Error> {
        if publish.retain() {
            if publish.payload().is_empty() {
                server.broker_topics.remove_retained(publish.topic());
            } else {
                server
                    .broker_topics
                    .add_retained(publish.topic(), publish.clone());
            }
            server.global.retained_count.store(
                i64::try_from(server.broker_topics.retained_count()).unwrap_or(i64::MAX),
                Ordering::Relaxed,
            );
        }

        let packet = Packet::Publish(publish.clone());
        let local = server.broker_topics.subscribers(publish.topic());
        server.fan_out_to(local, &packet).await;

        let mirrored = server.cluster_topics.subscribers(publish.topic());
        server.fan_out_to(mirrored, &packet).await;

        server.global.pub_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn on_subscribe(
        &self,
        server: &Server,
        session: &SessionHandle,
        subscribe: mqtt_codec::SubscribePacket,
    ) -> Result<(), Error> {
        let acks: Vec<SubscribeAck> = subscribe
            .topics()
            .iter()
            .map(|t| SubscribeAck::QoS(t.qos()))
            .collect();
        let ack_packet = SubscribeAckPacket::with_vec(subscribe.packet_id(), acks);
        session
            .write_packet(&Packet::SubscribeAck(ack_packet))
            .await?;

        let identity = session.client_id();
        for topic in subscribe.topics() {
            let filter = topic.topic().as_ref();
            server
                .broker_topics
                .subscribe(filter, &identity, session);
            session.add_subscription(filter);

            for retained in server.broker_topics.search_retained(filter) {
                session.write_packet(&Packet::Publish(retained)).await?;
            }
        }

        server.forward_to_peers(&Packet::Subscribe(subscribe)).await;
        Ok(())
    }

    async fn on_unsubscribe(
        &self,
        server: &Server,
        session: &SessionHandle,
        unsubscribe: mqtt_codec::UnsubscribePacket,
    ) -> Result<(), Error> {
        let identity = session.client_id();
        for topic in unsubscribe.topics() {
            let filter = topic.as_ref();
            server.broker_topics.unsubscribe(filter, &identity);
            session.remove_subscription(filter);
        }

        let ack = UnsubscribeAckPacket::new(unsubscribe.packet_id());
        session.write_packet(&Packet::UnsubscribeAck(ack)).await?;

        server
            .forward_to_peers(&Packet::Unsubscribe(unsubscribe))
            .await;
        Ok(())
    }
}
