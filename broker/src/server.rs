// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Owns the two trie instances, the session/peer registries and global
//! counters; dispatches decoded packets to the processor matching the
//! session's kind.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use mqtt_codec::Packet;

use crate::broker_processor::BrokerProcessor;
use crate::cluster_processor::ClusterProcessor;
use crate::config::Config;
use crate::error::Error;
use crate::session::SessionHandle;
use crate::stats_publisher::StatsPublisher;
use crate::topic_trie::TopicTrie;
use crate::types::GlobalState;

pub struct Server {
    pub config: Config,
    pub global: GlobalState,
    pub broker_topics: TopicTrie,
    pub cluster_topics: TopicTrie,
    pub sessions: DashMap<String, SessionHandle>,
    pub peers: DashMap<String, SessionHandle>,
    pub broker_processor: BrokerProcessor,
    pub cluster_processor: ClusterProcessor,
    pub start_time: u64,
    next_session_id: AtomicU64,
}

impl Server {
    #[must_use]
    pub fn new(config: Config) -> Arc<Self> {
        let max_inflight = config.max_inflight();
        Arc::new(Self {
            config,
            global: GlobalState::new(),
            broker_topics: TopicTrie::new(),
            cluster_topics: TopicTrie::new(),
            sessions: DashMap::new(),
            peers: DashMap::new(),
            broker_processor: BrokerProcessor::new(max_inflight),
            cluster_processor: ClusterProcessor::new(),
            start_time: crate::types::now_unix(),
            next_session_id: AtomicU64::new(1),
        })
    }

    /// Spawns the stats publisher and peer health tasks, then returns; the
    /// caller is expected to separately run listener accept loops.
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            StatsPublisher::new().run(server).await;
        });

        let server = Arc::clone(self);
        tokio::spawn(async move {
            crate::cluster_processor::run_health_loop(server).await;
        });
    }

    /// Routes a decoded packet to the processor matching `session.kind`.
    pub async fn dispatch(&self, session: &SessionHandle, packet: Packet) -> Result<(), Error> {
        self.global.msg_received.fetch_add(1, Ordering::Relaxed);
        if matches!(packet, Packet::Publish(_)) {
            self.global.pub_received.fetch_add(1, Ordering::Relaxed);
        }

        if session.kind.is_peer() {
            self.cluster_processor.process(self, session, packet).await
        } else {
            self.broker_processor.process(self, session, packet).await
        }
    }

    /// Emits a session's will (if any) as though it had arrived as a regular
    /// PUBLISH from that session; used by the read loop on ungraceful close.
    pub async fn dispatch_publish_from(
        &self,
        session: &SessionHandle,
        will: mqtt_codec::PublishPacket,
    ) -> Result<(), Error> {
        self.broker_processor
            .fan_out_publish(self, session, &will)
            .await
    }

    /// Called once the read loop for `session` has returned, regardless of
    /// the reason. Removes the session from whichever registry holds it.
    pub async fn on_session_closed(&self, session: &SessionHandle) {
        if !session.is_authenticated() {
            return;
        }
        let identity = session.client_id();
        if session.kind.is_peer() {
            session.close(&self.cluster_topics).await;
            if self
                .peers
                .get(&identity)
                .is_some_and(|entry| Arc::ptr_eq(entry.value(), session))
            {
                self.peers.remove(&identity);
            }
        } else {
            session.close(&self.broker_topics).await;
            if self
                .sessions
                .get(&identity)
                .is_some_and(|entry| Arc::ptr_eq(entry.value(), session))
            {
                self.sessions.remove(&identity);
            }
            self.global.on_client_disconnected();
        }
    }

    #[must_use]
    pub fn next_session_id(&self) -> crate::types::SessionId {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Writes `packet` to every handle in `handles`, deduplicated by client id.
    pub async fn fan_out_to(&self, handles: Vec<SessionHandle>, packet: &Packet) {
        let mut seen = HashSet::new();
        for handle in handles {
            let identity = handle.client_id();
            if !seen.insert(identity) {
                continue;
            }
            if let Err(err) = handle.write_packet(packet).await {
                log::warn!("session {}: write failed: {err}", handle.id);
            } else {
                self.global.msg_sent.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Writes `packet` to every currently connected peer link.
    pub async fn forward_to_peers(&self, packet: &Packet) {
        let handles: Vec<SessionHandle> = self.peers.iter().map(|e| Arc::clone(e.value())).collect();
        self.fan_out_to(handles, packet).await;
    }
}
