// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Periodically emits broker statistics as `$SYS/broker/...` publishes.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use mqtt_codec::{Packet, PublishPacket, QoS};

use crate::server::Server;
use crate::types::now_unix;

const TICK: Duration = Duration::from_secs(10);
const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct StatsPublisher;

impl StatsPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Runs forever, publishing one snapshot every ten seconds.
    pub async fn run(self, server: Arc<Server>) {
        let mut ticker = tokio::time::interval(TICK);
        loop {
            ticker.tick().await;
            self.publish_snapshot(&server).await;
        }
    }

    async fn publish_snapshot(&self, server: &Server) {
        let global = &server.global;
        let connected = global.clients_connected.load(Ordering::Relaxed);
        let disconnected = global.clients_disconnected.load(Ordering::Relaxed);
        let uptime = now_unix().saturating_sub(server.start_time);

        let snapshot: Vec<(&str, String)> = vec![
            ("$SYS/broker/bytes/received", global.bytes_received.load(Ordering::Relaxed).to_string()),
            ("$SYS/broker/bytes/sent", global.bytes_sent.load(Ordering::Relaxed).to_string()),
            ("$SYS/broker/clients/connected", connected.to_string()),
            ("$SYS/broker/clients/active", connected.to_string()),
            ("$SYS/broker/clients/disconnected", disconnected.to_string()),
            ("$SYS/broker/clients/inactive", disconnected.to_string()),
            ("$SYS/broker/clients/maximum", global.clients_maximum.load(Ordering::Relaxed).to_string()),
            ("$SYS/broker/clients/total", global.clients_total.load(Ordering::Relaxed).to_string()),
            ("$SYS/broker/messages/inflight", server.broker_processor.inflight_count().to_string()),
            ("$SYS/broker/messages/received", global.msg_received.load(Ordering::Relaxed).to_string()),
            ("$SYS/broker/messages/sent", global.msg_sent.load(Ordering::Relaxed).to_string()),
            ("$SYS/broker/publish/messages/received", global.pub_received.load(Ordering::Relaxed).to_string()),
            ("$SYS/broker/publish/messages/sent", global.pub_sent.load(Ordering::Relaxed).to_string()),
            ("$SYS/broker/retained_messages/count", server.broker_topics.retained_count().to_string()),
            ("$SYS/broker/store/messages/count", server.broker_topics.retained_count().to_string()),
            ("$SYS/broker/store/messages/bytes", server.broker_topics.retained_bytes().to_string()),
            ("$SYS/broker/subscriptions/count", server.broker_topics.subscriptions_count().to_string()),
            ("$SYS/broker/version", VERSION.to_string()),
            ("$SYS/broker/uptime", uptime.to_string()),
            ("$SYS/broker/timestamp", now_unix().to_string()),
        ];

        for (topic, value) in snapshot {
            let Ok(publish) = PublishPacket::new(topic, QoS::AtMostOnce, value.as_bytes()) else {
                continue;
            };
            let handles = server.broker_topics.subscribers(topic);
            if handles.is_empty() {
                continue;
            }
            let delivered: HashSet<String> = handles.iter().map(|h| h.client_id()).collect();
            server.fan_out_to(handles, &Packet::Publish(publish)).await;
            global.pub_sent.fetch_add(delivered.len() as u64, Ordering::Relaxed);
        }
    }
}

impl Default for StatsPublisher {
    fn default() -> Self {
        Self::new()
    }
}
