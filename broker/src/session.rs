// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Per-connection state: one bidirectional packet stream, a write mutex and
//! the set of filters this identity has subscribed to.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use mqtt_codec::{
    self, ByteArray, DecodeError, DecodePacket, EncodePacket, FixedHeader, Packet, PublishPacket,
};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::Error;
use crate::server::Server;
use crate::stream::Stream;
use crate::types::{SessionId, SessionKind};

/// Reference shared between the session registry, the trie leaves and the
/// owning connection task. Cloning only bumps the `Arc` refcount.
pub type SessionHandle = std::sync::Arc<Session>;

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub kind: SessionKind,
    client_id: Mutex<String>,
    write_half: AsyncMutex<Stream>,
    subscriptions: Mutex<HashSet<String>>,
    will: Mutex<Option<PublishPacket>>,
    alive: AtomicBool,
    authenticated: AtomicBool,
    pub(crate) connected_at: AtomicU64,
}

impl Session {
    #[must_use]
    pub fn new(id: SessionId, kind: SessionKind, stream: Stream) -> Self {
        Self {
            id,
            kind,
            client_id: Mutex::new(String::new()),
            write_half: AsyncMutex::new(stream),
            subscriptions: Mutex::new(HashSet::new()),
            will: Mutex::new(None),
            alive: AtomicBool::new(true),
            authenticated: AtomicBool::new(false),
            connected_at: AtomicU64::new(crate::types::now_unix()),
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn mark_authenticated(&self) {
        self.authenticated.store(true, Ordering::Release);
    }

    /// Stops the read loop at its next iteration without touching
    /// subscriptions; used for protocol errors and displacement, where the
    /// caller decides separately whether cleanup runs inline or is left to
    /// the loop's own exit path.
    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn client_id(&self) -> String {
        self.client_id.lock().expect("client_id lock poisoned").clone()
    }

    pub fn set_client_id(&self, client_id: &str) {
        *self.client_id.lock().expect("client_id lock poisoned") = client_id.to_string();
    }

    pub fn set_will(&self, will: Option<PublishPacket>) {
        *self.will.lock().expect("will lock poisoned") = will;
    }

    pub fn take_will(&self) -> Option<PublishPacket> {
        self.will.lock().expect("will lock poisoned").take()
    }

    pub fn add_subscription(&self, filter: &str) {
        self.subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .insert(filter.to_string());
    }

    pub fn remove_subscription(&self, filter: &str) {
        self.subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .remove(filter);
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Cancels the liveness signal, shuts down the underlying stream so a
    /// read blocked on it unblocks immediately instead of waiting for the
    /// remote end, and unsubscribes every filter this session held.
    pub async fn close(&self, trie: &crate::topic_trie::TopicTrie) {
        self.alive.store(false, Ordering::Release);
        self.write_half.lock().await.shutdown().await;
        let identity = self.client_id();
        for filter in self.subscriptions() {
            trie.unsubscribe(&filter, &identity);
        }
    }

    /// Serialized write; a no-op once the session has been closed.
    pub async fn write_packet(&self, packet: &Packet) -> Result<(), Error> {
        if !self.is_alive() {
            return Ok(());
        }
        let mut buf = Vec::new();
        mqtt_codec::write_packet(&mut buf, packet)?;
        let mut stream = self.write_half.lock().await;
        stream.write(&buf).await.map(drop)
    }

    /// Reads packets off the wire until the stream closes or errors, handing
    /// each one to the server's dispatch for this session's kind.
    pub async fn read_loop(self: std::sync::Arc<Self>, server: std::sync::Arc<Server>) {
        let mut buf = Vec::with_capacity(1024);
        loop {
            if !self.is_alive() {
                break;
            }

            match self.write_half_read(&mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    log::warn!("session {}: read error: {err}", self.id);
                    break;
                }
            }

            loop {
                match try_extract_frame(&buf) {
                    FrameResult::Complete(frame_len) => {
                        let frame = buf.drain(..frame_len).collect::<Vec<u8>>();
                        match mqtt_codec::read_packet(&frame) {
                            Ok(packet) => {
                                if let Err(err) = server.dispatch(&self, packet).await {
                                    log::warn!("session {}: dispatch error: {err}", self.id);
                                }
                            }
                            Err(err) => {
                                log::warn!("session {}: decode error: {err:?}", self.id);
                                self.alive.store(false, Ordering::Release);
                                break;
                            }
                        }
                    }
                    FrameResult::Incomplete => break,
                    FrameResult::Malformed => {
                        log::warn!("session {}: malformed fixed header", self.id);
                        self.alive.store(false, Ordering::Release);
                        break;
                    }
                }
            }

            if !self.is_alive() {
                break;
            }
        }

        if let Some(will) = self.take_will() {
            let _ = server.dispatch_publish_from(&self, will).await;
        }
        server.on_session_closed(&self).await;
    }

    async fn write_half_read(&self, buf: &mut Vec<u8>) -> Result<usize, Error> {
        let mut stream = self.write_half.lock().await;
        stream.read_buf(buf).await
    }
}

enum FrameResult {
    Complete(usize),
    Incomplete,
    Malformed,
}

/// Peeks a fixed header off `buf` without consuming it, to decide whether a
/// full frame is already buffered.
fn try_extract_frame(buf: &[u8]) -> FrameResult {
    let mut ba = ByteArray::new(buf);
    match FixedHeader::decode(&mut ba) {
        Ok(header) => {
            let total = header.bytes() + header.remaining_length();
            if buf.len() >= total {
                FrameResult::Complete(total)
            } else {
                FrameResult::Incomplete
            }
        }
        Err(DecodeError::OutOfRangeError) => FrameResult::Incomplete,
        Err(_) => FrameResult::Malformed,
    }
}

#[cfg(test)]
pub(crate) fn test_handle(id_str: &str) -> SessionHandle {
    use std::sync::Arc;
    let session = Session::new(0, SessionKind::LocalTcp, Stream::test_null());
    session.set_client_id(id_str);
    Arc::new(session)
}
