// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Wildcard-aware index of subscriptions and retained messages.
//!
//! Literal filters (no `+` or `#`) live only in the flat `foliage` map, which
//! doubles as the retained-message store since a PUBLISH topic can never
//! itself contain a wildcard. Filters using `+` or `#` are indexed in the
//! branching structure instead. A topic is therefore present in exactly one
//! of the two on the subscribe side; publish-side matching always consults
//! both.

use std::collections::HashMap;
use std::sync::RwLock;

use dashmap::DashMap;
use mqtt_codec::PublishPacket;

use crate::session::SessionHandle;

#[derive(Debug, Default)]
pub struct Leaf {
    pub subscribers: HashMap<String, SessionHandle>,
    pub retained: Option<PublishPacket>,
}

impl Leaf {
    fn is_empty(&self) -> bool {
        self.subscribers.is_empty() && self.retained.is_none()
    }
}

#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<String, TrieNode>,
    leaves: HashMap<String, Leaf>,
}

impl TrieNode {
    /// Insert `identity`/`handle` for `filter`, descending through `segments[depth..]`.
    /// Returns whether the subscriber was already present.
    fn subscribe(
        &mut self,
        segments: &[&str],
        depth: usize,
        filter: &str,
        identity: &str,
        handle: &SessionHandle,
    ) -> bool {
        if depth == segments.len() {
            let leaf = self.leaves.entry(filter.to_string()).or_default();
            let already = leaf.subscribers.contains_key(identity);
            leaf.subscribers.insert(identity.to_string(), handle.clone());
            return already;
        }

        let segment = segments[depth];
        let already = self
            .children
            .entry(segment.to_string())
            .or_default()
            .subscribe(segments, depth + 1, filter, identity, handle);

        // [MQTT-4.7.1-2] `a/#` must also match `a`: duplicate the leaf onto
        // this, the parent, node.
        if segment == "#" && depth + 1 == segments.len() {
            let leaf = self.leaves.entry(filter.to_string()).or_default();
            leaf.subscribers.insert(identity.to_string(), handle.clone());
        }

        already
    }

    /// Returns `(was_present, should_prune_child)`.
    fn unsubscribe(
        &mut self,
        segments: &[&str],
        depth: usize,
        filter: &str,
        identity: &str,
    ) -> bool {
        if depth == segments.len() {
            return self.remove_from_leaf(filter, identity);
        }

        let segment = segments[depth];
        let mut was_present = false;
        let mut prune_child = false;
        if let Some(child) = self.children.get_mut(segment) {
            was_present = child.unsubscribe(segments, depth + 1, filter, identity);
            prune_child = child.children.is_empty() && child.leaves.is_empty();
        }
        if prune_child {
            self.children.remove(segment);
        }

        if segment == "#" && depth + 1 == segments.len() {
            was_present |= self.remove_from_leaf(filter, identity);
        }

        was_present
    }

    fn remove_from_leaf(&mut self, filter: &str, identity: &str) -> bool {
        let Some(leaf) = self.leaves.get_mut(filter) else {
            return false;
        };
        let was_present = leaf.subscribers.remove(identity).is_some();
        if leaf.is_empty() {
            self.leaves.remove(filter);
        }
        was_present
    }

    /// Recursive publish-side match, collecting handles of every leaf whose
    /// filter subsumes the topic at `segments[depth..]`.
    fn collect_matches(&self, segments: &[&str], depth: usize, out: &mut Vec<SessionHandle>) {
        if depth == segments.len() {
            for leaf in self.leaves.values() {
                out.extend(leaf.subscribers.values().cloned());
            }
            return;
        }

        let segment = segments[depth];
        if let Some(child) = self.children.get(segment) {
            child.collect_matches(segments, depth + 1, out);
        }
        if let Some(child) = self.children.get("+") {
            child.collect_matches(segments, depth + 1, out);
        }
        if let Some(child) = self.children.get("#") {
            for leaf in child.leaves.values() {
                out.extend(leaf.subscribers.values().cloned());
            }
        }
    }

    fn collect_retained_matches(&self, segments: &[&str], depth: usize, out: &mut Vec<&str>) {
        // Only used when walking the *foliage* keys against a wildcard
        // filter; kept here for symmetry with `collect_matches` even though
        // the trie itself never stores retained entries.
        let _ = (segments, depth, out);
    }
}

fn split_topic(topic: &str) -> Vec<&str> {
    topic.split('/').collect()
}

fn has_wildcard(filter: &str) -> bool {
    filter.split('/').any(|level| level == "+" || level == "#")
}

/// Wildcard-aware subscription and retained-message index.
#[derive(Debug, Default)]
pub struct TopicTrie {
    root: RwLock<TrieNode>,
    foliage: DashMap<String, Leaf>,
}

impl TopicTrie {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `identity` was already subscribed to `filter`.
    pub fn subscribe(&self, filter: &str, identity: &str, handle: &SessionHandle) -> bool {
        if has_wildcard(filter) {
            let segments = split_topic(filter);
            let mut root = self.root.write().expect("trie lock poisoned");
            root.subscribe(&segments, 0, filter, identity, handle)
        } else {
            let mut leaf = self.foliage.entry(filter.to_string()).or_default();
            let already = leaf.subscribers.contains_key(identity);
            leaf.subscribers.insert(identity.to_string(), handle.clone());
            already
        }
    }

    /// Returns `true` if `identity` was subscribed to `filter` before this call.
    pub fn unsubscribe(&self, filter: &str, identity: &str) -> bool {
        if has_wildcard(filter) {
            let segments = split_topic(filter);
            let mut root = self.root.write().expect("trie lock poisoned");
            root.unsubscribe(&segments, 0, filter, identity)
        } else {
            let Some(mut leaf) = self.foliage.get_mut(filter) else {
                return false;
            };
            let was_present = leaf.subscribers.remove(identity).is_some();
            let prune = leaf.is_empty();
            drop(leaf);
            if prune {
                self.foliage.remove(filter);
            }
            was_present
        }
    }

    /// Remove every subscription owned by `identity`, across both the
    /// foliage and the branching structure. Used when a session closes.
    pub fn unsubscribe_all(&self, identity: &str, filters: &[String]) {
        for filter in filters {
            self.unsubscribe(filter, identity);
        }
    }

    /// Handles of every subscriber whose filter matches `topic`. Not deduplicated.
    #[must_use]
    pub fn subscribers(&self, topic: &str) -> Vec<SessionHandle> {
        let mut out = Vec::new();
        if let Some(leaf) = self.foliage.get(topic) {
            out.extend(leaf.subscribers.values().cloned());
        }
        let segments = split_topic(topic);
        let root = self.root.read().expect("trie lock poisoned");
        root.collect_matches(&segments, 0, &mut out);
        out
    }

    /// Insert or replace the retained message for `topic`. Returns whether a
    /// retained message already existed there.
    pub fn add_retained(&self, topic: &str, packet: PublishPacket) -> bool {
        let mut leaf = self.foliage.entry(topic.to_string()).or_default();
        let replaced = leaf.retained.is_some();
        leaf.retained = Some(packet);
        replaced
    }

    /// Clear the retained message for `topic`. Returns whether one existed.
    pub fn remove_retained(&self, topic: &str) -> bool {
        let Some(mut leaf) = self.foliage.get_mut(topic) else {
            return false;
        };
        let removed = leaf.retained.take().is_some();
        let prune = leaf.is_empty();
        drop(leaf);
        if prune {
            self.foliage.remove(topic);
        }
        removed
    }

    /// All retained messages whose topic matches `filter`.
    #[must_use]
    pub fn search_retained(&self, filter: &str) -> Vec<PublishPacket> {
        if !has_wildcard(filter) {
            return self
                .foliage
                .get(filter)
                .and_then(|leaf| leaf.retained.clone())
                .into_iter()
                .collect();
        }

        let filter_segments = split_topic(filter);
        self.foliage
            .iter()
            .filter_map(|entry| {
                let packet = entry.value().retained.as_ref()?;
                let topic_segments = split_topic(entry.key());
                topic_matches_filter(&topic_segments, &filter_segments).then(|| packet.clone())
            })
            .collect()
    }

    #[must_use]
    pub fn retained_count(&self) -> usize {
        self.foliage
            .iter()
            .filter(|entry| entry.value().retained.is_some())
            .count()
    }

    /// Total payload size across all retained messages, for the
    /// `$SYS/broker/store/messages/bytes` counter.
    #[must_use]
    pub fn retained_bytes(&self) -> usize {
        self.foliage
            .iter()
            .filter_map(|entry| entry.value().retained.as_ref().map(|p| p.payload().len()))
            .sum()
    }

    #[must_use]
    pub fn subscriptions_count(&self) -> usize {
        let foliage_count: usize = self
            .foliage
            .iter()
            .map(|entry| entry.value().subscribers.len())
            .sum();
        let root = self.root.read().expect("trie lock poisoned");
        foliage_count + count_tree_subscriptions(&root)
    }
}

fn count_tree_subscriptions(node: &TrieNode) -> usize {
    let mut count: usize = node.leaves.values().map(|leaf| leaf.subscribers.len()).sum();
    for child in node.children.values() {
        count += count_tree_subscriptions(child);
    }
    count
}

/// Does `topic_segments` satisfy `filter_segments` per MQTT 3.1.1 wildcard rules?
/// Used only to test literal retained topics against a wildcard subscribe filter.
fn topic_matches_filter(topic_segments: &[&str], filter_segments: &[&str]) -> bool {
    match (filter_segments.first(), topic_segments.first()) {
        (Some(&"#"), _) => true,
        (Some(&"+"), Some(_)) => topic_matches_filter(&topic_segments[1..], &filter_segments[1..]),
        (Some(f), Some(t)) if *f == *t => {
            topic_matches_filter(&topic_segments[1..], &filter_segments[1..])
        }
        (Some(_), _) => false,
        (None, None) => true,
        (None, Some(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_handle;

    #[test]
    fn test_subscribe_idempotent() {
        let trie = TopicTrie::new();
        let handle = test_handle("a");
        assert!(!trie.subscribe("a/b/c", "a", &handle));
        assert!(trie.subscribe("a/b/c", "a", &handle));
        assert_eq!(trie.subscribers("a/b/c").len(), 1);
    }

    #[test]
    fn test_single_level_wildcard() {
        let trie = TopicTrie::new();
        let handle = test_handle("a");
        trie.subscribe("a/+/c", "a", &handle);
        assert_eq!(trie.subscribers("a/b/c").len(), 1);
        assert_eq!(trie.subscribers("a/b/d").len(), 0);
        assert_eq!(trie.subscribers("a//c").len(), 1);
    }

    #[test]
    fn test_multi_level_wildcard() {
        let trie = TopicTrie::new();
        let handle = test_handle("a");
        trie.subscribe("a/#", "a", &handle);
        assert_eq!(trie.subscribers("a").len(), 1);
        assert_eq!(trie.subscribers("a/b/c/d").len(), 1);
        assert_eq!(trie.subscribers("b/a").len(), 0);
    }

    #[test]
    fn test_pruning() {
        let trie = TopicTrie::new();
        let handle = test_handle("a");
        trie.subscribe("a/+/c", "a", &handle);
        assert!(trie.unsubscribe("a/+/c", "a"));
        assert_eq!(trie.subscribers("a/b/c").len(), 0);
        let root = trie.root.read().unwrap();
        assert!(root.children.is_empty());
    }

    #[test]
    fn test_retained_replay_literal() {
        let trie = TopicTrie::new();
        let packet = PublishPacket::new("t", mqtt_codec::QoS::AtMostOnce, b"hello").unwrap();
        assert!(!trie.add_retained("t", packet));
        assert_eq!(trie.search_retained("t").len(), 1);
        assert!(trie.remove_retained("t"));
        assert_eq!(trie.search_retained("t").len(), 0);
    }

    #[test]
    fn test_retained_replay_wildcard() {
        let trie = TopicTrie::new();
        let packet = PublishPacket::new("a/b", mqtt_codec::QoS::AtMostOnce, b"x").unwrap();
        trie.add_retained("a/b", packet);
        assert_eq!(trie.search_retained("a/+").len(), 1);
        assert_eq!(trie.search_retained("a/#").len(), 1);
    }
}
