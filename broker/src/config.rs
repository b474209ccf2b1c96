// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Broker configuration: listener bindings, TLS material, cluster peers.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, ErrorKind};

/// Binding protocol for one listener.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    #[serde(alias = "mqtt")]
    Mqtt,
    #[serde(alias = "mqtts")]
    Mqtts,
    #[serde(alias = "ws")]
    Ws,
    #[serde(alias = "wss")]
    Wss,
}

/// One bound address and the role connections accepted on it play: client
/// traffic routes to the `BrokerProcessor`, peer traffic to the
/// `ClusterProcessor`.
#[derive(Debug, Deserialize, Clone)]
pub struct ListenerConfig {
    #[serde(default = "ListenerConfig::default_protocol")]
    protocol: Protocol,

    #[serde(default = "ListenerConfig::default_address")]
    address: String,

    /// URL path clients must connect to, only used for Ws/Wss.
    #[serde(default)]
    path: Option<String>,

    #[serde(default)]
    cert_file: Option<PathBuf>,

    #[serde(default)]
    key_file: Option<PathBuf>,

    /// When true, connections on this listener are peer links rather than
    /// clients and are handed to the `ClusterProcessor`.
    #[serde(default)]
    peer: bool,
}

impl ListenerConfig {
    #[must_use]
    pub const fn default_protocol() -> Protocol {
        Protocol::Mqtt
    }

    #[must_use]
    pub fn default_address() -> String {
        "0.0.0.0:1883".to_string()
    }

    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn cert_file(&self) -> Option<&Path> {
        self.cert_file.as_deref()
    }

    #[must_use]
    pub fn key_file(&self) -> Option<&Path> {
        self.key_file.as_deref()
    }

    #[must_use]
    pub const fn is_peer(&self) -> bool {
        self.peer
    }

    pub fn validate(&self) -> Result<(), Error> {
        let needs_tls = matches!(self.protocol, Protocol::Mqtts | Protocol::Wss);
        if needs_tls && (self.cert_file.is_none() || self.key_file.is_none()) {
            return Err(Error::new(
                ErrorKind::ConfigError,
                "tls listener requires cert_file and key_file",
            ));
        }
        Ok(())
    }
}

/// One remote broker node this node should maintain a peer link with.
#[derive(Debug, Deserialize, Clone)]
pub struct PeerConfig {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusterConfig {
    #[serde(default)]
    enabled: bool,

    #[serde(default = "ClusterConfig::default_local_node_name")]
    local_node_name: String,

    #[serde(default)]
    peers: Vec<PeerConfig>,
}

impl ClusterConfig {
    #[must_use]
    pub fn default_local_node_name() -> String {
        "node-0".to_string()
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn local_node_name(&self) -> &str {
        &self.local_node_name
    }

    #[must_use]
    pub fn peers(&self) -> &[PeerConfig] {
        &self.peers
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            local_node_name: Self::default_local_node_name(),
            peers: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    #[serde(alias = "off")]
    Off,
    #[serde(alias = "error")]
    Error,
    #[serde(alias = "warn")]
    Warn,
    #[serde(alias = "info")]
    Info,
    #[serde(alias = "debug")]
    Debug,
    #[serde(alias = "trace")]
    Trace,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    #[serde(default = "Log::default_console_log")]
    console_log: bool,

    #[serde(default = "Log::default_log_level")]
    log_level: LogLevel,

    #[serde(default)]
    log_file: Option<PathBuf>,
}

impl Log {
    #[must_use]
    pub const fn default_console_log() -> bool {
        true
    }

    #[must_use]
    pub const fn default_log_level() -> LogLevel {
        LogLevel::Info
    }

    #[must_use]
    pub const fn console_log(&self) -> bool {
        self.console_log
    }

    #[must_use]
    pub const fn log_level(&self) -> LogLevel {
        self.log_level
    }

    #[must_use]
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

impl Default for Log {
    fn default() -> Self {
        Self {
            console_log: Self::default_console_log(),
            log_level: Self::default_log_level(),
            log_file: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "Config::default_listeners")]
    listeners: Vec<ListenerConfig>,

    #[serde(default)]
    cluster: ClusterConfig,

    /// Per-connection QoS 2 pending-release capacity; 0 means unbounded.
    #[serde(default = "Config::default_max_inflight")]
    max_inflight: usize,

    #[serde(default)]
    log: Log,
}

impl Config {
    #[must_use]
    pub fn default_listeners() -> Vec<ListenerConfig> {
        vec![ListenerConfig {
            protocol: Protocol::Mqtt,
            address: ListenerConfig::default_address(),
            path: None,
            cert_file: None,
            key_file: None,
            peer: false,
        }]
    }

    #[must_use]
    pub const fn default_max_inflight() -> usize {
        0
    }

    /// # Errors
    ///
    /// Returns error if the file cannot be read or does not parse as TOML.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        for listener in &self.listeners {
            listener.validate()?;
        }
        Ok(())
    }

    #[must_use]
    pub fn listeners(&self) -> &[ListenerConfig] {
        &self.listeners
    }

    #[must_use]
    pub const fn cluster_enabled(&self) -> bool {
        self.cluster.enabled()
    }

    #[must_use]
    pub fn local_node_name(&self) -> &str {
        self.cluster.local_node_name()
    }

    #[must_use]
    pub fn cluster_peers(&self) -> &[PeerConfig] {
        self.cluster.peers()
    }

    #[must_use]
    pub const fn max_inflight(&self) -> usize {
        self.max_inflight
    }

    #[must_use]
    pub const fn log(&self) -> &Log {
        &self.log
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listeners: Self::default_listeners(),
            cluster: ClusterConfig::default(),
            max_inflight: Self::default_max_inflight(),
            log: Log::default(),
        }
    }
}
