// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for printer discovery.

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// IPP (document-transfer) port.
pub const IPP_PORT: u16 = 631;

/// Raw socket / JetDirect port, also used for PJL queries.
pub const RAW_PORT: u16 = 9100;

/// LPD port (RFC 1179).
pub const LPD_PORT: u16 = 515;

/// SNMP agent port.
pub const SNMP_PORT: u16 = 161;

/// Unique identifier for a discovery session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a record first came to the session's attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryMode {
    /// Seen in an mDNS / DNS-SD announcement.
    Passive,
    /// Probed because a caller supplied the address.
    Active,
}

/// Which identification method produced a record's model string.
///
/// Variants are declared lowest priority first so the derived `Ord` matches
/// the priority rule: IPP beats SNMP beats PJL beats an announcement hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModelSource {
    /// TXT-record hint from a service announcement.
    Announcement,
    /// PJL `INFO ID` on the raw print port.
    JobLanguage,
    /// SNMP `sysDescr.0`.
    Management,
    /// IPP `printer-make-and-model`.
    DocumentTransfer,
}

impl ModelSource {
    /// Short protocol label for logs and UI.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Announcement => "mDNS",
            Self::JobLanguage => "PJL",
            Self::Management => "SNMP",
            Self::DocumentTransfer => "IPP",
        }
    }
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a network step contributed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// No answer inside the step's deadline.
    Timeout,
    /// The peer refused or reset the connection, or it could not be opened.
    ConnectionRefused,
    /// An answer arrived but could not be decoded.
    Unparseable,
    /// None of the candidate print ports accepted a connection.
    NoPortsFound,
    /// The device answered but reported no usable model string.
    ModelUnknown,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::ConnectionRefused => "connection refused",
            Self::Unparseable => "unparseable response",
            Self::NoPortsFound => "no ports found",
            Self::ModelUnknown => "model unknown",
        };
        f.write_str(s)
    }
}

/// Something that went wrong while a record was being built.
///
/// Issues are informational: a record carrying them is still a valid,
/// if incomplete, result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DiscoveryIssue {
    /// The port scan found nothing open.
    NoPortsFound,
    /// One identification probe failed.
    ProbeFailed { source: ModelSource, kind: FailureKind },
    /// Every launched probe finished without a model.
    ModelUnknown,
}

/// Result of a single model identification probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifyOutcome {
    Model(String),
    Unknown(FailureKind),
}

impl IdentifyOutcome {
    /// Build an outcome from a raw model string, treating blank as unknown.
    pub fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Self::Unknown(FailureKind::ModelUnknown)
        } else {
            Self::Model(trimmed.to_owned())
        }
    }

    pub fn model(&self) -> Option<&str> {
        match self {
            Self::Model(m) => Some(m),
            Self::Unknown(_) => None,
        }
    }
}

/// A labelled probe result, ready to be folded into a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identification {
    pub source: ModelSource,
    pub outcome: IdentifyOutcome,
}

/// Everything known about one printer, keyed by its network address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterRecord {
    /// Identity key; never changes after creation.
    pub address: IpAddr,
    /// Host name from an announcement, without the trailing dot.
    pub hostname: Option<String>,
    /// DNS-SD instance name, e.g. "Office LaserJet".
    pub service_name: Option<String>,
    /// Ports confirmed open. Only ever grows.
    pub open_ports: BTreeSet<u16>,
    /// Human-readable make and model.
    pub model: Option<String>,
    /// Which probe produced `model`.
    pub model_source: Option<ModelSource>,
    /// When `model` was last written; breaks ties between equal sources.
    #[serde(default)]
    pub model_updated: Option<DateTime<Utc>>,
    /// Provenance. Fixed at creation.
    pub discovery_mode: DiscoveryMode,
    /// Time of the most recent field write.
    pub last_updated: DateTime<Utc>,
    /// Problems met while building this record.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub issues: BTreeSet<DiscoveryIssue>,
}

impl PrinterRecord {
    /// An empty record for a first sighting of `address`.
    pub fn new(address: IpAddr, discovery_mode: DiscoveryMode) -> Self {
        Self {
            address,
            hostname: None,
            service_name: None,
            open_ports: BTreeSet::new(),
            model: None,
            model_source: None,
            model_updated: None,
            discovery_mode,
            last_updated: Utc::now(),
            issues: BTreeSet::new(),
        }
    }

    /// A partial record carrying only the given open ports.
    pub fn with_ports(
        address: IpAddr,
        discovery_mode: DiscoveryMode,
        ports: impl IntoIterator<Item = u16>,
    ) -> Self {
        let mut record = Self::new(address, discovery_mode);
        record.open_ports.extend(ports);
        record
    }

    /// A partial record carrying one identification result.
    ///
    /// A successful probe sets the model; a failed one records an issue.
    pub fn from_identification(
        address: IpAddr,
        discovery_mode: DiscoveryMode,
        identification: &Identification,
    ) -> Self {
        let mut record = Self::new(address, discovery_mode);
        match &identification.outcome {
            IdentifyOutcome::Model(model) => record.set_model(model, identification.source),
            IdentifyOutcome::Unknown(kind) => {
                record.issues.insert(DiscoveryIssue::ProbeFailed {
                    source: identification.source,
                    kind: *kind,
                });
            }
        }
        record
    }

    /// Set the model as observed now by `source`.
    pub fn set_model(&mut self, model: &str, source: ModelSource) {
        self.model = Some(model.to_owned());
        self.model_source = Some(source);
        self.model_updated = Some(self.last_updated);
    }

    /// Whether a model has been identified.
    pub fn is_complete(&self) -> bool {
        self.model.is_some()
    }

    /// Recommended device URI for registering this printer.
    ///
    /// IPP is preferred, then raw socket, then LPD.
    pub fn device_uri(&self) -> Option<String> {
        if self.open_ports.contains(&IPP_PORT) {
            let sock = SocketAddr::new(self.address, IPP_PORT);
            Some(format!("ipp://{sock}/ipp/print"))
        } else if self.open_ports.contains(&RAW_PORT) {
            let sock = SocketAddr::new(self.address, RAW_PORT);
            Some(format!("socket://{sock}"))
        } else if self.open_ports.contains(&LPD_PORT) {
            let host = match self.address {
                IpAddr::V4(v4) => v4.to_string(),
                IpAddr::V6(v6) => format!("[{v6}]"),
            };
            Some(format!("lpd://{host}/lp"))
        } else {
            None
        }
    }

    /// Best name to show a user: model, then service name, then hostname,
    /// then the bare address.
    pub fn display_name(&self) -> String {
        self.model
            .as_deref()
            .or(self.service_name.as_deref())
            .or(self.hostname.as_deref())
            .map(String::from)
            .unwrap_or_else(|| self.address.to_string())
    }
}
