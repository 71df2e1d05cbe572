// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Discovery configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PrintseekError, Result};
use crate::types::{IPP_PORT, LPD_PORT, RAW_PORT, SNMP_PORT};

/// SNMP protocol version used for the sysDescr query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnmpVersion {
    /// Understood by every agent, including old JetDirect cards.
    #[default]
    V1,
    V2c,
}

/// Tunables for a discovery session.
///
/// Durations are stored in milliseconds so the JSON form stays readable.
/// Fields missing from a config file take their default value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Length of the passive mDNS listening window.
    pub scan_window_ms: u64,
    /// Connect timeout for each candidate port.
    pub per_port_timeout_ms: u64,
    /// Ports checked by the port prober (631, 9100, 515).
    pub candidate_ports: Vec<u16>,
    /// DNS-SD service types browsed during the passive window.
    pub service_types: Vec<String>,
    /// Port used by the IPP identifier.
    pub ipp_port: u16,
    /// Resource path appended to the IPP URI.
    pub ipp_resource: String,
    pub ipp_timeout_ms: u64,
    /// Port used by the SNMP identifier.
    pub snmp_port: u16,
    /// Read-only community string.
    pub snmp_community: String,
    pub snmp_version: SnmpVersion,
    pub snmp_timeout_ms: u64,
    /// Port used by the PJL identifier.
    pub pjl_port: u16,
    pub pjl_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_window_ms: 5_000,
            per_port_timeout_ms: 1_000,
            candidate_ports: vec![IPP_PORT, RAW_PORT, LPD_PORT],
            service_types: vec![
                "_ipp._tcp.local.".into(),
                "_ipps._tcp.local.".into(),
                "_printer._tcp.local.".into(),
                "_pdl-datastream._tcp.local.".into(),
            ],
            ipp_port: IPP_PORT,
            ipp_resource: "ipp/print".into(),
            ipp_timeout_ms: 3_000,
            snmp_port: SNMP_PORT,
            snmp_community: "public".into(),
            snmp_version: SnmpVersion::V1,
            snmp_timeout_ms: 2_000,
            pjl_port: RAW_PORT,
            pjl_timeout_ms: 2_000,
        }
    }
}

impl DiscoveryConfig {
    pub fn scan_window(&self) -> Duration {
        Duration::from_millis(self.scan_window_ms)
    }

    pub fn per_port_timeout(&self) -> Duration {
        Duration::from_millis(self.per_port_timeout_ms)
    }

    pub fn ipp_timeout(&self) -> Duration {
        Duration::from_millis(self.ipp_timeout_ms)
    }

    pub fn snmp_timeout(&self) -> Duration {
        Duration::from_millis(self.snmp_timeout_ms)
    }

    pub fn pjl_timeout(&self) -> Duration {
        Duration::from_millis(self.pjl_timeout_ms)
    }

    /// Reject settings that would make every probe fail instantly.
    pub fn validate(&self) -> Result<()> {
        if self.per_port_timeout_ms == 0 {
            return Err(PrintseekError::Config("per_port_timeout_ms must be > 0".into()));
        }
        if self.candidate_ports.is_empty() {
            return Err(PrintseekError::Config("candidate_ports is empty".into()));
        }
        if self.service_types.iter().any(|s| !s.ends_with(".local.")) {
            return Err(PrintseekError::Config(
                "service types must end with \".local.\"".into(),
            ));
        }
        Ok(())
    }

    /// Load a config file written as JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Write this config as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
