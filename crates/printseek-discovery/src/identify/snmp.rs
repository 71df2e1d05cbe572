// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SNMP model probe.
//
// A single unauthenticated GET of sysDescr.0 (1.3.6.1.2.1.1.1.0) with the
// read-only community "public", over SNMPv1 unless configured for v2c.
// `snmp2`'s session is blocking, so the query runs on the blocking pool and
// the async side only waits for it.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use snmp2::{Oid, SyncSession, Value};
use tracing::{debug, warn};

use printseek_core::config::{DiscoveryConfig, SnmpVersion};
use printseek_core::error::{PrintseekError, Result, classify_error};
use printseek_core::types::{FailureKind, IdentifyOutcome, ModelSource};

use super::{ModelIdentifier, with_deadline};

/// sysDescr.0 from MIB-II.
pub const SYS_DESCR_OID: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];

/// Extra time the async side waits beyond the session's own timeout.
const JOIN_SLACK: Duration = Duration::from_millis(250);

/// Model probe over SNMP.
#[derive(Debug, Clone)]
pub struct SnmpIdentifier {
    port: u16,
    community: String,
    version: SnmpVersion,
    timeout: Duration,
}

impl SnmpIdentifier {
    pub fn new(port: u16, community: impl Into<String>, timeout: Duration) -> Self {
        Self {
            port,
            community: community.into(),
            version: SnmpVersion::default(),
            timeout,
        }
    }

    pub fn with_version(mut self, version: SnmpVersion) -> Self {
        self.version = version;
        self
    }

    pub fn version(&self) -> SnmpVersion {
        self.version
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(config.snmp_port, config.snmp_community.clone(), config.snmp_timeout())
            .with_version(config.snmp_version)
    }
}

#[async_trait]
impl ModelIdentifier for SnmpIdentifier {
    fn source(&self) -> ModelSource {
        ModelSource::Management
    }

    /// SNMP is not part of the port scan, so it is always attempted.
    fn required_port(&self) -> Option<u16> {
        None
    }

    async fn identify(&self, address: IpAddr) -> IdentifyOutcome {
        let target = SocketAddr::new(address, self.port);
        let community = self.community.clone();
        let timeout = self.timeout;
        let version = self.version;

        let query = tokio::task::spawn_blocking(move || {
            query_sys_descr(target, community.as_bytes(), version, timeout)
        });

        with_deadline(self.timeout + JOIN_SLACK, async {
            match query.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    debug!(target = %target, error = %e, "SNMP query failed");
                    IdentifyOutcome::Unknown(classify_error(&e))
                }
                Err(e) => {
                    warn!(target = %target, error = %e, "SNMP query task died");
                    IdentifyOutcome::Unknown(FailureKind::ConnectionRefused)
                }
            }
        })
        .await
    }
}

/// Blocking GET of sysDescr.0.
fn query_sys_descr(
    target: SocketAddr,
    community: &[u8],
    version: SnmpVersion,
    timeout: Duration,
) -> Result<IdentifyOutcome> {
    let mut session = match version {
        SnmpVersion::V1 => SyncSession::new_v1(target, community, Some(timeout), 0)?,
        SnmpVersion::V2c => SyncSession::new_v2c(target, community, Some(timeout), 0)?,
    };
    let oid = Oid::from(SYS_DESCR_OID)
        .map_err(|e| PrintseekError::Probe(format!("invalid OID: {e:?}")))?;

    let response = session.get(&oid).map_err(|e| {
        let detail = format!("{e:?}");
        // snmp2 reports a socket read timeout as a receive error.
        if detail.contains("Receive") {
            PrintseekError::Timeout(timeout.as_millis() as u64)
        } else {
            PrintseekError::Probe(format!("GET sysDescr.0: {detail}"))
        }
    })?;

    let outcome = match response.varbinds.into_iter().next() {
        Some((_, Value::OctetString(bytes))) => model_from_octets(&bytes),
        Some(_) => IdentifyOutcome::Unknown(FailureKind::Unparseable),
        None => IdentifyOutcome::Unknown(FailureKind::ModelUnknown),
    };
    Ok(outcome)
}

/// Decode a sysDescr octet string.
///
/// Agents sometimes pad with NULs or end with CR/LF; both are stripped.
pub fn model_from_octets(bytes: &[u8]) -> IdentifyOutcome {
    let text = String::from_utf8_lossy(bytes);
    IdentifyOutcome::from_raw(text.trim_matches(|c: char| c == '\0' || c.is_whitespace()))
}
