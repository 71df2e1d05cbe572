// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Model identification probes.
//
// Three independent ways to ask a device what it is:
//   - IPP  Get-Printer-Attributes → `printer-make-and-model`   (port 631)
//   - SNMP GET sysDescr.0 with community "public"                (port 161)
//   - PJL  `@PJL INFO ID` over the raw socket                    (port 9100)
//
// All applicable probes run concurrently.  Each one owns its timeout and
// turns every failure into `IdentifyOutcome::Unknown`; the priority between
// their answers is applied later, when results are merged.

pub mod ipp;
pub mod pjl;
pub mod snmp;

use std::collections::BTreeSet;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

use printseek_core::config::DiscoveryConfig;
use printseek_core::types::{FailureKind, Identification, IdentifyOutcome, ModelSource};

pub use self::ipp::IppIdentifier;
pub use self::pjl::PjlIdentifier;
pub use self::snmp::SnmpIdentifier;

/// One protocol-specific model probe.
#[async_trait]
pub trait ModelIdentifier: Send + Sync {
    /// Which source label results from this probe carry.
    fn source(&self) -> ModelSource;

    /// Port that must be open for this probe to be launched.
    ///
    /// `None` means the probe runs whenever the address has any open port.
    fn required_port(&self) -> Option<u16>;

    /// Ask the device at `address` for its model.  Never fails.
    async fn identify(&self, address: IpAddr) -> IdentifyOutcome;
}

/// Run `fut`, reporting `Timeout` if it does not finish within `limit`.
pub async fn with_deadline<F>(limit: Duration, fut: F) -> IdentifyOutcome
where
    F: Future<Output = IdentifyOutcome>,
{
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(IdentifyOutcome::Unknown(FailureKind::Timeout))
}

/// The set of probes a session fans out to.
#[derive(Clone)]
pub struct IdentifierSet {
    identifiers: Vec<Arc<dyn ModelIdentifier>>,
}

impl IdentifierSet {
    pub fn new(identifiers: Vec<Arc<dyn ModelIdentifier>>) -> Self {
        Self { identifiers }
    }

    /// IPP, SNMP and PJL probes built from `config`.
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(vec![
            Arc::new(IppIdentifier::from_config(config)) as Arc<dyn ModelIdentifier>,
            Arc::new(SnmpIdentifier::from_config(config)) as Arc<dyn ModelIdentifier>,
            Arc::new(PjlIdentifier::from_config(config)) as Arc<dyn ModelIdentifier>,
        ])
    }

    /// Probes whose required port is in `open_ports`.
    pub fn applicable(&self, open_ports: &BTreeSet<u16>) -> Vec<Arc<dyn ModelIdentifier>> {
        self.identifiers
            .iter()
            .filter(|id| id.required_port().is_none_or(|p| open_ports.contains(&p)))
            .cloned()
            .collect()
    }

    /// Launch every applicable probe at once and wait for all of them.
    pub async fn identify_all(
        &self,
        address: IpAddr,
        open_ports: &BTreeSet<u16>,
    ) -> Vec<Identification> {
        let launched = self.applicable(open_ports);
        debug!(
            address = %address,
            probes = ?launched.iter().map(|id| id.source()).collect::<Vec<_>>(),
            "launching identification probes"
        );

        join_all(launched.into_iter().map(|id| async move {
            let outcome = id.identify(address).await;
            debug!(address = %address, source = %id.source(), ?outcome, "probe finished");
            Identification {
                source: id.source(),
                outcome,
            }
        }))
        .await
    }
}
