// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Discovery session.
//
// Drives every address through the state machine
//
//   Idle -> PassiveScan -> Probing -> Identifying -> Settled
//
// A passive window collects announcements; when it closes, addresses whose
// announcement already named a model settle, and the rest are probed.  An
// explicit request for one address skips straight to probing.  Addresses are
// processed in parallel; within one address identification waits for the
// port scan.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use printseek_core::config::DiscoveryConfig;
use printseek_core::types::{DiscoveryIssue, DiscoveryMode, PrinterRecord, SessionId};

use crate::aggregator::{AddressState, RecordStore};
use crate::identify::IdentifierSet;
use crate::listener::{AnnouncementSource, MdnsSource, PassiveListener};
use crate::prober::{PortScanner, TcpPortProber};
use crate::stream::RecordStream;

struct Inner {
    id: SessionId,
    config: DiscoveryConfig,
    store: RecordStore,
    prober: Arc<dyn PortScanner>,
    identifiers: IdentifierSet,
    listener: PassiveListener,
}

/// A discovery session.  Cheap to clone; clones share the record store.
#[derive(Clone)]
pub struct Discovery {
    inner: Arc<Inner>,
}

impl Discovery {
    /// A session using the real network: TCP port scan, IPP/SNMP/PJL
    /// probes and mDNS.
    pub fn new(config: DiscoveryConfig) -> Self {
        let prober = Arc::new(TcpPortProber::new(config.per_port_timeout()));
        let identifiers = IdentifierSet::from_config(&config);
        let source = Arc::new(MdnsSource::new(config.service_types.clone()));
        Self::with_components(config, prober, identifiers, source)
    }

    /// A session with caller-supplied collaborators.
    pub fn with_components(
        config: DiscoveryConfig,
        prober: Arc<dyn PortScanner>,
        identifiers: IdentifierSet,
        source: Arc<dyn AnnouncementSource>,
    ) -> Self {
        let id = SessionId::new();
        debug!(session = %id, "discovery session created");
        Self {
            inner: Arc::new(Inner {
                id,
                config,
                store: RecordStore::new(),
                prober,
                identifiers,
                listener: PassiveListener::new(source),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.inner.config
    }

    /// Every record seen so far, ordered by address.
    pub fn records(&self) -> Vec<PrinterRecord> {
        self.inner.store.snapshot()
    }

    pub fn record(&self, address: IpAddr) -> Option<PrinterRecord> {
        self.inner.store.get(address)
    }

    pub fn state(&self, address: IpAddr) -> Option<AddressState> {
        self.inner.store.state(address)
    }

    /// Probe and identify one address, returning its settled record.
    ///
    /// Always a fresh request: a settled address is probed again and the
    /// new results are merged into what is already known.
    pub async fn discover_active(&self, address: IpAddr) -> PrinterRecord {
        self.inner.store.begin_request(address);
        self.inner.run_pipeline(address).await
    }

    /// Listen for announcements for `window`, then settle every address
    /// heard from.  Records are streamed as each address settles.
    ///
    /// Must be called from within a tokio runtime.
    pub fn discover_passive(&self, window: Duration) -> RecordStream {
        let inner = Arc::clone(&self.inner);
        let mut announcements = inner.listener.listen(window);
        let (tx, stream) = RecordStream::channel();

        tokio::spawn(async move {
            let mut heard = BTreeSet::new();
            while let Some(record) = announcements.recv().await {
                let address = record.address;
                let state = inner.store.state(address);
                inner.store.observe(record);
                match state {
                    None | Some(AddressState::PassiveScan) => {
                        heard.insert(address);
                    }
                    Some(other) => {
                        debug!(address = %address, state = ?other, "announcement merged, address already handled");
                    }
                }
            }

            let mut probes = JoinSet::new();
            for address in heard {
                let Some(record) = inner.store.get(address) else {
                    continue;
                };
                if record.is_complete() {
                    if inner.store.transition(address, AddressState::Settled) {
                        info!(address = %address, model = ?record.model, "settled from announcement");
                        let _ = tx.send(record).await;
                    }
                } else if inner.store.transition(address, AddressState::Probing) {
                    let inner = Arc::clone(&inner);
                    probes.spawn(async move { inner.run_pipeline(address).await });
                }
            }

            while let Some(joined) = probes.join_next().await {
                match joined {
                    Ok(record) => {
                        let _ = tx.send(record).await;
                    }
                    Err(e) => warn!(error = %e, "address pipeline task failed"),
                }
            }
            debug!(session = %inner.id, "passive discovery finished");
        });

        stream
    }
}

impl Inner {
    /// Probing -> Identifying -> Settled for one address.
    #[instrument(skip(self), fields(session = %self.id))]
    async fn run_pipeline(&self, address: IpAddr) -> PrinterRecord {
        let ports = self
            .prober
            .probe(address, &self.config.candidate_ports)
            .await;
        let record = self.store.observe(PrinterRecord::with_ports(
            address,
            DiscoveryMode::Active,
            ports,
        ));

        if record.open_ports.is_empty() {
            let mut issue = PrinterRecord::new(address, DiscoveryMode::Active);
            issue.issues.insert(DiscoveryIssue::NoPortsFound);
            let record = self.store.observe(issue);
            self.store.transition(address, AddressState::Settled);
            info!(address = %address, "settled, no print ports open");
            return record;
        }

        self.store.transition(address, AddressState::Identifying);
        let results = self
            .identifiers
            .identify_all(address, &record.open_ports)
            .await;

        let mut record = record;
        for result in &results {
            record = self.store.observe(PrinterRecord::from_identification(
                address,
                DiscoveryMode::Active,
                result,
            ));
        }

        if !record.is_complete() {
            let mut issue = PrinterRecord::new(address, DiscoveryMode::Active);
            issue.issues.insert(DiscoveryIssue::ModelUnknown);
            record = self.store.observe(issue);
        }

        self.store.transition(address, AddressState::Settled);
        info!(
            address = %address,
            model = ?record.model,
            source = ?record.model_source,
            ports = ?record.open_ports,
            "settled"
        );
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identify::ModelIdentifier;
    use crate::identify::testing::FakeIdentifier;
    use crate::listener::testing::{FakeSource, announcement};
    use async_trait::async_trait;
    use futures::StreamExt;
    use printseek_core::types::{FailureKind, IdentifyOutcome, ModelSource};
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const IPP: &str = "_ipp._tcp.local.";

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    /// Returns scripted scans in order, then the last one forever.
    struct FakeScanner {
        scans: Mutex<VecDeque<BTreeSet<u16>>>,
        calls: AtomicUsize,
    }

    impl FakeScanner {
        fn new(scans: Vec<Vec<u16>>) -> Arc<Self> {
            Arc::new(Self {
                scans: Mutex::new(
                    scans
                        .into_iter()
                        .map(|s| s.into_iter().collect())
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PortScanner for FakeScanner {
        async fn probe(&self, _address: IpAddr, _candidates: &[u16]) -> BTreeSet<u16> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut scans = self.scans.lock().expect("scan script lock poisoned");
            if scans.len() > 1 {
                scans.pop_front().unwrap_or_default()
            } else {
                scans.front().cloned().unwrap_or_default()
            }
        }
    }

    struct Probes {
        ipp: Arc<FakeIdentifier>,
        snmp: Arc<FakeIdentifier>,
        pjl: Arc<FakeIdentifier>,
    }

    impl Probes {
        fn new(ipp: IdentifyOutcome, snmp: IdentifyOutcome, pjl: IdentifyOutcome) -> Self {
            Self {
                ipp: Arc::new(FakeIdentifier::new(ModelSource::DocumentTransfer, Some(631), ipp)),
                snmp: Arc::new(FakeIdentifier::new(ModelSource::Management, None, snmp)),
                pjl: Arc::new(FakeIdentifier::new(ModelSource::JobLanguage, Some(9100), pjl)),
            }
        }

        fn set(&self) -> IdentifierSet {
            IdentifierSet::new(vec![
                self.ipp.clone() as Arc<dyn ModelIdentifier>,
                self.snmp.clone() as Arc<dyn ModelIdentifier>,
                self.pjl.clone() as Arc<dyn ModelIdentifier>,
            ])
        }
    }

    fn unknown(kind: FailureKind) -> IdentifyOutcome {
        IdentifyOutcome::Unknown(kind)
    }

    fn model(name: &str) -> IdentifyOutcome {
        IdentifyOutcome::Model(name.into())
    }

    fn session(
        scanner: Arc<FakeScanner>,
        probes: &Probes,
        source: FakeSource,
    ) -> Discovery {
        Discovery::with_components(
            DiscoveryConfig::default(),
            scanner,
            probes.set(),
            Arc::new(source),
        )
    }

    #[tokio::test]
    async fn active_ipp_only_printer() {
        let probes = Probes::new(
            model("HP LaserJet Pro M404dn"),
            unknown(FailureKind::Timeout),
            model("LASERJET M404"),
        );
        let discovery = session(FakeScanner::new(vec![vec![631]]), &probes, FakeSource::new(vec![]));

        let record = discovery.discover_active(addr(5)).await;

        assert_eq!(record.open_ports, BTreeSet::from([631]));
        assert_eq!(record.model.as_deref(), Some("HP LaserJet Pro M404dn"));
        assert_eq!(record.model_source, Some(ModelSource::DocumentTransfer));
        assert_eq!(record.discovery_mode, DiscoveryMode::Active);
        assert!(record.issues.contains(&DiscoveryIssue::ProbeFailed {
            source: ModelSource::Management,
            kind: FailureKind::Timeout,
        }));
        assert_eq!(probes.snmp.calls(), 1);
        assert_eq!(probes.pjl.calls(), 0);
        assert_eq!(discovery.state(addr(5)), Some(AddressState::Settled));
    }

    #[tokio::test]
    async fn no_open_ports_settles_without_identification() {
        let probes = Probes::new(model("X"), model("Y"), model("Z"));
        let discovery = session(FakeScanner::new(vec![vec![]]), &probes, FakeSource::new(vec![]));

        let record = discovery.discover_active(addr(6)).await;

        assert!(record.open_ports.is_empty());
        assert!(record.model.is_none());
        assert_eq!(record.issues, BTreeSet::from([DiscoveryIssue::NoPortsFound]));
        assert_eq!(probes.ipp.calls() + probes.snmp.calls() + probes.pjl.calls(), 0);
        assert_eq!(discovery.state(addr(6)), Some(AddressState::Settled));
    }

    #[tokio::test]
    async fn document_transfer_beats_job_language() {
        let probes = Probes::new(
            model("HP LaserJet 4250"),
            unknown(FailureKind::ConnectionRefused),
            model("HP LJ 4250"),
        );
        let discovery = session(
            FakeScanner::new(vec![vec![631, 9100]]),
            &probes,
            FakeSource::new(vec![]),
        );

        let record = discovery.discover_active(addr(7)).await;
        assert_eq!(record.model.as_deref(), Some("HP LaserJet 4250"));
        assert_eq!(record.model_source, Some(ModelSource::DocumentTransfer));
        assert_eq!(probes.pjl.calls(), 1);
    }

    #[tokio::test]
    async fn every_probe_failing_marks_model_unknown() {
        let probes = Probes::new(
            unknown(FailureKind::Unparseable),
            unknown(FailureKind::Timeout),
            unknown(FailureKind::ModelUnknown),
        );
        let discovery = session(
            FakeScanner::new(vec![vec![631, 9100]]),
            &probes,
            FakeSource::new(vec![]),
        );

        let record = discovery.discover_active(addr(8)).await;
        assert!(record.model.is_none());
        assert!(record.issues.contains(&DiscoveryIssue::ModelUnknown));
        assert_eq!(record.issues.len(), 4);
    }

    #[tokio::test]
    async fn reprobing_never_loses_ports() {
        let probes = Probes::new(
            unknown(FailureKind::Timeout),
            unknown(FailureKind::Timeout),
            unknown(FailureKind::Timeout),
        );
        let scanner = FakeScanner::new(vec![vec![631, 9100], vec![515]]);
        let discovery = session(scanner.clone(), &probes, FakeSource::new(vec![]));

        discovery.discover_active(addr(9)).await;
        let record = discovery.discover_active(addr(9)).await;

        assert_eq!(scanner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(record.open_ports, BTreeSet::from([515, 631, 9100]));
    }

    #[tokio::test]
    async fn passive_announcements_merge_into_one_record() {
        let mut pdl = announcement("10.0.0.9", "_pdl-datastream._tcp.local.", &[]);
        pdl.port = 9100;
        let source = FakeSource::new(vec![
            announcement("10.0.0.9", IPP, &[("ty", "HP LaserJet 4250")]),
            pdl,
        ]);
        let probes = Probes::new(model("X"), model("Y"), model("Z"));
        let scanner = FakeScanner::new(vec![vec![]]);
        let discovery = session(scanner.clone(), &probes, source);

        let records: Vec<_> = discovery
            .discover_passive(Duration::from_millis(200))
            .collect()
            .await;

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.address, addr(9));
        assert_eq!(record.open_ports, BTreeSet::from([631, 9100]));
        assert_eq!(record.model.as_deref(), Some("HP LaserJet 4250"));
        assert_eq!(record.model_source, Some(ModelSource::Announcement));
        assert_eq!(record.discovery_mode, DiscoveryMode::Passive);
        assert_eq!(scanner.calls.load(Ordering::SeqCst), 0);
        assert_eq!(discovery.state(addr(9)), Some(AddressState::Settled));
    }

    #[tokio::test]
    async fn hostname_and_model_from_separate_announcements() {
        let named = announcement("10.0.0.12", IPP, &[]);
        let mut modelled = announcement("10.0.0.12", IPP, &[("ty", "Canon MF743C")]);
        modelled.hostname = String::new();
        let probes = Probes::new(model("X"), model("Y"), model("Z"));
        let scanner = FakeScanner::new(vec![vec![]]);
        let discovery = session(scanner.clone(), &probes, FakeSource::new(vec![named, modelled]));

        let records: Vec<_> = discovery
            .discover_passive(Duration::from_millis(200))
            .collect()
            .await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hostname.as_deref(), Some("NPI1234.local"));
        assert_eq!(records[0].model.as_deref(), Some("Canon MF743C"));
        assert_eq!(records[0].model_source, Some(ModelSource::Announcement));
        assert_eq!(scanner.calls.load(Ordering::SeqCst), 0);
        assert_eq!(discovery.records().len(), 1);
    }

    #[tokio::test]
    async fn passive_address_without_model_is_probed() {
        let mut pdl = announcement("10.0.0.10", "_pdl-datastream._tcp.local.", &[]);
        pdl.port = 9100;
        let probes = Probes::new(
            model("never launched"),
            unknown(FailureKind::Timeout),
            model("HP LaserJet 4250"),
        );
        let discovery = session(FakeScanner::new(vec![vec![9100]]), &probes, FakeSource::new(vec![pdl]));

        let records: Vec<_> = discovery
            .discover_passive(Duration::from_millis(200))
            .collect()
            .await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].model.as_deref(), Some("HP LaserJet 4250"));
        assert_eq!(records[0].model_source, Some(ModelSource::JobLanguage));
        assert_eq!(records[0].discovery_mode, DiscoveryMode::Passive);
        assert_eq!(probes.ipp.calls(), 0);
    }

    #[tokio::test]
    async fn settled_address_is_not_reopened_by_announcement() {
        let probes = Probes::new(
            model("HP LaserJet Pro M404dn"),
            unknown(FailureKind::Timeout),
            unknown(FailureKind::Timeout),
        );
        let scanner = FakeScanner::new(vec![vec![631]]);
        let source = FakeSource::new(vec![announcement("10.0.0.5", IPP, &[("ty", "M404dn")])]);
        let discovery = session(scanner.clone(), &probes, source);

        discovery.discover_active(addr(5)).await;
        let records: Vec<_> = discovery
            .discover_passive(Duration::from_millis(150))
            .collect()
            .await;

        assert!(records.is_empty());
        assert_eq!(scanner.calls.load(Ordering::SeqCst), 1);
        let stored = discovery.record(addr(5)).expect("record");
        assert_eq!(stored.hostname.as_deref(), Some("NPI1234.local"));
        assert_eq!(stored.model.as_deref(), Some("HP LaserJet Pro M404dn"));
        assert_eq!(discovery.state(addr(5)), Some(AddressState::Settled));
    }

    #[tokio::test]
    async fn passive_window_ends_on_time() {
        let mut source = FakeSource::new(vec![announcement("10.0.0.11", IPP, &[("ty", "X")])]);
        source.repeat = true;
        let probes = Probes::new(model("X"), model("Y"), model("Z"));
        let discovery = session(FakeScanner::new(vec![vec![]]), &probes, source);

        let started = std::time::Instant::now();
        let records: Vec<_> = discovery
            .discover_passive(Duration::from_millis(200))
            .collect()
            .await;

        assert!(started.elapsed() < Duration::from_millis(800));
        assert_eq!(records.len(), 1);
        assert_eq!(discovery.records().len(), 1);
    }
}
