// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Passive mDNS / DNS-SD listening.
//
// We browse the printer service types (`_ipp._tcp`, `_ipps._tcp`,
// `_printer._tcp`, `_pdl-datastream._tcp`) with the `mdns-sd` crate for a
// fixed window.  Each resolved service becomes an `Announcement`, then a
// preliminary `PrinterRecord` carrying whatever the announcement told us:
// host name, instance name, the announced port and a model hint from TXT.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use printseek_core::error::{PrintseekError, Result};
use printseek_core::types::{DiscoveryMode, ModelSource, PrinterRecord};

use crate::aggregator::{adds_information, merge};
use crate::stream::RecordStream;

/// TXT keys kept from an announcement, lowercased.
const TXT_KEYS: &[&str] = &[
    "product",
    "ty",
    "usb_mfg",
    "usb_mdl",
    "printer-make-and-model",
    "rp",
    "note",
];

/// One resolved service announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub service_type: String,
    pub fullname: String,
    pub hostname: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    /// TXT record, keys lowercased.
    pub txt: HashMap<String, String>,
}

impl Announcement {
    pub fn from_service_info(info: &ServiceInfo, service_type: &str) -> Self {
        let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
        addresses.sort();

        let txt = info
            .get_properties()
            .iter()
            .map(|prop| (prop.key().to_ascii_lowercase(), prop.val_str().to_owned()))
            .filter(|(key, _)| TXT_KEYS.contains(&key.as_str()))
            .collect();

        Self {
            service_type: service_type.to_owned(),
            fullname: info.get_fullname().to_owned(),
            hostname: info.get_hostname().to_owned(),
            addresses,
            port: info.get_port(),
            txt,
        }
    }

    fn txt(&self, key: &str) -> Option<&str> {
        self.txt
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Model hint from TXT, best key first: `product`, `ty`,
    /// `usb_MFG` + `usb_MDL`, `printer-make-and-model`.
    pub fn model_hint(&self) -> Option<String> {
        if let Some(product) = self.txt("product") {
            let stripped = product.trim_start_matches('(').trim_end_matches(')').trim();
            if !stripped.is_empty() {
                return Some(stripped.to_owned());
            }
        }
        if let Some(ty) = self.txt("ty") {
            return Some(ty.to_owned());
        }
        if let (Some(mfg), Some(mdl)) = (self.txt("usb_mfg"), self.txt("usb_mdl")) {
            return Some(format!("{mfg} {mdl}"));
        }
        self.txt("printer-make-and-model").map(String::from)
    }

    /// DNS-SD instance name, i.e. the full name minus the service type.
    pub fn instance_name(&self) -> Option<String> {
        let suffix = format!(".{}", self.service_type);
        self.fullname
            .strip_suffix(&suffix)
            .filter(|name| !name.is_empty())
            .map(String::from)
    }
}

/// Turn an announcement into a preliminary record.
///
/// Returns `None` when the announcement carries no address.
pub fn announcement_to_record(announcement: &Announcement) -> Option<PrinterRecord> {
    // Prefer IPv4 for wider printer compatibility.
    let address = announcement
        .addresses
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| announcement.addresses.first())
        .copied()?;

    let mut record = PrinterRecord::new(address, DiscoveryMode::Passive);
    let hostname = announcement.hostname.trim_end_matches('.');
    if !hostname.is_empty() {
        record.hostname = Some(hostname.to_owned());
    }
    record.service_name = announcement.instance_name();
    if announcement.port != 0 {
        record.open_ports.insert(announcement.port);
    }
    if let Some(model) = announcement.model_hint() {
        record.set_model(&model, ModelSource::Announcement);
    }
    Some(record)
}

/// Where announcements come from.
pub trait AnnouncementSource: Send + Sync {
    /// Start delivering announcements until `deadline`.
    ///
    /// The returned channel closes at or shortly after the deadline.
    fn subscribe(&self, deadline: std::time::Instant) -> Result<mpsc::Receiver<Announcement>>;
}

/// Announcements from the local network via `mdns-sd`.
#[derive(Debug, Clone)]
pub struct MdnsSource {
    service_types: Vec<String>,
}

impl MdnsSource {
    pub fn new(service_types: Vec<String>) -> Self {
        Self { service_types }
    }
}

impl AnnouncementSource for MdnsSource {
    fn subscribe(&self, deadline: std::time::Instant) -> Result<mpsc::Receiver<Announcement>> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| PrintseekError::Discovery(format!("failed to start mDNS daemon: {e}")))?;
        let (tx, rx) = mpsc::channel(crate::stream::STREAM_CAPACITY);

        let mut handles = Vec::with_capacity(self.service_types.len());
        for service_type in &self.service_types {
            let receiver = match daemon.browse(service_type) {
                Ok(receiver) => receiver,
                Err(e) => {
                    warn!(service_type = %service_type, error = %e, "mDNS browse failed");
                    continue;
                }
            };
            handles.push(spawn_browser(
                daemon.clone(),
                service_type.clone(),
                receiver,
                tx.clone(),
                deadline,
            )?);
        }

        // Shut the daemon down once every browser thread has returned.
        std::thread::Builder::new()
            .name("mdns-shutdown".into())
            .spawn(move || {
                for handle in handles {
                    let _ = handle.join();
                }
                if let Err(e) = daemon.shutdown() {
                    warn!(error = %e, "mDNS daemon shutdown failed");
                }
            })?;

        Ok(rx)
    }
}

/// Drain one browse receiver on a dedicated thread until `deadline`.
fn spawn_browser(
    daemon: ServiceDaemon,
    service_type: String,
    receiver: mdns_sd::Receiver<ServiceEvent>,
    tx: mpsc::Sender<Announcement>,
    deadline: std::time::Instant,
) -> Result<std::thread::JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name(format!("mdns-{service_type}"))
        .spawn(move || {
            loop {
                let remaining = deadline.saturating_duration_since(std::time::Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match receiver.recv_timeout(remaining) {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        let announcement = Announcement::from_service_info(&info, &service_type);
                        debug!(name = %announcement.fullname, "service resolved");
                        if tx.blocking_send(announcement).is_err() {
                            break;
                        }
                    }
                    Ok(ServiceEvent::SearchStopped(_)) => break,
                    Ok(other) => debug!(event = ?other, "mDNS event"),
                    Err(_) => break,
                }
            }
            if let Err(e) = daemon.stop_browse(&service_type) {
                debug!(service_type = %service_type, error = %e, "stop browse");
            }
        })?;
    Ok(handle)
}

/// Collapses repeated announcements for one address within a window.
#[derive(Debug, Default)]
pub struct WindowDedup {
    seen: HashMap<IpAddr, PrinterRecord>,
}

impl WindowDedup {
    /// Fold `record` in.  Returns the merged record only if it says
    /// something new about its address.
    pub fn offer(&mut self, record: PrinterRecord) -> Option<PrinterRecord> {
        match self.seen.get_mut(&record.address) {
            None => {
                self.seen.insert(record.address, record.clone());
                Some(record)
            }
            Some(existing) => {
                let merged = merge(existing, &record);
                let news = adds_information(existing, &merged);
                *existing = merged;
                news.then(|| existing.clone())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Listens for announcements for a bounded window.
#[derive(Clone)]
pub struct PassiveListener {
    source: Arc<dyn AnnouncementSource>,
}

impl PassiveListener {
    pub fn new(source: Arc<dyn AnnouncementSource>) -> Self {
        Self { source }
    }

    /// Listen for `window` and stream one preliminary record per address,
    /// plus an updated one whenever a later announcement adds information.
    ///
    /// The stream ends at the deadline even if announcements are still
    /// arriving.  A source that cannot start yields an empty stream.
    /// Must be called from within a tokio runtime.
    pub fn listen(&self, window: Duration) -> RecordStream {
        let deadline = Instant::now() + window;
        let mut announcements = match self.source.subscribe(deadline.into_std()) {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "announcement source unavailable, passive window is empty");
                return RecordStream::empty();
            }
        };

        let (tx, stream) = RecordStream::channel();
        info!(window_ms = window.as_millis() as u64, "passive window opened");

        tokio::spawn(async move {
            let mut dedup = WindowDedup::default();
            let mut count = 0usize;
            while let Ok(Some(announcement)) = timeout_at(deadline, announcements.recv()).await {
                count += 1;
                let Some(record) = announcement_to_record(&announcement) else {
                    debug!(name = %announcement.fullname, "announcement without address");
                    continue;
                };
                if let Some(update) = dedup.offer(record) {
                    if tx.send(update).await.is_err() {
                        break;
                    }
                }
            }
            info!(
                announcements = count,
                addresses = dedup.len(),
                "passive window closed"
            );
        });

        stream
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Replays scripted announcements, optionally repeating forever.
    pub struct FakeSource {
        pub announcements: Vec<Announcement>,
        pub repeat: bool,
        pub fail: bool,
    }

    impl FakeSource {
        pub fn new(announcements: Vec<Announcement>) -> Self {
            Self {
                announcements,
                repeat: false,
                fail: false,
            }
        }
    }

    impl AnnouncementSource for FakeSource {
        fn subscribe(&self, deadline: std::time::Instant) -> Result<mpsc::Receiver<Announcement>> {
            if self.fail {
                return Err(PrintseekError::Discovery("no multicast".into()));
            }
            let (tx, rx) = mpsc::channel(8);
            let script = self.announcements.clone();
            let repeat = self.repeat;
            tokio::spawn(async move {
                loop {
                    for a in &script {
                        if tx.send(a.clone()).await.is_err() {
                            return;
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    if !repeat || std::time::Instant::now() >= deadline + Duration::from_secs(5) {
                        return;
                    }
                }
            });
            Ok(rx)
        }
    }

    pub fn announcement(address: &str, service_type: &str, txt: &[(&str, &str)]) -> Announcement {
        Announcement {
            service_type: service_type.into(),
            fullname: format!("Office Printer.{service_type}"),
            hostname: "NPI1234.local.".into(),
            addresses: vec![address.parse().expect("address")],
            port: 631,
            txt: txt
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), (*v).to_owned()))
                .collect(),
        }
    }
}
