// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Record merging and the per-session record store.
//
// Every piece of information about a printer (an announcement, a port scan,
// one identification probe) arrives as a partial `PrinterRecord`.  `merge`
// folds it into the stored record field by field; `RecordStore` owns the
// address-to-record map and serializes merges per address.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use printseek_core::types::{DiscoveryMode, PrinterRecord};

/// Merge `incoming` into `existing`, returning the combined record.
///
/// Field policy:
///   - `open_ports`, `issues`       set union
///   - `hostname`, `service_name`   keep existing unless it is empty
///   - `model`, `model_source`      higher-priority source wins; for equal
///     sources the later write wins, then the greater string
///   - `discovery_mode`, `address`  never change
///   - `last_updated`               advanced only when a field changed
///
/// The merge is idempotent and, for observations touching different fields,
/// independent of arrival order.
pub fn merge(existing: &PrinterRecord, incoming: &PrinterRecord) -> PrinterRecord {
    debug_assert_eq!(existing.address, incoming.address, "merging records for different addresses");

    let mut merged = existing.clone();
    let mut changed = false;

    for port in &incoming.open_ports {
        changed |= merged.open_ports.insert(*port);
    }
    for issue in &incoming.issues {
        changed |= merged.issues.insert(*issue);
    }

    changed |= fill_if_empty(&mut merged.hostname, &incoming.hostname);
    changed |= fill_if_empty(&mut merged.service_name, &incoming.service_name);

    if incoming_model_wins(existing, incoming) {
        merged.model = incoming.model.clone();
        merged.model_source = incoming.model_source;
        merged.model_updated = incoming.model_updated;
        changed = true;
    }

    if changed {
        merged.last_updated = existing.last_updated.max(incoming.last_updated);
    }
    merged
}

/// Whether `merged` knows anything `existing` did not, ignoring timestamps.
pub fn adds_information(existing: &PrinterRecord, merged: &PrinterRecord) -> bool {
    existing.open_ports != merged.open_ports
        || existing.issues != merged.issues
        || existing.hostname != merged.hostname
        || existing.service_name != merged.service_name
        || existing.model != merged.model
        || existing.model_source != merged.model_source
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|s| s.trim().is_empty())
}

fn fill_if_empty(target: &mut Option<String>, incoming: &Option<String>) -> bool {
    if is_blank(target) && !is_blank(incoming) {
        *target = incoming.clone();
        true
    } else {
        false
    }
}

fn incoming_model_wins(existing: &PrinterRecord, incoming: &PrinterRecord) -> bool {
    let (Some(in_model), Some(in_source)) = (&incoming.model, incoming.model_source) else {
        return false;
    };
    let (Some(ex_model), Some(ex_source)) = (&existing.model, existing.model_source) else {
        return true;
    };
    (in_source, incoming.model_updated, in_model) > (ex_source, existing.model_updated, ex_model)
}

/// Where an address is in the discovery state machine.
///
/// An address absent from the store is idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressState {
    /// Seen in an announcement; the passive window is still open.
    PassiveScan,
    /// Port scan in flight.
    Probing,
    /// Identification probes in flight.
    Identifying,
    /// All launched work has finished.  Terminal until an explicit request.
    Settled,
}

impl AddressState {
    fn can_move_to(self, next: AddressState) -> bool {
        use AddressState::*;
        matches!(
            (self, next),
            (PassiveScan, Probing)
                | (PassiveScan, Settled)
                | (Probing, Identifying)
                | (Probing, Settled)
                | (Identifying, Settled)
        )
    }
}

#[derive(Debug)]
struct Slot {
    record: PrinterRecord,
    state: AddressState,
}

/// Single-owner store of every record in a discovery session.
///
/// The outer lock is held only long enough to find or create an address's
/// slot.  Each slot has its own lock, so merges for one address are
/// serialized and merges for different addresses never wait on each other.
#[derive(Debug, Default)]
pub struct RecordStore {
    slots: Mutex<HashMap<IpAddr, Arc<Mutex<Slot>>>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, address: IpAddr) -> Option<Arc<Mutex<Slot>>> {
        self.slots
            .lock()
            .expect("record map lock poisoned")
            .get(&address)
            .cloned()
    }

    /// Fold an observation into the store and return the merged record.
    ///
    /// A first sighting creates the record; passive sightings start in
    /// `PassiveScan`, active ones in `Probing`.
    pub fn observe(&self, incoming: PrinterRecord) -> PrinterRecord {
        let address = incoming.address;
        let slot = {
            let mut slots = self.slots.lock().expect("record map lock poisoned");
            match slots.get(&address) {
                Some(slot) => Arc::clone(slot),
                None => {
                    let state = match incoming.discovery_mode {
                        DiscoveryMode::Passive => AddressState::PassiveScan,
                        DiscoveryMode::Active => AddressState::Probing,
                    };
                    debug!(address = %address, ?state, "new record");
                    slots.insert(
                        address,
                        Arc::new(Mutex::new(Slot {
                            record: incoming.clone(),
                            state,
                        })),
                    );
                    return incoming;
                }
            }
        };

        let mut slot = slot.lock().expect("record slot lock poisoned");
        let merged = merge(&slot.record, &incoming);
        if merged != slot.record {
            trace!(address = %address, "record updated");
            slot.record = merged;
        }
        slot.record.clone()
    }

    /// Start an explicitly requested probe of `address`.
    ///
    /// Creates an active record if the address is new.  An explicit request
    /// may re-open a settled address; this is the only way back to `Probing`.
    pub fn begin_request(&self, address: IpAddr) -> PrinterRecord {
        let record = self.observe(PrinterRecord::new(address, DiscoveryMode::Active));
        if let Some(slot) = self.slot(address) {
            slot.lock().expect("record slot lock poisoned").state = AddressState::Probing;
        }
        record
    }

    /// Move `address` to `next` if the state machine allows it.
    pub fn transition(&self, address: IpAddr, next: AddressState) -> bool {
        let Some(slot) = self.slot(address) else {
            return false;
        };
        let mut slot = slot.lock().expect("record slot lock poisoned");
        if slot.state.can_move_to(next) {
            debug!(address = %address, from = ?slot.state, to = ?next, "state change");
            slot.state = next;
            true
        } else {
            false
        }
    }

    pub fn state(&self, address: IpAddr) -> Option<AddressState> {
        self.slot(address)
            .map(|slot| slot.lock().expect("record slot lock poisoned").state)
    }

    pub fn get(&self, address: IpAddr) -> Option<PrinterRecord> {
        self.slot(address)
            .map(|slot| slot.lock().expect("record slot lock poisoned").record.clone())
    }

    /// Every record, ordered by address.
    pub fn snapshot(&self) -> Vec<PrinterRecord> {
        let slots: Vec<_> = self
            .slots
            .lock()
            .expect("record map lock poisoned")
            .values()
            .cloned()
            .collect();
        let mut records: Vec<_> = slots
            .iter()
            .map(|slot| slot.lock().expect("record slot lock poisoned").record.clone())
            .collect();
        records.sort_by_key(|r| r.address);
        records
    }

    pub fn len(&self) -> usize {
        self.slots.lock().expect("record map lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
