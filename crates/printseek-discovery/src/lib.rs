// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// printseek Discovery — mDNS listening, print-port scanning, IPP/SNMP/PJL
// model identification, and the per-address record store that merges them.
// Builds on the shared types in `printseek-core`.

pub mod aggregator;
pub mod identify;
pub mod listener;
pub mod orchestrator;
pub mod prober;
pub mod stream;

pub use aggregator::{AddressState, RecordStore, merge};
pub use identify::{IdentifierSet, ModelIdentifier};
pub use listener::{AnnouncementSource, MdnsSource, PassiveListener};
pub use orchestrator::Discovery;
pub use prober::{PortScanner, TcpPortProber};
pub use stream::RecordStream;
