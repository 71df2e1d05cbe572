// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// TCP connect scan of the print ports.
//
// Candidates are 631 (IPP), 9100 (raw socket / JetDirect) and 515 (LPD).
// Every port is tried at once, so a scan never takes longer than one
// per-port timeout.  A closed or filtered port is simply absent from the
// result.

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::net::TcpStream;
use tracing::{debug, info};

use printseek_core::error::classify_io;

/// Finds which candidate ports accept connections.
#[async_trait]
pub trait PortScanner: Send + Sync {
    async fn probe(&self, address: IpAddr, candidates: &[u16]) -> BTreeSet<u16>;
}

/// The real scanner: a plain TCP connect per port.
#[derive(Debug, Clone)]
pub struct TcpPortProber {
    per_port_timeout: Duration,
}

impl TcpPortProber {
    pub fn new(per_port_timeout: Duration) -> Self {
        Self { per_port_timeout }
    }
}

#[async_trait]
impl PortScanner for TcpPortProber {
    async fn probe(&self, address: IpAddr, candidates: &[u16]) -> BTreeSet<u16> {
        probe_ports(address, candidates, self.per_port_timeout).await
    }
}

/// Connect to every candidate port concurrently and return the open ones.
pub async fn probe_ports(
    address: IpAddr,
    candidates: &[u16],
    per_port_timeout: Duration,
) -> BTreeSet<u16> {
    let ports: BTreeSet<u16> = candidates.iter().copied().collect();
    debug!(address = %address, ?ports, "scanning print ports");

    let attempts = ports.iter().map(|&port| async move {
        let open = is_port_open(SocketAddr::new(address, port), per_port_timeout).await;
        (port, open)
    });

    // Bounded by `per_port_timeout`: every attempt times out on its own.
    let open: BTreeSet<u16> = join_all(attempts)
        .await
        .into_iter()
        .filter_map(|(port, open)| open.then_some(port))
        .collect();

    if open.is_empty() {
        info!(address = %address, "no known printer ports open");
    } else {
        info!(address = %address, ports = ?open, "print ports open");
    }
    open
}

async fn is_port_open(addr: SocketAddr, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => {
            debug!(addr = %addr, "port open");
            true
        }
        Ok(Err(e)) => {
            debug!(addr = %addr, kind = %classify_io(&e), "port closed");
            false
        }
        Err(_) => {
            debug!(addr = %addr, "port filtered (timed out)");
            false
        }
    }
}
