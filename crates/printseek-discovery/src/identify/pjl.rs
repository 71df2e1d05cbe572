// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PJL model probe over the raw socket (JetDirect, port 9100).
//
// Wraps `@PJL INFO ID` in Universal Exit Language sequences, writes it, and
// reads until the printer's form feed, EOF, or the deadline.  Nothing is ever
// printed: the command is a status query.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, instrument};

use printseek_core::config::DiscoveryConfig;
use printseek_core::error::classify_io;
use printseek_core::types::{FailureKind, IdentifyOutcome, ModelSource};

use super::ModelIdentifier;

/// UEL + `@PJL INFO ID` + UEL.
pub const PJL_INFO_ID: &[u8] = b"\x1B%-12345X@PJL INFO ID\r\n\x1B%-12345X\r\n";

/// PJL responses end with a form feed.
const FORM_FEED: u8 = 0x0C;

/// Responses longer than this are cut off.
const MAX_RESPONSE: usize = 1024;

/// Model probe over PJL.
#[derive(Debug, Clone)]
pub struct PjlIdentifier {
    port: u16,
    timeout: Duration,
}

impl PjlIdentifier {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(config.pjl_port, config.pjl_timeout())
    }
}

#[async_trait]
impl ModelIdentifier for PjlIdentifier {
    fn source(&self) -> ModelSource {
        ModelSource::JobLanguage
    }

    fn required_port(&self) -> Option<u16> {
        Some(self.port)
    }

    async fn identify(&self, address: IpAddr) -> IdentifyOutcome {
        query_info_id(SocketAddr::new(address, self.port), self.timeout).await
    }
}

/// Send `@PJL INFO ID` to `addr` and parse the reply.
///
/// The whole exchange shares one deadline.  If the deadline hits after some
/// bytes arrived, whatever was read is still parsed.
#[instrument(level = "debug")]
pub async fn query_info_id(addr: SocketAddr, limit: Duration) -> IdentifyOutcome {
    let deadline = Instant::now() + limit;

    let mut stream = match timeout_at(deadline, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return IdentifyOutcome::Unknown(classify_io(&e)),
        Err(_) => return IdentifyOutcome::Unknown(FailureKind::Timeout),
    };

    match timeout_at(deadline, stream.write_all(PJL_INFO_ID)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return IdentifyOutcome::Unknown(classify_io(&e)),
        Err(_) => return IdentifyOutcome::Unknown(FailureKind::Timeout),
    }

    let mut response = Vec::with_capacity(256);
    let mut chunk = [0u8; 256];
    loop {
        match timeout_at(deadline, stream.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                response.extend_from_slice(&chunk[..n]);
                if chunk[..n].contains(&FORM_FEED) || response.len() >= MAX_RESPONSE {
                    break;
                }
            }
            Ok(Err(e)) if response.is_empty() => {
                return IdentifyOutcome::Unknown(classify_io(&e));
            }
            Err(_) if response.is_empty() => {
                return IdentifyOutcome::Unknown(FailureKind::Timeout);
            }
            Ok(Err(_)) | Err(_) => break,
        }
    }
    response.truncate(MAX_RESPONSE);

    debug!(bytes = response.len(), "PJL response received");
    parse_pjl_id(&response)
}

/// Extract the model from an `@PJL INFO ID` reply.
///
/// The reply echoes the command, then carries the ID either as a quoted line
/// (`"HP LaserJet 4250"`) or as `ID=...` / `MODEL:...`.
pub fn parse_pjl_id(response: &[u8]) -> IdentifyOutcome {
    let text: String = String::from_utf8_lossy(response)
        .chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .collect();

    if text.trim().is_empty() {
        return IdentifyOutcome::Unknown(FailureKind::ModelUnknown);
    }

    let candidate = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("@PJL") && !line.starts_with("%-12345X"))
        .map(strip_key)
        .next();

    match candidate {
        Some(line) => IdentifyOutcome::from_raw(line.trim_matches('"').trim()),
        None => IdentifyOutcome::Unknown(FailureKind::Unparseable),
    }
}

fn strip_key(line: &str) -> &str {
    for key in ["ID=", "MODEL:"] {
        if line.get(..key.len()).is_some_and(|head| head.eq_ignore_ascii_case(key)) {
            return line[key.len()..].trim();
        }
    }
    line
}
