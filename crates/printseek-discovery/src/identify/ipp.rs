// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// IPP model probe.
//
// Sends Get-Printer-Attributes (RFC 8011 §4.2.5) to
// `ipp://<addr>:631/ipp/print` with the `ipp` crate's async client and reads
// `printer-make-and-model` from the response.  Attribute queries only; no
// jobs are ever submitted.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use ::ipp::prelude::*;
use tracing::{debug, instrument};

use printseek_core::config::DiscoveryConfig;
use printseek_core::error::{PrintseekError, Result, classify_error};
use printseek_core::types::{FailureKind, IdentifyOutcome, ModelSource};

use super::{ModelIdentifier, with_deadline};

/// Attribute carrying the human-readable make and model.
pub const MAKE_AND_MODEL: &str = "printer-make-and-model";

/// Flattened attribute-name to string-value map.
pub type PrinterAttributes = HashMap<String, String>;

/// Model probe over IPP.
#[derive(Debug, Clone)]
pub struct IppIdentifier {
    port: u16,
    resource: String,
    timeout: Duration,
}

impl IppIdentifier {
    pub fn new(port: u16, resource: impl Into<String>, timeout: Duration) -> Self {
        Self {
            port,
            resource: resource.into(),
            timeout,
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(config.ipp_port, config.ipp_resource.clone(), config.ipp_timeout())
    }

    /// Printer URI for `address`, IPv6 bracketed.
    pub fn uri_for(&self, address: IpAddr) -> String {
        let sock = SocketAddr::new(address, self.port);
        format!("ipp://{sock}/{}", self.resource.trim_start_matches('/'))
    }
}

#[async_trait]
impl ModelIdentifier for IppIdentifier {
    fn source(&self) -> ModelSource {
        ModelSource::DocumentTransfer
    }

    fn required_port(&self) -> Option<u16> {
        Some(self.port)
    }

    async fn identify(&self, address: IpAddr) -> IdentifyOutcome {
        let uri = self.uri_for(address);
        with_deadline(self.timeout, async {
            match get_printer_attributes(&uri).await {
                Ok(attrs) => model_from_attributes(&attrs),
                Err(e) => {
                    debug!(uri = %uri, error = %e, "IPP query failed");
                    IdentifyOutcome::Unknown(classify_error(&e))
                }
            }
        })
        .await
    }
}

/// Query the printer at `uri` for its attributes.
#[instrument(level = "debug")]
pub async fn get_printer_attributes(uri: &str) -> Result<PrinterAttributes> {
    let parsed: Uri = uri
        .parse()
        .map_err(|e| PrintseekError::Probe(format!("invalid URI '{uri}': {e}")))?;
    let operation = IppOperationBuilder::get_printer_attributes(parsed.clone()).build();
    let client = AsyncIppClient::new(parsed);

    debug!("sending Get-Printer-Attributes");
    let response = client
        .send(operation)
        .await
        .map_err(|e| PrintseekError::Probe(format!("Get-Printer-Attributes: {e}")))?;

    if !response.header().status_code().is_success() {
        let code = response.header().status_code();
        return Err(PrintseekError::Rejected(format!(
            "Get-Printer-Attributes returned status {code:?}"
        )));
    }

    let attrs = flatten_attributes(response.attributes());
    debug!(count = attrs.len(), "received printer attributes");
    Ok(attrs)
}

/// Pull the make-and-model string out of a flattened attribute map.
pub fn model_from_attributes(attrs: &PrinterAttributes) -> IdentifyOutcome {
    match attrs.get(MAKE_AND_MODEL) {
        Some(value) => IdentifyOutcome::from_raw(value),
        None => IdentifyOutcome::Unknown(FailureKind::ModelUnknown),
    }
}

/// Flatten all attribute groups into one map.
///
/// Group context is dropped; later groups win on duplicate names.
fn flatten_attributes(attrs: &IppAttributes) -> PrinterAttributes {
    let mut map = HashMap::new();
    for group in attrs.groups() {
        for (name, attr) in group.attributes() {
            map.insert(name.clone(), format!("{}", attr.value()));
        }
    }
    map
}
