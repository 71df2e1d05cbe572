// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// printseek — network printer discovery and model identification.
//
// Entry point. Initialises logging, loads configuration, and runs either a
// passive scan or an explicit probe of the given addresses.

mod cmd;

use std::time::Duration;

use futures::StreamExt;
use futures::future::join_all;

use printseek_core::config::DiscoveryConfig;
use printseek_core::error::Result;
use printseek_core::human_errors::describe_record;
use printseek_core::types::PrinterRecord;
use printseek_discovery::Discovery;

use cmd::{CommandLine, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = CommandLine::parse_args();

    let config = match &cli.config {
        Some(path) => DiscoveryConfig::load(path)?,
        None => DiscoveryConfig::default(),
    };

    match cli.command {
        Commands::Scan { window_ms } => {
            let window = window_ms.map_or_else(|| config.scan_window(), Duration::from_millis);
            let discovery = Discovery::new(config);
            tracing::info!(session = %discovery.id(), "printseek scan starting");

            let mut records = discovery.discover_passive(window);
            let mut found = 0usize;
            while let Some(record) = records.next().await {
                found += 1;
                emit(&record, cli.json)?;
            }
            tracing::info!(found, "scan complete");
        }
        Commands::Probe { addresses } => {
            let discovery = Discovery::new(config);
            tracing::info!(session = %discovery.id(), targets = addresses.len(), "printseek probe starting");

            let records = join_all(addresses.into_iter().map(|a| discovery.discover_active(a))).await;
            for record in &records {
                emit(record, cli.json)?;
            }
        }
        Commands::InitConfig { path } => {
            DiscoveryConfig::default().save(&path)?;
            tracing::info!(path = %path.display(), "default configuration written");
        }
    }
    Ok(())
}

fn emit(record: &PrinterRecord, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(record)?);
    } else {
        print!("{}", render(record));
    }
    Ok(())
}

/// Human-readable block for one record.
fn render(record: &PrinterRecord) -> String {
    let mut out = format!("{}  {}", record.address, record.display_name());
    if let Some(source) = record.model_source {
        out.push_str(&format!("  [{source}]"));
    }
    out.push('\n');
    if let Some(uri) = record.device_uri() {
        out.push_str(&format!("    uri: {uri}\n"));
    }
    for issue in describe_record(record) {
        out.push_str(&format!("    ! {}\n      {}\n", issue.message, issue.suggestion));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use printseek_core::types::{DiscoveryIssue, DiscoveryMode, ModelSource};
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn render_identified_printer() {
        let mut record = PrinterRecord::with_ports(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
            DiscoveryMode::Active,
            [631],
        );
        record.set_model("HP LaserJet Pro M404dn", ModelSource::DocumentTransfer);

        let text = render(&record);
        assert!(text.starts_with("10.0.0.5  HP LaserJet Pro M404dn  [IPP]\n"));
        assert!(text.contains("uri: ipp://10.0.0.5:631/ipp/print"));
        assert!(!text.contains('!'));
    }

    #[test]
    fn render_unreachable_address_lists_issue() {
        let mut record = PrinterRecord::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 6)), DiscoveryMode::Active);
        record.issues.insert(DiscoveryIssue::NoPortsFound);

        let text = render(&record);
        assert!(text.starts_with("10.0.0.6  10.0.0.6\n"));
        assert!(!text.contains("uri:"));
        assert!(text.contains("    ! "));
    }
}
