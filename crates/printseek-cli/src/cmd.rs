// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command-line surface.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "printseek")]
#[command(about = "Find printers on the local network and identify their make and model.")]
#[command(version)]
pub struct CommandLine {
    /// Discovery settings (JSON). Missing fields use defaults.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print one JSON record per line instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Listen for printer announcements, then probe what was heard
    Scan {
        /// Listening window in milliseconds (default from config)
        #[arg(long)]
        window_ms: Option<u64>,
    },
    /// Probe and identify specific addresses
    Probe {
        #[arg(required = true)]
        addresses: Vec<IpAddr>,
    },
    /// Write the default configuration to a file
    InitConfig {
        path: PathBuf,
    },
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe_addresses() {
        let cli = CommandLine::try_parse_from(["printseek", "--json", "probe", "10.0.0.5", "::1"])
            .expect("parse");
        assert!(cli.json);
        match cli.command {
            Commands::Probe { addresses } => assert_eq!(addresses.len(), 2),
            _ => panic!("expected probe"),
        }
    }

    #[test]
    fn probe_requires_an_address() {
        assert!(CommandLine::try_parse_from(["printseek", "probe"]).is_err());
        assert!(CommandLine::try_parse_from(["printseek", "probe", "not-an-ip"]).is_err());
    }

    #[test]
    fn scan_window_is_optional() {
        let cli = CommandLine::try_parse_from(["printseek", "scan"]).expect("parse");
        assert!(matches!(cli.command, Commands::Scan { window_ms: None }));
        let cli = CommandLine::try_parse_from(["printseek", "scan", "--window-ms", "2000"])
            .expect("parse");
        assert!(matches!(cli.command, Commands::Scan { window_ms: Some(2000) }));
    }
}
