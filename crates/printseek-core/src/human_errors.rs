// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Plain-English explanations of discovery issues.
//
// The terminal UI shows these next to an incomplete record so the user knows
// whether to wait, check the printer, or pick a driver by hand.

use crate::types::{DiscoveryIssue, FailureKind, PrinterRecord};

/// A human-readable issue with a suggestion the user can act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanIssue {
    /// Short summary (shown as a heading).
    pub message: String,
    /// What the user should try.
    pub suggestion: String,
    /// Whether the user must pick the driver model manually.
    pub needs_manual_model: bool,
}

/// Explain one issue recorded against `address`.
pub fn describe_issue(record: &PrinterRecord, issue: &DiscoveryIssue) -> HumanIssue {
    let addr = record.address;
    match issue {
        DiscoveryIssue::NoPortsFound => HumanIssue {
            message: format!("Nothing at {addr} answered on the printer ports (631, 9100, 515)."),
            suggestion: "Check that the printer is switched on and the address is correct. \
                         A USB printer shared by a router may need the router's address instead."
                .into(),
            needs_manual_model: true,
        },
        DiscoveryIssue::ModelUnknown => HumanIssue {
            message: format!("The printer at {addr} did not tell us its model."),
            suggestion: "Choose the driver model from the list of installed drivers.".into(),
            needs_manual_model: true,
        },
        DiscoveryIssue::ProbeFailed { source, kind } => HumanIssue {
            message: format!("{source} query to {addr} failed: {kind}."),
            suggestion: probe_suggestion(*kind).into(),
            needs_manual_model: false,
        },
    }
}

/// Explain every issue on a record, most severe first.
///
/// Probe failures are only worth showing when no model was found at all.
pub fn describe_record(record: &PrinterRecord) -> Vec<HumanIssue> {
    let mut out = Vec::new();
    for issue in &record.issues {
        if matches!(issue, DiscoveryIssue::ProbeFailed { .. }) && record.is_complete() {
            continue;
        }
        out.push(describe_issue(record, issue));
    }
    out.sort_by_key(|h| !h.needs_manual_model);
    out
}

fn probe_suggestion(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::Timeout => "The printer may be busy or asleep. Try again in a minute.",
        FailureKind::ConnectionRefused => "The printer does not offer this service.",
        FailureKind::Unparseable => "The printer answered in a format we could not read.",
        FailureKind::NoPortsFound | FailureKind::ModelUnknown => {
            "Choose the driver model manually."
        }
    }
}
