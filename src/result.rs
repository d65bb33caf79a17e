use serde::Serialize;

use crate::config::EnrolledSp;
use crate::signature::SignatureOutcome;
use crate::sync::{PrunedArtifact, SyncOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// What a run did to one SP's artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Created,
    Updated,
    Unchanged,
    Repaired,
    Skipped,
    NotFound,
    Pruned,
}

impl Action {
    pub fn severity(self) -> Severity {
        match self {
            Action::Skipped => Severity::Error,
            Action::NotFound => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Action::Created => "CREATED",
            Action::Updated => "UPDATED",
            Action::Unchanged => "UNCHANGED",
            Action::Repaired => "REPAIRED",
            Action::Skipped => "SKIPPED",
            Action::NotFound => "NOT FOUND",
            Action::Pruned => "PRUNED",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SpResult {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_fingerprint: Option<String>,
    /// Why the SP was skipped
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
    /// Files deleted by pruning
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

impl SpResult {
    fn new(name: &str, entity_id: Option<&str>, action: Action) -> Self {
        Self {
            name: name.to_string(),
            entity_id: entity_id.map(String::from),
            action,
            fingerprint: None,
            previous_fingerprint: None,
            reasons: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn synced(sp: &EnrolledSp, outcome: &SyncOutcome) -> Self {
        let action = match outcome {
            SyncOutcome::Created { .. } => Action::Created,
            SyncOutcome::Updated { .. } => Action::Updated,
            SyncOutcome::Unchanged { .. } => Action::Unchanged,
            SyncOutcome::Repaired { .. } => Action::Repaired,
        };
        let mut result = Self::new(&sp.name, Some(&sp.entity_id), action);
        result.fingerprint = Some(outcome.fingerprint().to_string());
        if let SyncOutcome::Updated { previous, .. } = outcome {
            result.previous_fingerprint = Some(previous.clone());
        }
        result
    }

    pub fn skipped(sp: &EnrolledSp, reasons: Vec<String>) -> Self {
        let mut result = Self::new(&sp.name, Some(&sp.entity_id), Action::Skipped);
        result.reasons = reasons;
        result
    }

    pub fn not_found(sp: &EnrolledSp) -> Self {
        Self::new(&sp.name, Some(&sp.entity_id), Action::NotFound)
    }

    pub fn pruned(artifact: &PrunedArtifact) -> Self {
        let mut result = Self::new(&artifact.name, None, Action::Pruned);
        result.files = artifact.files.clone();
        result
    }
}

#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub repaired: usize,
    pub skipped: usize,
    pub not_found: usize,
    pub pruned: usize,
}

impl RunSummary {
    pub fn from_results(results: &[SpResult]) -> Self {
        let mut summary = RunSummary::default();
        for result in results {
            let counter = match result.action {
                Action::Created => &mut summary.created,
                Action::Updated => &mut summary.updated,
                Action::Unchanged => &mut summary.unchanged,
                Action::Repaired => &mut summary.repaired,
                Action::Skipped => &mut summary.skipped,
                Action::NotFound => &mut summary.not_found,
                Action::Pruned => &mut summary.pruned,
            };
            *counter += 1;
        }
        summary
    }
}

/// Everything a reconciliation pass reports.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub signature: SignatureOutcome,
    pub results: Vec<SpResult>,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary {
        RunSummary::from_results(&self.results)
    }

    /// Any skipped SP or an unverified signature.
    pub fn has_errors(&self) -> bool {
        !self.signature.is_verified() || self.results.iter().any(|r| r.action.severity() == Severity::Error)
    }
}
