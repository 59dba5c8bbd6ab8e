//! Data-integrity checks to run before a solve.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::data::ReferenceData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DiagnosticIssue {
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub suggestion: String,
}

impl DiagnosticIssue {
    fn new(severity: Severity, title: &str, description: String, suggestion: String) -> Self {
        Self {
            severity,
            title: title.to_string(),
            description,
            suggestion,
        }
    }
}

/// Reports subjects nobody teaches, required subjects with no possible teacher,
/// idle faculty and batches that reference subjects which do not exist.
pub fn run_preflight_diagnostics(reference: &ReferenceData) -> Vec<DiagnosticIssue> {
    let mut issues = Vec::new();
    let taught: HashSet<&str> = reference
        .faculty
        .iter()
        .flat_map(|f| f.subject_ids.iter().map(String::as_str))
        .collect();

    for subject in &reference.subjects {
        if !taught.contains(subject.id.as_str()) {
            issues.push(DiagnosticIssue::new(
                Severity::Warning,
                "Unassigned Subject",
                format!(
                    "The subject \"{}\" ({}) is not assigned to any faculty member.",
                    subject.name, subject.code
                ),
                "Assign this subject to at least one faculty member.".to_string(),
            ));
        }
    }

    for batch in &reference.batches {
        for subject_id in &batch.subject_ids {
            let Some(subject) = reference.subjects.iter().find(|s| s.id == *subject_id) else {
                issues.push(DiagnosticIssue::new(
                    Severity::Critical,
                    "Unknown Subject",
                    format!(
                        "Batch \"{}\" requires subject id \"{}\", which does not exist.",
                        batch.name, subject_id
                    ),
                    "Remove the subject from the batch's curriculum or create it.".to_string(),
                ));
                continue;
            };
            let allocated = reference
                .faculty_allocations
                .iter()
                .any(|fa| {
                    fa.batch_id == batch.id
                        && fa.subject_id == *subject_id
                        && !fa.faculty_ids.is_empty()
                });
            if allocated || taught.contains(subject_id.as_str()) {
                continue;
            }
            issues.push(DiagnosticIssue::new(
                Severity::Critical,
                "No Qualified Faculty",
                format!(
                    "The subject \"{}\" required by batch \"{}\" has no faculty qualified to teach it.",
                    subject.name, batch.name
                ),
                format!(
                    "Assign a faculty member to teach \"{}\" or remove it from the batch's curriculum.",
                    subject.code
                ),
            ));
        }
    }

    for member in &reference.faculty {
        if member.subject_ids.is_empty() {
            issues.push(DiagnosticIssue::new(
                Severity::Warning,
                "Faculty Without Subjects",
                format!("Faculty member \"{}\" is not assigned to teach any subjects.", member.name),
                "Assign subjects to this faculty member or remove them if they are no longer active."
                    .to_string(),
            ));
        }
    }

    issues
}
