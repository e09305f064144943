// crates/core/src/validate.rs
//! Structural validation of incoming change proposals.
//!
//! Validation is pure and idempotent: the same payload always yields the
//! same report, and a sanitized payload re-validates clean. The report
//! enumerates accepted proposals, warnings, violations, and redactions —
//! one submission never aborts wholesale on a per-change failure.

use redline_types::{
    Attribution, Category, ChangeContent, ChangeId, ChangeKind, ProducerPolicy, Span,
    ValidationError,
};
use tracing::warn;

use crate::sanitize::{SanitizeOutcome, Sanitizer};

/// A producer's raw proposal, before it becomes a `Change`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeProposal {
    /// Generated when absent.
    pub id: Option<ChangeId>,
    pub kind: ChangeKind,
    pub position: Span,
    pub content: ChangeContent,
    pub category: Category,
    pub confidence: f64,
}

impl ChangeProposal {
    pub fn new(
        kind: ChangeKind,
        position: Span,
        content: ChangeContent,
        category: Category,
        confidence: f64,
    ) -> Self {
        Self {
            id: None,
            kind,
            position,
            content,
            category,
            confidence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningCode {
    NoOp,
    LowConfidence,
    ConfidenceClamped,
    PromptTruncated,
    Redacted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub change_id: Option<ChangeId>,
    pub code: WarningCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub change_id: Option<ChangeId>,
    pub error: ValidationError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Redaction {
    pub change_id: Option<ChangeId>,
    pub field: &'static str,
    pub rule: String,
}

/// Everything a submission's validation produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    /// Proposals that passed, ids filled, content possibly redacted,
    /// confidence clamped.
    pub accepted: Vec<ChangeProposal>,
    /// Submission-level attribution after sanitization.
    pub attribution: Option<Attribution>,
    pub warnings: Vec<Warning>,
    pub violations: Vec<Violation>,
    pub redactions: Vec<Redaction>,
}

impl ValidationReport {
    pub fn all_passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Validator configured with one producer's policy.
#[derive(Debug, Clone)]
pub struct Validator {
    policy: ProducerPolicy,
    sanitizer: Sanitizer,
}

impl Validator {
    pub fn new(policy: ProducerPolicy) -> Self {
        let sanitizer = Sanitizer::from_policy(&policy);
        Self { policy, sanitizer }
    }

    pub fn policy(&self) -> &ProducerPolicy {
        &self.policy
    }

    /// Validate a whole submission payload.
    pub fn validate(
        &self,
        proposals: Vec<ChangeProposal>,
        attribution: Option<Attribution>,
    ) -> ValidationReport {
        let mut report = ValidationReport::default();

        report.attribution = match attribution {
            Some(attribution) => match self.validate_attribution(attribution, &mut report) {
                Ok(clean) => Some(clean),
                Err(violation) => {
                    report.violations.push(Violation {
                        change_id: None,
                        error: violation,
                    });
                    None
                }
            },
            None => None,
        };

        for proposal in proposals {
            self.validate_one(proposal, &mut report);
        }
        report
    }

    fn validate_one(&self, mut proposal: ChangeProposal, report: &mut ValidationReport) {
        if proposal.id.is_none() {
            proposal.id = Some(ChangeId::new());
        }
        let id = proposal.id;

        if let Some(reason) = structural_problem(&proposal) {
            report.violations.push(Violation {
                change_id: id,
                error: ValidationError::SchemaInvalid { reason },
            });
            return;
        }

        // NoOp replaces are dropped, not rejected.
        if proposal.kind == ChangeKind::Replace && proposal.content.is_noop() {
            report.warnings.push(Warning {
                change_id: id,
                code: WarningCode::NoOp,
                message: "replace with identical before/after dropped".into(),
            });
            return;
        }

        if !(0.0..=1.0).contains(&proposal.confidence) {
            let clamped = proposal.confidence.clamp(0.0, 1.0);
            report.warnings.push(Warning {
                change_id: id,
                code: WarningCode::ConfidenceClamped,
                message: format!(
                    "confidence {} clamped to {clamped}",
                    proposal.confidence
                ),
            });
            proposal.confidence = clamped;
        }

        // At-threshold confidence is included; only strictly-below drops.
        if proposal.confidence < self.policy.confidence_floor {
            report.warnings.push(Warning {
                change_id: id,
                code: WarningCode::LowConfidence,
                message: format!(
                    "confidence {} below producer floor {}",
                    proposal.confidence, self.policy.confidence_floor
                ),
            });
            return;
        }

        if let Some(phrase) = self.sanitizer.forbidden_phrase(&proposal.content.after) {
            report.violations.push(Violation {
                change_id: id,
                error: ValidationError::PolicyViolation {
                    rule: phrase.to_string(),
                },
            });
            return;
        }

        match self.sanitizer.sanitize(&proposal.content.after) {
            SanitizeOutcome::Clean => {}
            SanitizeOutcome::Redacted { text, rules } => {
                proposal.content.after = text;
                for rule in &rules {
                    report.redactions.push(Redaction {
                        change_id: id,
                        field: "content.after",
                        rule: rule.to_string(),
                    });
                }
                report.warnings.push(Warning {
                    change_id: id,
                    code: WarningCode::Redacted,
                    message: format!("sensitive content redacted ({})", rules.join(", ")),
                });
            }
            SanitizeOutcome::Rejected { rule } => {
                report.violations.push(Violation {
                    change_id: id,
                    error: ValidationError::SensitiveDataRejected {
                        rule: rule.to_string(),
                    },
                });
                return;
            }
        }

        report.accepted.push(proposal);
    }

    fn validate_attribution(
        &self,
        mut attribution: Attribution,
        report: &mut ValidationReport,
    ) -> Result<Attribution, ValidationError> {
        for (field, value) in [
            ("provider", &attribution.provider),
            ("model", &attribution.model),
        ] {
            if !is_printable_token(value) {
                return Err(ValidationError::SchemaInvalid {
                    reason: format!("attribution.{field} must be a printable token"),
                });
            }
        }
        if let Some(mode) = &attribution.mode {
            if !is_printable_token(mode) {
                return Err(ValidationError::SchemaInvalid {
                    reason: "attribution.mode must be a printable token".into(),
                });
            }
        }

        let cap = self.policy.prompt_length_cap;
        for (field, slot) in [
            ("instructions", &mut attribution.instructions),
            ("user_prompt", &mut attribution.user_prompt),
        ] {
            let Some(text) = slot.as_mut() else { continue };

            if text.len() > cap {
                truncate_in_place(text, cap);
                report.warnings.push(Warning {
                    change_id: None,
                    code: WarningCode::PromptTruncated,
                    message: format!("attribution.{field} truncated to {cap} bytes"),
                });
            }

            match self.sanitizer.sanitize(text) {
                SanitizeOutcome::Clean => {}
                SanitizeOutcome::Redacted { text: clean, rules } => {
                    *text = clean;
                    for rule in rules {
                        report.redactions.push(Redaction {
                            change_id: None,
                            field: match field {
                                "instructions" => "attribution.instructions",
                                _ => "attribution.user_prompt",
                            },
                            rule: rule.to_string(),
                        });
                    }
                }
                SanitizeOutcome::Rejected { rule } => {
                    warn!(rule, "attribution rejected by sensitive-data policy");
                    return Err(ValidationError::SensitiveDataRejected {
                        rule: rule.to_string(),
                    });
                }
            }
        }

        Ok(attribution)
    }
}

fn structural_problem(proposal: &ChangeProposal) -> Option<String> {
    if !proposal.position.is_valid() {
        return Some(format!(
            "position start {} exceeds end {}",
            proposal.position.start, proposal.position.end
        ));
    }
    match proposal.kind {
        ChangeKind::Insert => {
            if !proposal.content.before.is_empty() {
                return Some("insert must have empty content.before".into());
            }
            if proposal.content.after.is_empty() {
                return Some("insert must have non-empty content.after".into());
            }
        }
        ChangeKind::Delete => {
            if !proposal.content.after.is_empty() {
                return Some("delete must have empty content.after".into());
            }
            if proposal.content.before.is_empty() {
                return Some("delete must have non-empty content.before".into());
            }
        }
        ChangeKind::Replace | ChangeKind::Move => {}
    }
    if !proposal.confidence.is_finite() {
        return Some("confidence must be finite".into());
    }
    None
}

fn is_printable_token(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 256
        && s.chars()
            .all(|c| c.is_ascii_graphic() || c == ' ')
        && !s.starts_with(' ')
        && !s.ends_with(' ')
}

/// Truncate at a char boundary at or before `max_bytes`.
fn truncate_in_place(s: &mut String, max_bytes: usize) {
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
