// fuzz/fuzz_targets/validate_submission.rs
//
// Feed arbitrary submission payloads through validation + sanitization.
// Properties under test: never panics, and re-validating an accepted
// (sanitized) proposal raises no new violations.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use redline_core::{ChangeProposal, Validator};
use redline_types::{
    Attribution, Category, ChangeContent, ChangeKind, ProducerPolicy, Span,
};

#[derive(Debug, Arbitrary)]
struct RawProposal {
    kind: u8,
    start: u64,
    end: u64,
    before: String,
    after: String,
    category: u8,
    confidence: f64,
}

#[derive(Debug, Arbitrary)]
struct RawSubmission {
    proposals: Vec<RawProposal>,
    provider: Option<String>,
    model: Option<String>,
    instructions: Option<String>,
    confidence_floor: f64,
    redact: bool,
}

fn kind_of(tag: u8) -> ChangeKind {
    match tag % 4 {
        0 => ChangeKind::Insert,
        1 => ChangeKind::Delete,
        2 => ChangeKind::Replace,
        _ => ChangeKind::Move,
    }
}

fn category_of(tag: u8) -> Category {
    Category::ALL[tag as usize % Category::ALL.len()]
}

fuzz_target!(|raw: RawSubmission| {
    let mut policy = ProducerPolicy::default();
    policy.confidence_floor = if raw.confidence_floor.is_finite() {
        raw.confidence_floor.clamp(0.0, 1.0)
    } else {
        0.0
    };
    policy.redact_sensitive = raw.redact;
    let validator = Validator::new(policy);

    let proposals: Vec<ChangeProposal> = raw
        .proposals
        .into_iter()
        .take(64)
        .map(|p| ChangeProposal {
            id: None,
            kind: kind_of(p.kind),
            position: Span {
                start: p.start,
                end: p.end,
            },
            content: ChangeContent::new(p.before, p.after),
            category: category_of(p.category),
            confidence: p.confidence,
        })
        .collect();

    let attribution = match (raw.provider, raw.model) {
        (Some(provider), Some(model)) => {
            let mut attribution = Attribution::new(provider, model);
            attribution.instructions = raw.instructions;
            Some(attribution)
        }
        _ => None,
    };

    let report = validator.validate(proposals, attribution);

    // Accepted output re-validates without violations. (Redaction can
    // legitimately fire again when a marker creates a new word boundary
    // next to surviving text, so only violations are asserted.)
    let second = validator.validate(report.accepted.clone(), None);
    assert!(second.violations.is_empty());
});
