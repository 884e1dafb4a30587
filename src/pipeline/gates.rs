//! Quality-gate policy over a Judge result.
//!
//! The revision decision is a pure function of the parsed ledger, the
//! current revision cycle, and the configured thresholds; given identical
//! inputs it always returns the identical decision.

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::ledger::{Importance, JudgeResult, Verdict};

/// Aggregate numbers derived from one Judge pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerMetrics {
    /// All parsed claims.
    pub total_claims: usize,
    /// Claims at critical or material importance.
    pub eligible_claims: usize,
    /// Conflict-flagged claims among the eligible set.
    pub conflict_flagged: usize,
    /// Covered (supported, weak, expert_verified) among the eligible set.
    pub covered: usize,
    /// Unsupported (contradicted, not_found) over all claims.
    pub unsupported: usize,
    /// `covered / max(1, eligible - conflict_flagged)`.
    pub evidence_coverage: f64,
    /// `unsupported / max(1, total)`.
    pub unsupported_rate: f64,
}

/// Compute coverage arithmetic for a Judge result.
///
/// Coverage is restricted to critical + material claims and excludes
/// conflict-flagged claims from the denominator; conflicts are flagged,
/// not resolved, so they neither help nor hurt coverage.
#[must_use]
pub fn ledger_metrics(result: &JudgeResult) -> LedgerMetrics {
    let mut metrics = LedgerMetrics {
        total_claims: result.claims.len(),
        ..LedgerMetrics::default()
    };

    for claim in &result.claims {
        let verdict = result
            .evidence_for(&claim.claim_id)
            .map(|e| e.verdict)
            .unwrap_or_default();

        if verdict.is_unsupported() {
            metrics.unsupported += 1;
        }
        if claim.importance.counts_for_coverage() {
            metrics.eligible_claims += 1;
            if verdict == Verdict::ConflictFlagged {
                metrics.conflict_flagged += 1;
            } else if verdict.is_covering() {
                metrics.covered += 1;
            }
        }
    }

    let denominator = metrics
        .eligible_claims
        .saturating_sub(metrics.conflict_flagged)
        .max(1);
    metrics.evidence_coverage = metrics.covered as f64 / denominator as f64;
    metrics.unsupported_rate = metrics.unsupported as f64 / metrics.total_claims.max(1) as f64;
    metrics
}

/// Why a revision cycle is required, ordered most severe first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionReason {
    /// A critical claim is contradicted by the documents.
    CriticalContradiction,
    /// Evidence coverage is below the acceptance target.
    LowCoverage,
    /// Too many claims are unsupported.
    UnsupportedRate,
    /// A flagged conflict lacks an inline both-view presentation.
    ConflictPresentation,
}

impl RevisionReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CriticalContradiction => "critical_contradiction",
            Self::LowCoverage => "low_coverage",
            Self::UnsupportedRate => "unsupported_rate",
            Self::ConflictPresentation => "conflict_presentation",
        }
    }

    /// Instruction emphasis handed to the Revision prompt for this gate.
    #[must_use]
    pub fn instruction(self) -> &'static str {
        match self {
            Self::CriticalContradiction => {
                "Priority: remove or correct the contradicted critical claims."
            }
            Self::LowCoverage => {
                "Priority: add missing citations so every material claim is grounded."
            }
            Self::UnsupportedRate => {
                "Priority: drop or ground the unsupported claims."
            }
            Self::ConflictPresentation => {
                "Priority: present both views inline for every flagged conflict."
            }
        }
    }
}

/// Outcome of evaluating the gates for one Judge pass.
#[derive(Clone, Debug, PartialEq)]
pub struct GateDecision {
    pub revise: bool,
    /// Fired gates, most severe first.
    pub reasons: Vec<RevisionReason>,
    pub metrics: LedgerMetrics,
    /// Coverage target that applied to this cycle.
    pub coverage_target: f64,
}

impl GateDecision {
    /// The most severe fired gate; drives the revision instructions.
    #[must_use]
    pub fn primary(&self) -> Option<RevisionReason> {
        self.reasons.first().copied()
    }
}

/// Evaluate the quality gates for a Judge pass at `revision_cycle`.
///
/// On the final budgeted cycle the relaxed coverage ceiling applies.
#[must_use]
pub fn evaluate(
    result: &JudgeResult,
    revision_cycle: u32,
    config: &PipelineConfig,
) -> GateDecision {
    let metrics = ledger_metrics(result);
    let coverage_target = if revision_cycle >= config.max_revision_cycles {
        config.coverage_target_relaxed
    } else {
        config.coverage_target_default
    };

    let mut reasons = Vec::new();

    let critical_contradiction = result.claims.iter().any(|claim| {
        claim.importance == Importance::Critical
            && result
                .evidence_for(&claim.claim_id)
                .is_some_and(|e| e.verdict == Verdict::Contradicted)
    });
    if critical_contradiction {
        reasons.push(RevisionReason::CriticalContradiction);
    }

    if metrics.eligible_claims > 0 && metrics.evidence_coverage < coverage_target {
        reasons.push(RevisionReason::LowCoverage);
    }

    if metrics.unsupported_rate > config.unsupported_rate_limit {
        reasons.push(RevisionReason::UnsupportedRate);
    }

    let flagged = result
        .claims
        .iter()
        .filter(|claim| {
            result
                .evidence_for(&claim.claim_id)
                .is_some_and(|e| e.verdict == Verdict::ConflictFlagged)
        })
        .count();
    let presented = result
        .conflicts
        .iter()
        .filter(|c| !c.comparison.trim().is_empty())
        .count();
    if flagged > presented {
        reasons.push(RevisionReason::ConflictPresentation);
    }

    reasons.sort();
    GateDecision {
        revise: !reasons.is_empty(),
        reasons,
        metrics,
        coverage_target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Claim, ClaimType, Conflict, EvidenceEntry, SourceTag};

    fn claim(id: &str, importance: Importance) -> Claim {
        Claim {
            claim_id: id.to_string(),
            claim_text: format!("claim {id}"),
            claim_type: ClaimType::Fact,
            importance,
            requires_citation: true,
        }
    }

    fn evidence(id: &str, verdict: Verdict) -> EvidenceEntry {
        EvidenceEntry {
            claim_id: id.to_string(),
            source_tag: SourceTag::Cite(1),
            verdict,
            confidence_score: 0.9,
            chunk_ids: vec!["1".to_string()],
            evidence_snippet: None,
            expert_assessment: None,
            notes: None,
        }
    }

    fn result_of(entries: &[(&str, Importance, Verdict)]) -> JudgeResult {
        JudgeResult {
            claims: entries
                .iter()
                .map(|(id, importance, _)| claim(id, *importance))
                .collect(),
            evidence: entries
                .iter()
                .map(|(id, _, verdict)| evidence(id, *verdict))
                .collect(),
            ..JudgeResult::default()
        }
    }

    #[test]
    fn coverage_excludes_minor_and_conflict_flagged() {
        use Importance::{Critical, Material, Minor};
        use Verdict::{ConflictFlagged, NotFound, Supported, Weak};
        let result = result_of(&[
            ("a", Critical, Supported),
            ("b", Material, Weak),
            ("c", Material, NotFound),
            ("d", Material, ConflictFlagged),
            ("e", Minor, NotFound),
        ]);
        let metrics = ledger_metrics(&result);
        assert_eq!(metrics.total_claims, 5);
        assert_eq!(metrics.eligible_claims, 4);
        assert_eq!(metrics.conflict_flagged, 1);
        assert_eq!(metrics.covered, 2);
        // (supported + weak) / (4 eligible - 1 conflict) = 2/3
        assert!((metrics.evidence_coverage - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(metrics.unsupported, 2);
    }

    #[test]
    fn empty_ledger_has_zero_coverage() {
        let metrics = ledger_metrics(&JudgeResult::default());
        assert_eq!(metrics.total_claims, 0);
        assert!(metrics.evidence_coverage.abs() < f64::EPSILON);
        assert!(metrics.unsupported_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn high_coverage_passes_all_gates() {
        use Importance::Material;
        use Verdict::Supported;
        let result = result_of(&[
            ("a", Material, Supported),
            ("b", Material, Supported),
            ("c", Material, Supported),
        ]);
        let decision = evaluate(&result, 0, &PipelineConfig::for_tests());
        assert!(!decision.revise);
        assert!(decision.reasons.is_empty());
    }

    #[test]
    fn critical_contradiction_forces_revision_and_leads() {
        use Importance::{Critical, Material};
        use Verdict::{Contradicted, NotFound, Supported};
        let result = result_of(&[
            ("a", Critical, Contradicted),
            ("b", Material, Supported),
            ("c", Material, NotFound),
        ]);
        let decision = evaluate(&result, 0, &PipelineConfig::for_tests());
        assert!(decision.revise);
        assert_eq!(
            decision.primary(),
            Some(RevisionReason::CriticalContradiction)
        );
    }

    #[test]
    fn relaxed_ceiling_applies_on_final_cycle() {
        use Importance::Material;
        use Verdict::{NotFound, Supported};
        // Coverage 3/4 = 0.75: fails the 0.85 default, passes 0.70 relaxed.
        let result = result_of(&[
            ("a", Material, Supported),
            ("b", Material, Supported),
            ("c", Material, Supported),
            ("d", Material, NotFound),
        ]);
        let config = PipelineConfig::for_tests();

        let strict = evaluate(&result, 0, &config);
        assert!(strict.reasons.contains(&RevisionReason::LowCoverage));

        let relaxed = evaluate(&result, 2, &config);
        assert!(!relaxed.reasons.contains(&RevisionReason::LowCoverage));
        // The unsupported-rate gate still sees 1/4 > 5%.
        assert!(relaxed.reasons.contains(&RevisionReason::UnsupportedRate));
    }

    #[test]
    fn unpresented_conflict_fires_presentation_gate() {
        use Importance::Material;
        use Verdict::{ConflictFlagged, Supported};
        let mut result = result_of(&[
            ("a", Material, Supported),
            ("b", Material, ConflictFlagged),
        ]);
        let decision = evaluate(&result, 0, &PipelineConfig::for_tests());
        assert!(
            decision
                .reasons
                .contains(&RevisionReason::ConflictPresentation)
        );

        result.conflicts.push(Conflict {
            claim_text: "claim b".to_string(),
            domain: None,
            comparison: "Document: X [cite:1]; established fact: Y [llm:judge]".to_string(),
        });
        let decision = evaluate(&result, 0, &PipelineConfig::for_tests());
        assert!(
            !decision
                .reasons
                .contains(&RevisionReason::ConflictPresentation)
        );
    }

    #[test]
    fn decision_is_a_pure_function_of_inputs() {
        use Importance::Material;
        use Verdict::{NotFound, Supported};
        let result = result_of(&[("a", Material, Supported), ("b", Material, NotFound)]);
        let config = PipelineConfig::for_tests();
        let first = evaluate(&result, 1, &config);
        let second = evaluate(&result, 1, &config);
        assert_eq!(first, second);
    }
}
