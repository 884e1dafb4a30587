//! Typed evidence ledger produced by the Judge.
//!
//! Closed enumerations for claim types, importance, verdicts, and source
//! tags; the free-form Judge output is turned into these types by
//! [`parse::parse_judge_output`], which is total and never fails.

pub mod parse;

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Category of an atomic factual assertion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    #[default]
    Fact,
    Policy,
    Numeric,
    Definition,
    Scientific,
    Historical,
    Legal,
}

impl ClaimType {
    /// Canonical value for an arbitrary label; unknown labels fall back
    /// to [`ClaimType::Fact`].
    #[must_use]
    pub fn from_loose(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "policy" => Self::Policy,
            "numeric" => Self::Numeric,
            "definition" => Self::Definition,
            "scientific" => Self::Scientific,
            "historical" => Self::Historical,
            "legal" => Self::Legal,
            _ => Self::Fact,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Policy => "policy",
            Self::Numeric => "numeric",
            Self::Definition => "definition",
            Self::Scientific => "scientific",
            Self::Historical => "historical",
            Self::Legal => "legal",
        }
    }
}

/// How much an unsupported claim hurts the answer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Critical,
    #[default]
    Material,
    Minor,
}

impl Importance {
    /// Unknown labels fall back to [`Importance::Material`].
    #[must_use]
    pub fn from_loose(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "critical" => Self::Critical,
            "minor" => Self::Minor,
            _ => Self::Material,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Material => "material",
            Self::Minor => "minor",
        }
    }

    /// Claims at this importance count toward evidence coverage.
    #[must_use]
    pub fn counts_for_coverage(self) -> bool {
        matches!(self, Self::Critical | Self::Material)
    }
}

/// Judge verdict for one claim against the retrieved context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Supported,
    Weak,
    Contradicted,
    #[default]
    NotFound,
    ExpertVerified,
    ConflictFlagged,
}

impl Verdict {
    /// Unknown labels fall back to [`Verdict::NotFound`].
    #[must_use]
    pub fn from_loose(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "supported" => Self::Supported,
            "weak" => Self::Weak,
            "contradicted" => Self::Contradicted,
            "expert_verified" => Self::ExpertVerified,
            "conflict_flagged" => Self::ConflictFlagged,
            _ => Self::NotFound,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Supported => "supported",
            Self::Weak => "weak",
            Self::Contradicted => "contradicted",
            Self::NotFound => "not_found",
            Self::ExpertVerified => "expert_verified",
            Self::ConflictFlagged => "conflict_flagged",
        }
    }

    /// Verdicts that count as covered in the coverage numerator.
    #[must_use]
    pub fn is_covering(self) -> bool {
        matches!(self, Self::Supported | Self::Weak | Self::ExpertVerified)
    }

    /// Verdicts that count as unsupported for the rate gate.
    #[must_use]
    pub fn is_unsupported(self) -> bool {
        matches!(self, Self::Contradicted | Self::NotFound)
    }
}

/// Where a claim's support comes from: a context index or model knowledge.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceTag {
    /// `cite:N` with a 1-based context index.
    Cite(usize),
    LlmWriter,
    LlmSkeptic,
    LlmJudge,
    #[default]
    Missing,
}

impl SourceTag {
    /// Parse a loose tag label; accepts bracketed and bare forms.
    /// Unknown labels fall back to [`SourceTag::Missing`].
    #[must_use]
    pub fn from_loose(label: &str) -> Self {
        let trimmed = label
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .trim();
        if let Some(index) = trimmed.strip_prefix("cite:") {
            return index
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|&n| n >= 1)
                .map_or(Self::Missing, Self::Cite);
        }
        match trimmed {
            "llm:writer" => Self::LlmWriter,
            "llm:skeptic" => Self::LlmSkeptic,
            "llm:judge" => Self::LlmJudge,
            _ => Self::Missing,
        }
    }

    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Cite(n) => format!("cite:{n}"),
            Self::LlmWriter => "llm:writer".to_string(),
            Self::LlmSkeptic => "llm:skeptic".to_string(),
            Self::LlmJudge => "llm:judge".to_string(),
            Self::Missing => "missing".to_string(),
        }
    }
}

impl From<String> for SourceTag {
    fn from(value: String) -> Self {
        Self::from_loose(&value)
    }
}

impl From<SourceTag> for String {
    fn from(value: SourceTag) -> Self {
        value.encode()
    }
}

/// One atomic factual assertion extracted by the Judge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub claim_id: String,
    pub claim_text: String,
    pub claim_type: ClaimType,
    pub importance: Importance,
    pub requires_citation: bool,
}

/// Verdict record for one claim against the context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceEntry {
    pub claim_id: String,
    pub source_tag: SourceTag,
    pub verdict: Verdict,
    /// Clamped to `[0, 1]`.
    pub confidence_score: f64,
    /// Context indices cited, as strings, order preserved.
    pub chunk_ids: Vec<String>,
    pub evidence_snippet: Option<String>,
    pub expert_assessment: Option<String>,
    pub notes: Option<String>,
}

/// A document claim contradicting an established fact, surfaced with
/// both views rather than auto-resolved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub claim_text: String,
    pub domain: Option<String>,
    /// Inline both-view comparison text.
    pub comparison: String,
}

/// Expert knowledge the Judge added beyond the documents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpertAddition {
    pub topic: Option<String>,
    pub text: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSeverity {
    Low,
    #[default]
    Medium,
    High,
}

impl RiskSeverity {
    #[must_use]
    pub fn from_loose(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Non-terminal problem surfaced by the Judge phase (including local
/// parse recoveries).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskFlag {
    #[serde(rename = "type")]
    pub flag_type: String,
    pub severity: RiskSeverity,
    pub detail: Option<String>,
}

impl RiskFlag {
    /// Flag emitted when the Judge output could not be parsed.
    #[must_use]
    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self {
            flag_type: "parse_error".to_string(),
            severity: RiskSeverity::High,
            detail: Some(detail.into()),
        }
    }
}

/// Complete, well-typed result of one Judge pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeResult {
    pub verified_response: Option<String>,
    pub claims: Vec<Claim>,
    pub evidence: Vec<EvidenceEntry>,
    pub conflicts: Vec<Conflict>,
    pub expert_additions: Vec<ExpertAddition>,
    pub risk_flags: Vec<RiskFlag>,
}

impl JudgeResult {
    /// An empty ledger carrying a high-severity parse flag; used when
    /// the Judge output is unusable.
    #[must_use]
    pub fn parse_failure(detail: impl Into<String>) -> Self {
        Self {
            risk_flags: vec![RiskFlag::parse_error(detail)],
            ..Self::default()
        }
    }

    /// The evidence entry paired with `claim_id`, if any.
    #[must_use]
    pub fn evidence_for(&self, claim_id: &str) -> Option<&EvidenceEntry> {
        self.evidence.iter().find(|e| e.claim_id == claim_id)
    }

    /// Render this result in the JSON shape the Judge is prompted to
    /// emit (claims and verdict fields combined per entry). Reparsing
    /// this output through [`parse::parse_judge_output`] yields an equal
    /// structure.
    #[must_use]
    pub fn to_judge_json(&self) -> serde_json::Value {
        let claims: Vec<serde_json::Value> = self
            .claims
            .iter()
            .map(|claim| {
                let evidence = self.evidence_for(&claim.claim_id);
                let mut entry = json!({
                    "claimId": claim.claim_id,
                    "claimText": claim.claim_text,
                    "claimType": claim.claim_type.as_str(),
                    "importance": claim.importance.as_str(),
                });
                if let Some(ev) = evidence {
                    entry["sourceTag"] = json!(ev.source_tag.encode());
                    entry["verdict"] = json!(ev.verdict.as_str());
                    entry["confidenceScore"] = json!(ev.confidence_score);
                    entry["chunkIds"] = json!(ev.chunk_ids);
                    if let Some(snippet) = &ev.evidence_snippet {
                        entry["evidenceSnippet"] = json!(snippet);
                    }
                    if let Some(assessment) = &ev.expert_assessment {
                        entry["expertAssessment"] = json!(assessment);
                    }
                    if let Some(notes) = &ev.notes {
                        entry["notes"] = json!(notes);
                    }
                }
                entry
            })
            .collect();

        let mut out = json!({
            "claims": claims,
            "conflicts": self.conflicts,
            "expertAdditions": self.expert_additions,
            "riskFlags": self.risk_flags,
        });
        if let Some(response) = &self.verified_response {
            out["verifiedResponse"] = json!(response);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_labels_coerce_to_defaults() {
        assert_eq!(ClaimType::from_loose("opinion"), ClaimType::Fact);
        assert_eq!(Importance::from_loose("huge"), Importance::Material);
        assert_eq!(Verdict::from_loose("maybe"), Verdict::NotFound);
        assert_eq!(SourceTag::from_loose("cite:zero"), SourceTag::Missing);
    }

    #[test]
    fn source_tags_round_trip_through_strings() {
        for tag in [
            SourceTag::Cite(3),
            SourceTag::LlmWriter,
            SourceTag::LlmSkeptic,
            SourceTag::LlmJudge,
            SourceTag::Missing,
        ] {
            assert_eq!(SourceTag::from_loose(&tag.encode()), tag);
        }
    }

    #[test]
    fn bracketed_cite_tags_parse() {
        assert_eq!(SourceTag::from_loose("[cite:12]"), SourceTag::Cite(12));
        assert_eq!(SourceTag::from_loose("cite:0"), SourceTag::Missing);
    }

    #[test]
    fn verdict_classification() {
        assert!(Verdict::Supported.is_covering());
        assert!(Verdict::Weak.is_covering());
        assert!(Verdict::ExpertVerified.is_covering());
        assert!(!Verdict::ConflictFlagged.is_covering());
        assert!(Verdict::Contradicted.is_unsupported());
        assert!(Verdict::NotFound.is_unsupported());
        assert!(!Verdict::ConflictFlagged.is_unsupported());
    }
}
