//! Best-effort parser for raw Judge output.
//!
//! The Judge is prompted to emit strict JSON but real model output drifts:
//! fenced code blocks, camelCase/snake_case mixtures, out-of-range
//! confidences, invented enum labels. This parser is total: for any input
//! string it returns a well-typed [`JudgeResult`]; an unusable payload
//! yields an empty ledger with a high-severity `parse_error` risk flag,
//! and malformed entries are dropped, never guessed.

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::{
    Claim, ClaimType, Conflict, EvidenceEntry, ExpertAddition, Importance, JudgeResult, RiskFlag,
    RiskSeverity, SourceTag, Verdict,
};

/// Parse raw Judge output into a typed ledger. Never fails.
#[must_use]
pub fn parse_judge_output(raw: &str) -> JudgeResult {
    let candidate = extract_json_candidate(raw);
    let root: Value = match serde_json::from_str(candidate) {
        Ok(value) => value,
        Err(err) => {
            debug!(error = %err, "judge output is not JSON; emitting empty ledger");
            return JudgeResult::parse_failure(format!("judge output is not valid JSON: {err}"));
        }
    };

    let Value::Object(_) = &root else {
        return JudgeResult::parse_failure("judge output JSON is not an object");
    };

    let mut result = JudgeResult {
        verified_response: field(&root, &["verifiedResponse", "verified_response"])
            .and_then(Value::as_str)
            .map(str::to_owned),
        ..JudgeResult::default()
    };

    if let Some(entries) = field(&root, &["claims"]).and_then(Value::as_array) {
        for entry in entries {
            if let Some((claim, evidence)) = parse_claim_entry(entry) {
                result.claims.push(claim);
                result.evidence.push(evidence);
            }
        }
    }

    if let Some(entries) = field(&root, &["conflicts"]).and_then(Value::as_array) {
        for entry in entries {
            if let Some(conflict) = parse_conflict(entry) {
                result.conflicts.push(conflict);
            }
        }
    }

    if let Some(entries) =
        field(&root, &["expertAdditions", "expert_additions"]).and_then(Value::as_array)
    {
        for entry in entries {
            if let Some(addition) = parse_expert_addition(entry) {
                result.expert_additions.push(addition);
            }
        }
    }

    if let Some(entries) = field(&root, &["riskFlags", "risk_flags"]).and_then(Value::as_array) {
        for entry in entries {
            if let Some(flag) = parse_risk_flag(entry) {
                result.risk_flags.push(flag);
            }
        }
    }

    result
}

/// Prefer the contents of a fenced ```json block when one is present;
/// otherwise hand back the whole string.
fn extract_json_candidate(raw: &str) -> &str {
    if let Some(start) = raw.find("```json") {
        let body = &raw[start + "```json".len()..];
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
        return body.trim();
    }
    raw.trim()
}

/// First matching key among camelCase and snake_case spellings.
fn field<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    let object = value.as_object()?;
    names.iter().find_map(|name| object.get(*name))
}

fn string_field(value: &Value, names: &[&str]) -> Option<String> {
    field(value, names)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn parse_claim_entry(entry: &Value) -> Option<(Claim, EvidenceEntry)> {
    // A claim without text cannot be verified against anything; drop it.
    let claim_text = string_field(entry, &["claimText", "claim_text"])?;
    let claim_id = string_field(entry, &["claimId", "claim_id"])
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let claim = Claim {
        claim_id: claim_id.clone(),
        claim_text,
        claim_type: string_field(entry, &["claimType", "claim_type"])
            .map(|s| ClaimType::from_loose(&s))
            .unwrap_or_default(),
        importance: string_field(entry, &["importance"])
            .map(|s| Importance::from_loose(&s))
            .unwrap_or_default(),
        requires_citation: true,
    };

    let evidence = EvidenceEntry {
        claim_id,
        source_tag: string_field(entry, &["sourceTag", "source_tag"])
            .map(|s| SourceTag::from_loose(&s))
            .unwrap_or_default(),
        verdict: string_field(entry, &["verdict"])
            .map(|s| Verdict::from_loose(&s))
            .unwrap_or_default(),
        confidence_score: field(entry, &["confidenceScore", "confidence_score"])
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .clamp(0.0, 1.0),
        chunk_ids: field(entry, &["chunkIds", "chunk_ids"])
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(chunk_id_string).collect())
            .unwrap_or_default(),
        evidence_snippet: string_field(entry, &["evidenceSnippet", "evidence_snippet"]),
        expert_assessment: string_field(entry, &["expertAssessment", "expert_assessment"]),
        notes: string_field(entry, &["notes"]),
    };

    Some((claim, evidence))
}

/// Chunk ids arrive as numbers or strings; both normalize to strings,
/// order preserved.
fn chunk_id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_conflict(entry: &Value) -> Option<Conflict> {
    Some(Conflict {
        claim_text: string_field(entry, &["claimText", "claim_text"])?,
        domain: string_field(entry, &["domain"]),
        comparison: string_field(entry, &["comparison"]).unwrap_or_default(),
    })
}

fn parse_expert_addition(entry: &Value) -> Option<ExpertAddition> {
    Some(ExpertAddition {
        topic: string_field(entry, &["topic", "domain"]),
        text: string_field(entry, &["text", "content"])?,
    })
}

fn parse_risk_flag(entry: &Value) -> Option<RiskFlag> {
    Some(RiskFlag {
        flag_type: string_field(entry, &["type", "flagType", "flag_type"])?,
        severity: string_field(entry, &["severity"])
            .map(|s| RiskSeverity::from_loose(&s))
            .unwrap_or_default(),
        detail: string_field(entry, &["detail", "details"]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_clean_judge_payload() {
        let raw = r#"{
            "verifiedResponse": "The limit is 30 days [cite:1].",
            "claims": [{
                "claimText": "The limit is 30 days",
                "claimType": "numeric",
                "importance": "critical",
                "sourceTag": "cite:1",
                "verdict": "supported",
                "confidenceScore": 0.95,
                "chunkIds": [1],
                "evidenceSnippet": "within 30 days"
            }],
            "conflicts": [],
            "expertAdditions": [],
            "riskFlags": []
        }"#;
        let result = parse_judge_output(raw);
        assert_eq!(
            result.verified_response.as_deref(),
            Some("The limit is 30 days [cite:1].")
        );
        assert_eq!(result.claims.len(), 1);
        assert_eq!(result.claims[0].claim_type, ClaimType::Numeric);
        assert_eq!(result.claims[0].importance, Importance::Critical);
        let evidence = &result.evidence[0];
        assert_eq!(evidence.verdict, Verdict::Supported);
        assert_eq!(evidence.source_tag, SourceTag::Cite(1));
        assert_eq!(evidence.chunk_ids, vec!["1"]);
        assert!(result.risk_flags.is_empty());
    }

    #[test]
    fn extracts_fenced_json_blocks() {
        let raw = "Here is my verdict:\n```json\n{\"claims\": []}\n```\nDone.";
        let result = parse_judge_output(raw);
        assert!(result.claims.is_empty());
        assert!(result.risk_flags.is_empty());
    }

    #[test]
    fn accepts_snake_case_keys() {
        let raw = r#"{
            "verified_response": "ok",
            "claims": [{
                "claim_text": "x",
                "claim_type": "legal",
                "importance": "minor",
                "source_tag": "llm:writer",
                "verdict": "expert_verified",
                "confidence_score": 0.5,
                "chunk_ids": ["2", 3]
            }]
        }"#;
        let result = parse_judge_output(raw);
        assert_eq!(result.verified_response.as_deref(), Some("ok"));
        assert_eq!(result.claims[0].claim_type, ClaimType::Legal);
        assert_eq!(result.evidence[0].source_tag, SourceTag::LlmWriter);
        assert_eq!(result.evidence[0].chunk_ids, vec!["2", "3"]);
    }

    #[test]
    fn prose_yields_empty_ledger_with_parse_flag() {
        let result = parse_judge_output("I think the answer looks fine overall.");
        assert!(result.claims.is_empty());
        assert!(result.evidence.is_empty());
        assert_eq!(result.risk_flags.len(), 1);
        assert_eq!(result.risk_flags[0].flag_type, "parse_error");
        assert_eq!(result.risk_flags[0].severity, RiskSeverity::High);
    }

    #[test]
    fn non_object_json_yields_parse_flag() {
        let result = parse_judge_output("[1, 2, 3]");
        assert_eq!(result.risk_flags.len(), 1);
        assert_eq!(result.risk_flags[0].flag_type, "parse_error");
    }

    #[test]
    fn unknown_enum_labels_coerce() {
        let raw = r#"{"claims": [{
            "claimText": "y",
            "claimType": "vibe",
            "importance": "cosmic",
            "verdict": "plausible",
            "confidenceScore": 7.2
        }]}"#;
        let result = parse_judge_output(raw);
        assert_eq!(result.claims[0].claim_type, ClaimType::Fact);
        assert_eq!(result.claims[0].importance, Importance::Material);
        assert_eq!(result.evidence[0].verdict, Verdict::NotFound);
        assert!((result.evidence[0].confidence_score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn claims_without_text_are_dropped() {
        let raw = r#"{"claims": [
            {"claimType": "fact", "verdict": "supported"},
            {"claimText": "", "verdict": "supported"},
            {"claimText": "kept", "verdict": "weak"}
        ]}"#;
        let result = parse_judge_output(raw);
        assert_eq!(result.claims.len(), 1);
        assert_eq!(result.claims[0].claim_text, "kept");
    }

    #[test]
    fn negative_confidence_clamps_to_zero() {
        let raw = r#"{"claims": [{"claimText": "z", "confidenceScore": -3.0}]}"#;
        let result = parse_judge_output(raw);
        assert!(result.evidence[0].confidence_score.abs() < f64::EPSILON);
    }

    #[test]
    fn risk_flags_and_conflicts_parse() {
        let raw = r#"{
            "claims": [],
            "conflicts": [{
                "claimText": "doc says 10%",
                "domain": "finance",
                "comparison": "Document: 10% [cite:2]; established fact: 12% [llm:judge]"
            }],
            "riskFlags": [{"type": "stale_source", "severity": "low"}]
        }"#;
        let result = parse_judge_output(raw);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].domain.as_deref(), Some("finance"));
        assert_eq!(result.risk_flags[0].severity, RiskSeverity::Low);
    }

    #[test]
    fn judge_json_round_trips() {
        let raw = r#"{
            "verifiedResponse": "Answer [cite:1] and [cite:2].",
            "claims": [
                {
                    "claimId": "c-1",
                    "claimText": "first",
                    "claimType": "numeric",
                    "importance": "critical",
                    "sourceTag": "cite:1",
                    "verdict": "supported",
                    "confidenceScore": 0.9,
                    "chunkIds": ["1"],
                    "evidenceSnippet": "snippet",
                    "notes": "exact match"
                },
                {
                    "claimId": "c-2",
                    "claimText": "second",
                    "claimType": "fact",
                    "importance": "material",
                    "sourceTag": "llm:writer",
                    "verdict": "expert_verified",
                    "confidenceScore": 0.7,
                    "chunkIds": []
                }
            ],
            "conflicts": [{"claimText": "c", "comparison": "both views"}],
            "expertAdditions": [{"topic": "law", "text": "addendum"}],
            "riskFlags": [{"type": "parse_error", "severity": "high"}]
        }"#;
        let first = parse_judge_output(raw);
        let reparsed = parse_judge_output(&first.to_judge_json().to_string());
        assert_eq!(first, reparsed);
    }

    proptest! {
        /// Parser totality: any input yields a well-typed result, and
        /// non-JSON input always carries a parse_error flag.
        #[test]
        fn parser_is_total(raw in ".{0,400}") {
            let result = parse_judge_output(&raw);
            prop_assert!(result.claims.len() == result.evidence.len());
        }

        #[test]
        fn garbage_json_never_panics(raw in "\\{.{0,200}") {
            let _ = parse_judge_output(&raw);
        }

        #[test]
        fn confidence_always_clamped(score in proptest::num::f64::ANY) {
            let raw = format!(
                "{{\"claims\": [{{\"claimText\": \"t\", \"confidenceScore\": {score}}}]}}"
            );
            let result = parse_judge_output(&raw);
            if let Some(entry) = result.evidence.first() {
                prop_assert!((0.0..=1.0).contains(&entry.confidence_score));
            }
        }
    }
}
