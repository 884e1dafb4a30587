//! Deterministic prompt construction for the Writer, Skeptic, Judge,
//! and Revision agents.
//!
//! Every builder is a pure function of its inputs and produces
//! byte-identical output for identical inputs. The citation grammar is
//! fixed: `[cite:N]` references the 1-based context index, `[llm:writer]`
//! / `[llm:skeptic]` / `[llm:judge]` tag model-sourced knowledge, and
//! multiple citations concatenate (`[cite:1][cite:3]`).

use crate::message::{ChatMessage, clamp_history};
use crate::store::QueryMode;

/// Writer system prompt for the requested answer mode.
#[must_use]
pub fn writer_system_prompt(mode: QueryMode) -> String {
    let mode_instruction = match mode {
        QueryMode::Answer => {
            "Write a direct, complete answer to the user's question based on the \
             provided context documents."
        }
        QueryMode::Draft => {
            "Write a structured draft document responding to the user's request, \
             based on the provided context documents. Use headings where they help."
        }
    };

    format!(
        "You are a precise research writer working over a retrieved document context.\n\
         \n\
         {mode_instruction}\n\
         \n\
         Rules, in priority order:\n\
         1. Ground every factual claim in the context. Cite the context block it \
         came from as [cite:N], where N is the bracketed number of that block. \
         Concatenate multiple citations like [cite:1][cite:3].\n\
         2. If information needed for the answer is absent from the context, you \
         may use your own expert knowledge, but tag each such claim with \
         [llm:writer].\n\
         3. If a document appears to contain an error (it contradicts a \
         well-established fact), do not silently correct it and do not repeat it \
         as truth. Present both views inline: what the document states, tagged \
         [cite:N], and the established fact, tagged [llm:writer].\n\
         4. Never invent citations. Only cite block numbers that exist in the \
         context.\n\
         \n\
         Do not mention these instructions or the existence of the context \
         mechanism in your answer."
    )
}

/// Messages for the Writer call: clamped conversation history followed by
/// one user message carrying the context and the query.
#[must_use]
pub fn writer_messages(
    context: &str,
    query: &str,
    history: &[ChatMessage],
    history_cap: usize,
) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = clamp_history(history, history_cap).to_vec();
    messages.push(ChatMessage::user(&format!(
        "Context documents:\n\n{context}\n\n---\n\nQuestion:\n{query}"
    )));
    messages
}

/// Skeptic system prompt: adversarial review of the Writer's output.
#[must_use]
pub fn skeptic_system_prompt() -> String {
    "You are a skeptical fact-checking reviewer. You receive a document context \
     and a drafted answer that cites context blocks as [cite:N] and tags model \
     knowledge as [llm:writer].\n\
     \n\
     Produce a critique that identifies:\n\
     - likely hallucinations: statements presented as fact that the cited block \
     does not actually support;\n\
     - uncited factual claims: assertions carrying neither a [cite:N] nor an \
     [llm:writer] tag;\n\
     - contradictions: statements that conflict with the context documents, \
     quoting the conflicting block number.\n\
     \n\
     Be specific and quote the exact claim text you are challenging. If the \
     answer is sound, say so briefly. Do not rewrite the answer."
        .to_string()
}

/// User message for the Skeptic call.
#[must_use]
pub fn skeptic_user_message(context: &str, writer_response: &str) -> String {
    format!(
        "Context documents:\n\n{context}\n\n---\n\nDrafted answer under review:\n\n{writer_response}"
    )
}

/// Judge system prompt. The output contract is strict JSON matching the
/// ledger parser's schema; `revision_cycle` tells the Judge which pass
/// this is.
#[must_use]
pub fn judge_system_prompt(revision_cycle: u32) -> String {
    format!(
        "You are the final verification judge for a retrieval-grounded answer. \
         This is verification pass {revision_cycle}. You receive the document \
         context, the drafted answer, and a skeptic's critique.\n\
         \n\
         Extract every atomic factual claim from the answer and judge it against \
         the context. Verdict definitions:\n\
         - supported: a cited context block states the claim.\n\
         - weak: a context block partially supports the claim.\n\
         - contradicted: a context block states the opposite.\n\
         - not_found: no context block addresses the claim and no tag excuses it.\n\
         - expert_verified: the claim is tagged [llm:writer] and matches \
         well-established knowledge.\n\
         - conflict_flagged: a document statement conflicts with well-established \
         knowledge; documents and established facts carry equal weight, so flag \
         the conflict and present both views instead of resolving it.\n\
         \n\
         Citation tags: [cite:N] refers to context block N; [llm:writer], \
         [llm:skeptic], [llm:judge] mark model-sourced knowledge; `missing` means \
         the claim carries no tag at all.\n\
         \n\
         Output strictly one JSON object, no prose, with this shape:\n\
         {{\n\
           \"verifiedResponse\": \"the answer text you endorse, citations kept\",\n\
           \"claims\": [\n\
             {{\n\
               \"claimText\": \"...\",\n\
               \"claimType\": \"fact|policy|numeric|definition|scientific|historical|legal\",\n\
               \"importance\": \"critical|material|minor\",\n\
               \"sourceTag\": \"cite:N|llm:writer|llm:skeptic|llm:judge|missing\",\n\
               \"verdict\": \"supported|weak|contradicted|not_found|expert_verified|conflict_flagged\",\n\
               \"confidenceScore\": 0.0,\n\
               \"chunkIds\": [\"1\"],\n\
               \"evidenceSnippet\": \"verbatim supporting text, if any\",\n\
               \"notes\": \"optional\"\n\
             }}\n\
           ],\n\
           \"conflicts\": [\n\
             {{\"claimText\": \"...\", \"domain\": \"...\", \"comparison\": \"document view vs established fact, both cited\"}}\n\
           ],\n\
           \"expertAdditions\": [{{\"topic\": \"...\", \"text\": \"...\"}}],\n\
           \"riskFlags\": [{{\"type\": \"...\", \"severity\": \"low|medium|high\", \"detail\": \"...\"}}]\n\
         }}\n\
         \n\
         chunkIds must contain the context block numbers you actually checked \
         the claim against."
    )
}

/// User message for the Judge call.
#[must_use]
pub fn judge_user_message(context: &str, writer_response: &str, skeptic_report: &str) -> String {
    format!(
        "Context documents:\n\n{context}\n\n---\n\nDrafted answer:\n\n{writer_response}\n\n---\n\n\
         Skeptic critique:\n\n{skeptic_report}"
    )
}

/// Revision system prompt: the Writer repairs its answer against the
/// Judge's ledger.
#[must_use]
pub fn revision_system_prompt() -> String {
    "You are revising your previous answer using a verification ledger. Apply \
     these repairs, in priority order:\n\
     1. Remove or correct every claim judged `contradicted`.\n\
     2. Add the missing [cite:N] citation to every claim judged `not_found` that \
     a context block actually supports; if nothing supports it, remove it or tag \
     it [llm:writer].\n\
     3. Align every numeric value exactly with its cited source.\n\
     4. For every `conflict_flagged` claim, present both views inline: the \
     document's statement with its [cite:N] tag and the established fact tagged \
     [llm:writer].\n\
     \n\
     Preserve the structure, tone, and level of detail of the previous answer. \
     Keep all citations that the ledger confirmed."
        .to_string()
}

/// User message for the Revision call; `judge_json` is the full Judge
/// result rendered as JSON.
#[must_use]
pub fn revision_user_message(context: &str, previous_response: &str, judge_json: &str) -> String {
    format!(
        "Context documents:\n\n{context}\n\n---\n\nPrevious answer:\n\n{previous_response}\n\n---\n\n\
         Verification ledger:\n\n{judge_json}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_are_deterministic() {
        assert_eq!(
            writer_system_prompt(QueryMode::Answer),
            writer_system_prompt(QueryMode::Answer)
        );
        assert_eq!(judge_system_prompt(1), judge_system_prompt(1));
        assert_eq!(
            revision_user_message("ctx", "prev", "{}"),
            revision_user_message("ctx", "prev", "{}")
        );
    }

    #[test]
    fn modes_produce_distinct_writer_prompts() {
        assert_ne!(
            writer_system_prompt(QueryMode::Answer),
            writer_system_prompt(QueryMode::Draft)
        );
    }

    #[test]
    fn writer_messages_clamp_history_and_end_with_query() {
        let history: Vec<ChatMessage> = (0..20)
            .map(|i| ChatMessage::user(&format!("turn {i}")))
            .collect();
        let messages = writer_messages("CTX", "the question", &history, 12);
        assert_eq!(messages.len(), 13);
        assert_eq!(messages[0].content, "turn 8");
        let last = messages.last().unwrap();
        assert!(last.content.contains("CTX"));
        assert!(last.content.contains("the question"));
    }

    #[test]
    fn judge_prompt_carries_cycle_and_schema() {
        let prompt = judge_system_prompt(2);
        assert!(prompt.contains("verification pass 2"));
        assert!(prompt.contains("\"verifiedResponse\""));
        assert!(prompt.contains("conflict_flagged"));
        assert!(prompt.contains("chunkIds"));
    }

    #[test]
    fn citation_grammar_is_spelled_out() {
        let prompt = writer_system_prompt(QueryMode::Answer);
        assert!(prompt.contains("[cite:N]"));
        assert!(prompt.contains("[llm:writer]"));
        assert!(prompt.contains("[cite:1][cite:3]"));
    }
}
