//! Retriever gateway: a thin seam over the external vector search plus
//! the context-block assembly the agents consume.
//!
//! The orchestrator assigns each retrieved chunk a 1-based context index;
//! that index is the only citation identity (`[cite:N]`) the Writer,
//! Skeptic, and Judge are allowed to reference, and it must survive the
//! whole pipeline unchanged.

use std::sync::OnceLock;

use async_trait::async_trait;
use miette::Diagnostic;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A retrieved passage, immutable for the duration of a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub content: String,
    pub document_filename: Option<String>,
    /// Retriever similarity score; ordering is the retriever's.
    pub score: f64,
}

/// Failures from the external search backend. Terminal for a session.
#[derive(Debug, Error, Diagnostic)]
pub enum RetrieverError {
    #[error("retriever backend error: {message}")]
    #[diagnostic(
        code(veriweave::retrieval::backend),
        help("Check vector-search connectivity for the workspace.")
    )]
    Backend { message: String },
}

/// External vector search, consumed as a pure function of its inputs.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(
        &self,
        workspace_id: &str,
        query: &str,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<Chunk>, RetrieverError>;
}

/// Assemble the single context string handed to every agent.
///
/// Chunks keep the retriever's order; the bracketed number is the
/// context index cited as `[cite:N]`:
///
/// ```text
/// [1] (notes.pdf)
/// <content>
///
/// ---
///
/// [2] (report.md)
/// <content>
/// ```
#[must_use]
pub fn build_context(chunks: &[Chunk]) -> String {
    let mut blocks = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        let header = match &chunk.document_filename {
            Some(name) => format!("[{}] ({name})", i + 1),
            None => format!("[{}]", i + 1),
        };
        blocks.push(format!("{header}\n{}", chunk.content));
    }
    blocks.join("\n\n---\n\n")
}

fn cite_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[cite:(\d+)\]").expect("citation pattern"))
}

/// All `[cite:N]` indices appearing in `text`, in order of appearance.
#[must_use]
pub fn cited_indices(text: &str) -> Vec<usize> {
    cite_regex()
        .captures_iter(text)
        .filter_map(|cap| cap[1].parse::<usize>().ok())
        .collect()
}

/// Citation indices in `text` that fall outside `1..=chunk_count`.
#[must_use]
pub fn invalid_citations(text: &str, chunk_count: usize) -> Vec<usize> {
    cited_indices(text)
        .into_iter()
        .filter(|&n| n == 0 || n > chunk_count)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, content: &str, file: Option<&str>) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            content: content.to_string(),
            document_filename: file.map(str::to_string),
            score: 0.9,
        }
    }

    #[test]
    fn context_blocks_are_numbered_from_one() {
        let chunks = vec![
            chunk("a", "alpha text", Some("docA")),
            chunk("b", "beta text", Some("docB")),
        ];
        let context = build_context(&chunks);
        assert_eq!(
            context,
            "[1] (docA)\nalpha text\n\n---\n\n[2] (docB)\nbeta text"
        );
    }

    #[test]
    fn missing_filename_omits_parenthetical() {
        let context = build_context(&[chunk("a", "text", None)]);
        assert_eq!(context, "[1]\ntext");
    }

    #[test]
    fn empty_chunk_list_yields_empty_context() {
        assert_eq!(build_context(&[]), "");
    }

    #[test]
    fn extracts_citation_indices_in_order() {
        let text = "First [cite:2], then [cite:1][cite:3].";
        assert_eq!(cited_indices(text), vec![2, 1, 3]);
    }

    #[test]
    fn flags_out_of_range_citations() {
        let text = "ok [cite:1], bad [cite:0] and [cite:9]";
        assert_eq!(invalid_citations(text, 3), vec![0, 9]);
        assert!(invalid_citations("all good [cite:3]", 3).is_empty());
    }

    #[test]
    fn llm_tags_are_not_citations() {
        assert!(cited_indices("knowledge [llm:writer] here").is_empty());
    }
}
