//! Retrieval orchestration: grade-filtered passage search with a widening
//! fallback.
//!
//! A question is first matched against passages for the student's grade.
//! When that returns fewer than `min_matches` results the search widens to
//! all grades, so a grade-10 student still gets the grade-9 chapter that
//! covers the topic. "No results anywhere" is valid data — the answer
//! step then works from an empty context.

use tracing::debug;

use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::index::{PassageFilter, VectorIndex};
use crate::models::ScoredPassage;

/// Assembled context for the generation step, plus the ranked passages it
/// came from as provenance.
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    pub context: String,
    pub sources: Vec<ScoredPassage>,
}

#[derive(Clone)]
pub struct RetrievalOrchestrator {
    index: VectorIndex,
    top_k: usize,
    min_matches: usize,
}

impl RetrievalOrchestrator {
    pub fn new(index: VectorIndex, config: &RetrievalConfig) -> Self {
        Self {
            index,
            top_k: config.top_k,
            min_matches: config.min_matches,
        }
    }

    pub async fn answer_context(&self, question: &str, grade: i64) -> Result<RetrievedContext> {
        let mut sources = self
            .index
            .query(question, self.top_k, &PassageFilter::for_grade(grade))
            .await?;

        if sources.len() < self.min_matches {
            debug!(
                grade,
                found = sources.len(),
                "too few grade matches, widening search to all grades"
            );
            sources = self
                .index
                .query(question, self.top_k, &PassageFilter::default())
                .await?;
        }

        let context = sources
            .iter()
            .map(|s| s.passage.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(RetrievedContext { context, sources })
    }
}
