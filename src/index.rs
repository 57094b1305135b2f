//! Vector index adapter.
//!
//! Bridges the embedding capability and the passage store: `upsert` embeds
//! passage texts and writes durable rows into a named collection,
//! overwriting rows with the same id; `query` embeds the question, ranks
//! the collection by cosine similarity in-process, and returns the top
//! matches restricted to a typed metadata filter.

use std::sync::Arc;

use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use crate::error::Result;
use crate::models::{Passage, PassageMetadata, ScoredPassage};

/// Exact-match metadata predicate. Every populated field must match;
/// an empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct PassageFilter {
    pub grade: Option<i64>,
    pub subject: Option<String>,
    pub chapter: Option<String>,
}

impl PassageFilter {
    pub fn for_grade(grade: i64) -> Self {
        Self {
            grade: Some(grade),
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct VectorIndex {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    collection: String,
    batch_size: usize,
}

impl VectorIndex {
    pub fn new(
        pool: SqlitePool,
        embedder: Arc<dyn Embedder>,
        collection: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            pool,
            embedder,
            collection: collection.into(),
            batch_size: batch_size.max(1),
        }
    }

    /// Embed and write a batch of passages. Rows with an existing id are
    /// overwritten, so re-ingesting the same job id is idempotent.
    pub async fn upsert(&self, passages: &[Passage]) -> Result<()> {
        for batch in passages.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;

            let now = chrono::Utc::now().timestamp();
            let mut tx = self.pool.begin().await?;
            for (passage, vector) in batch.iter().zip(vectors.iter()) {
                sqlx::query(
                    r#"
                    INSERT INTO passages
                        (collection, id, text, embedding, grade, subject, chapter, filename, chunk_index, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(collection, id) DO UPDATE SET
                        text = excluded.text,
                        embedding = excluded.embedding,
                        grade = excluded.grade,
                        subject = excluded.subject,
                        chapter = excluded.chapter,
                        filename = excluded.filename,
                        chunk_index = excluded.chunk_index
                    "#,
                )
                .bind(&self.collection)
                .bind(&passage.id)
                .bind(&passage.text)
                .bind(vec_to_blob(vector))
                .bind(passage.metadata.grade)
                .bind(&passage.metadata.subject)
                .bind(&passage.metadata.chapter)
                .bind(&passage.metadata.filename)
                .bind(passage.metadata.chunk_index)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
        }

        debug!(
            collection = %self.collection,
            count = passages.len(),
            "upserted passages"
        );
        Ok(())
    }

    /// Return up to `k` passages ranked by cosine similarity to `text`,
    /// restricted to rows matching `filter`. No matches is an empty
    /// vector, not an error. Ties rank earlier chunks first.
    pub async fn query(
        &self,
        text: &str,
        k: usize,
        filter: &PassageFilter,
    ) -> Result<Vec<ScoredPassage>> {
        let query_vec = self.embedder.embed_one(text).await?;

        let mut qb = sqlx::QueryBuilder::new(
            "SELECT id, text, embedding, grade, subject, chapter, filename, chunk_index \
             FROM passages WHERE collection = ",
        );
        qb.push_bind(&self.collection);
        if let Some(grade) = filter.grade {
            qb.push(" AND grade = ").push_bind(grade);
        }
        if let Some(ref subject) = filter.subject {
            qb.push(" AND subject = ").push_bind(subject);
        }
        if let Some(ref chapter) = filter.chapter {
            qb.push(" AND chapter = ").push_bind(chapter);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut scored: Vec<ScoredPassage> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let score = cosine_similarity(&query_vec, &blob_to_vec(&blob));
                ScoredPassage {
                    passage: Passage {
                        id: row.get("id"),
                        text: row.get("text"),
                        metadata: PassageMetadata {
                            grade: row.get("grade"),
                            subject: row.get("subject"),
                            chapter: row.get("chapter"),
                            filename: row.get("filename"),
                            chunk_index: row.get("chunk_index"),
                        },
                    },
                    score,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.passage.metadata.chunk_index.cmp(&b.passage.metadata.chunk_index))
                .then(a.passage.id.cmp(&b.passage.id))
        });
        scored.truncate(k);

        Ok(scored)
    }
}
