//! Shared test fixtures: a temp-directory environment and deterministic
//! in-process stand-ins for the embedding and generation capabilities.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::sync::{mpsc, Semaphore};

use lectern::config::RetrievalConfig;
use lectern::conversations::ConversationStore;
use lectern::embedding::Embedder;
use lectern::error::{Error, Result};
use lectern::generation::Generator;
use lectern::index::VectorIndex;
use lectern::ingestion::IngestionCoordinator;
use lectern::models::{Message, Passage, PassageMetadata, Sender};

pub struct TestEnv {
    pub tmp: TempDir,
    pub pool: SqlitePool,
}

pub async fn setup() -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let pool = lectern::db::connect(&tmp.path().join("lectern.sqlite"))
        .await
        .unwrap();
    lectern::migrate::run_migrations(&pool).await.unwrap();
    TestEnv { tmp, pool }
}

impl TestEnv {
    pub fn upload_dir(&self) -> std::path::PathBuf {
        self.tmp.path().join("uploads")
    }

    pub fn index(&self) -> VectorIndex {
        VectorIndex::new(self.pool.clone(), Arc::new(ToyEmbedder), "test_passages", 64)
    }

    pub fn coordinator(&self) -> IngestionCoordinator {
        IngestionCoordinator::new(
            self.pool.clone(),
            self.index(),
            self.upload_dir(),
            1000,
            150,
        )
    }

    pub fn conversations(&self) -> ConversationStore {
        ConversationStore::new(self.pool.clone())
    }

    pub fn retriever(&self) -> lectern::retrieval::RetrievalOrchestrator {
        lectern::retrieval::RetrievalOrchestrator::new(self.index(), &RetrievalConfig::default())
    }
}

/// Deterministic embedder: a normalized byte histogram, so similar texts
/// get similar vectors and identical texts get identical ones.
pub struct ToyEmbedder;

pub fn toy_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0f32; 16];
    for b in text.bytes() {
        v[(b as usize) % 16] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[async_trait]
impl Embedder for ToyEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| toy_embedding(t)).collect())
    }
}

/// Generator that replays a fixed fragment script.
///
/// `fail_after: Some(n)` makes the stream error after `n` fragments have
/// been sent. `gate` rations fragment production: one permit is consumed
/// per fragment, which lets a test hold the generator at a precise point.
pub struct ScriptedGenerator {
    pub fragments: Vec<String>,
    pub fail_after: Option<usize>,
    pub gate: Option<Arc<Semaphore>>,
}

impl ScriptedGenerator {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            fail_after: None,
            gate: None,
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        if self.fail_after.is_some() {
            return Err(Error::ExternalService(
                "generation backend failed".to_string(),
            ));
        }
        Ok(self.fragments.concat())
    }

    async fn generate_stream(&self, _prompt: &str, tx: mpsc::Sender<String>) -> Result<()> {
        for (i, fragment) in self.fragments.iter().enumerate() {
            if self.fail_after == Some(i) {
                return Err(Error::ExternalService(
                    "generation backend failed".to_string(),
                ));
            }
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if tx.send(fragment.clone()).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }
}

pub fn make_passage(id: &str, text: &str, grade: i64, chunk_index: i64) -> Passage {
    Passage {
        id: id.to_string(),
        text: text.to_string(),
        metadata: PassageMetadata {
            grade,
            subject: "Physics".to_string(),
            chapter: "Motion".to_string(),
            filename: "ch1.pdf".to_string(),
            chunk_index,
        },
    }
}

/// Poll until the conversation holds a tutor message, or give up.
pub async fn wait_for_tutor_message(
    store: &ConversationStore,
    conversation_id: &str,
) -> Option<Message> {
    for _ in 0..200 {
        let messages = store.list_messages(conversation_id).await.unwrap();
        if let Some(message) = messages.into_iter().find(|m| m.sender == Sender::Tutor) {
            return Some(message);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}
