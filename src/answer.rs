//! Streaming answer pipeline.
//!
//! Couples retrieval to the generation capability and to conversation
//! persistence. The streaming path forwards each generated fragment the
//! moment it arrives — nothing buffers the whole answer before the first
//! yield — while a producer task accumulates the delivered fragments and
//! persists them as a single tutor message when the stream ends, fails,
//! or the client hangs up. A fragment only counts as delivered (and is
//! only accumulated) once the send to the consumer succeeds, so a
//! disconnect persists exactly what the client received.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::conversations::ConversationStore;
use crate::error::{Error, Result};
use crate::generation::Generator;
use crate::models::{Conversation, ScoredPassage, Sender};
use crate::retrieval::RetrievalOrchestrator;

/// One element of a streamed answer.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerEvent {
    /// The next fragment of generated text.
    Delta(String),
    /// The generation capability failed mid-stream; terminal.
    Error(String),
    /// Normal end of stream.
    Done,
}

#[derive(Clone)]
pub struct AnswerStreamer {
    retriever: RetrievalOrchestrator,
    generator: Arc<dyn Generator>,
    conversations: ConversationStore,
}

impl AnswerStreamer {
    pub fn new(
        retriever: RetrievalOrchestrator,
        generator: Arc<dyn Generator>,
        conversations: ConversationStore,
    ) -> Self {
        Self {
            retriever,
            generator,
            conversations,
        }
    }

    /// Answer a question as a stream of fragments, recording the exchange
    /// in the student's conversation.
    ///
    /// The conversation is resolved (or created) and the student's
    /// question appended before the first fragment. Retrieval failures
    /// surface as an `Err` here — the transport is not a stream yet at
    /// that point. After that, all outcomes arrive as [`AnswerEvent`]s:
    /// fragments in order, then either `Done` or one terminal `Error`.
    pub async fn stream_answer(
        &self,
        student_id: &str,
        question: &str,
        grade: i64,
        conversation_id: Option<&str>,
    ) -> Result<(Conversation, mpsc::Receiver<AnswerEvent>)> {
        let conversation = self.resolve_conversation(student_id, conversation_id).await?;

        self.conversations
            .append_message(&conversation.id, Sender::Student, question)
            .await?;

        let retrieved = self.retriever.answer_context(question, grade).await?;
        let prompt = build_prompt(question, grade, &retrieved.context);

        // Capacity 1: the producer stays exactly one fragment ahead of the
        // consumer, which keeps first-fragment latency low and makes the
        // delivered-fragment accounting exact on disconnect.
        let (out_tx, out_rx) = mpsc::channel(1);
        let generator = Arc::clone(&self.generator);
        let conversations = self.conversations.clone();
        let conversation_id = conversation.id.clone();

        tokio::spawn(async move {
            let (gen_tx, mut gen_rx) = mpsc::channel::<String>(1);
            let gen_task =
                tokio::spawn(async move { generator.generate_stream(&prompt, gen_tx).await });

            let mut answer = String::new();
            let mut disconnected = false;

            while let Some(delta) = gen_rx.recv().await {
                if out_tx.send(AnswerEvent::Delta(delta.clone())).await.is_err() {
                    disconnected = true;
                    break;
                }
                answer.push_str(&delta);
            }

            if disconnected {
                warn!(conversation_id = %conversation_id, "client disconnected mid-stream");
                // Dropping gen_rx tells the generator to stop producing.
                drop(gen_rx);
            } else {
                match gen_task.await {
                    Ok(Ok(())) => {
                        let _ = out_tx.send(AnswerEvent::Done).await;
                    }
                    Ok(Err(e)) => {
                        warn!(conversation_id = %conversation_id, error = %e, "generation failed mid-stream");
                        let _ = out_tx.send(AnswerEvent::Error(e.to_string())).await;
                    }
                    Err(e) => {
                        let _ = out_tx
                            .send(AnswerEvent::Error(format!("generation task failed: {}", e)))
                            .await;
                    }
                }
            }

            // Persist whatever the client actually received, even a
            // partial answer. An empty answer persists nothing.
            if !answer.is_empty() {
                if let Err(e) = conversations
                    .append_message(&conversation_id, Sender::Tutor, &answer)
                    .await
                {
                    error!(conversation_id = %conversation_id, error = %e, "failed to persist tutor answer");
                }
            }
        });

        Ok((conversation, out_rx))
    }

    /// Blocking counterpart of [`stream_answer`](Self::stream_answer):
    /// same retrieval, one-shot generation, full text plus provenance.
    /// Does not touch conversations.
    pub async fn answer(&self, question: &str, grade: i64) -> Result<(String, Vec<ScoredPassage>)> {
        let retrieved = self.retriever.answer_context(question, grade).await?;
        let prompt = build_prompt(question, grade, &retrieved.context);
        let text = self.generator.generate(&prompt).await?;
        Ok((text, retrieved.sources))
    }

    async fn resolve_conversation(
        &self,
        student_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<Conversation> {
        match conversation_id {
            Some(id) => {
                let conversation = self.conversations.get_conversation(id).await?;
                if conversation.student_id != student_id {
                    // Another student's thread looks the same as a missing
                    // one from the outside.
                    return Err(Error::NotFound(format!("conversation not found: {}", id)));
                }
                Ok(conversation)
            }
            None => self.conversations.create_conversation(student_id).await,
        }
    }
}

fn build_prompt(question: &str, grade: i64, context: &str) -> String {
    format!(
        "You are an expert tutor for grade {grade} students. \
         Use the following pieces of context to answer the question at the end. \
         If you don't know the answer from the context, say you don't know — do not make up an answer. \
         Provide a clear, concise, step-by-step explanation suitable for the student's level.\n\n\
         Context:\n{context}\n\n\
         Question: {question}\n\n\
         Helpful Answer:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_grade_context_and_question() {
        let prompt = build_prompt("What is inertia?", 9, "A body at rest stays at rest.");
        assert!(prompt.contains("grade 9"));
        assert!(prompt.contains("Context:\nA body at rest stays at rest."));
        assert!(prompt.contains("Question: What is inertia?"));
    }

    #[test]
    fn prompt_with_empty_context_still_has_sections() {
        let prompt = build_prompt("What is inertia?", 10, "");
        assert!(prompt.contains("Context:\n\n"));
        assert!(prompt.contains("Question: What is inertia?"));
    }
}
