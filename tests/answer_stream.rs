//! Streamed-answer behavior: ordering, persistence on completion, error
//! fragments, and client-disconnect accounting.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use common::{make_passage, setup, wait_for_tutor_message, ScriptedGenerator};

use lectern::answer::{AnswerEvent, AnswerStreamer};
use lectern::error::Error;
use lectern::generation::Generator;
use lectern::models::Sender;

fn streamer_with(env: &common::TestEnv, generator: Arc<dyn Generator>) -> AnswerStreamer {
    AnswerStreamer::new(env.retriever(), generator, env.conversations())
}

#[tokio::test]
async fn streamed_answer_is_persisted_as_one_tutor_message() {
    let env = setup().await;
    env.index()
        .upsert(&[make_passage("j_0", "Inertia resists changes in motion.", 9, 0)])
        .await
        .unwrap();

    let generator = Arc::new(ScriptedGenerator::new(&[
        "Inertia ",
        "is resistance ",
        "to change.",
    ]));
    let streamer = streamer_with(&env, generator);

    let (conversation, mut rx) = streamer
        .stream_answer("student-1", "What is inertia?", 9, None)
        .await
        .unwrap();

    let mut deltas = String::new();
    let mut done = false;
    while let Some(event) = rx.recv().await {
        match event {
            AnswerEvent::Delta(d) => deltas.push_str(&d),
            AnswerEvent::Done => done = true,
            AnswerEvent::Error(e) => panic!("unexpected error fragment: {}", e),
        }
    }
    assert!(done);
    assert_eq!(deltas, "Inertia is resistance to change.");

    let store = env.conversations();
    let tutor = wait_for_tutor_message(&store, &conversation.id)
        .await
        .expect("tutor message persisted");
    assert_eq!(tutor.content, "Inertia is resistance to change.");

    // Student question first, tutor answer second, in append order.
    let messages = store.list_messages(&conversation.id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].sender, Sender::Student);
    assert_eq!(messages[0].content, "What is inertia?");
    assert_eq!(messages[1].sender, Sender::Tutor);

    let refreshed = store.get_conversation(&conversation.id).await.unwrap();
    assert!(refreshed.updated_at >= tutor.created_at);
    assert!(refreshed.updated_at >= conversation.updated_at);
}

#[tokio::test]
async fn disconnect_after_three_fragments_persists_exactly_those_three() {
    let env = setup().await;

    let gate = Arc::new(Semaphore::new(3));
    let fragments: Vec<String> = (0..10).map(|i| format!("frag{} ", i)).collect();
    let generator = Arc::new(ScriptedGenerator {
        fragments,
        fail_after: None,
        gate: Some(gate.clone()),
    });
    let streamer = streamer_with(&env, generator);

    let (conversation, mut rx) = streamer
        .stream_answer("student-1", "What is inertia?", 9, None)
        .await
        .unwrap();

    // Consume three fragments, then hang up.
    let mut received = String::new();
    for _ in 0..3 {
        match rx.recv().await.unwrap() {
            AnswerEvent::Delta(d) => received.push_str(&d),
            other => panic!("expected a delta, got {:?}", other),
        }
    }
    drop(rx);

    // Let the generator keep producing into the dead stream.
    gate.add_permits(7);

    let store = env.conversations();
    let tutor = wait_for_tutor_message(&store, &conversation.id)
        .await
        .expect("partial answer persisted");
    assert_eq!(tutor.content, "frag0 frag1 frag2 ");
    assert_eq!(tutor.content, received);

    let messages = store.list_messages(&conversation.id).await.unwrap();
    assert_eq!(
        messages.iter().filter(|m| m.sender == Sender::Tutor).count(),
        1
    );
}

#[tokio::test]
async fn midstream_failure_emits_one_error_fragment_and_persists_the_partial() {
    let env = setup().await;

    let generator = Arc::new(ScriptedGenerator {
        fragments: vec!["Half ".to_string(), "an answer".to_string(), "never sent".to_string()],
        fail_after: Some(2),
        gate: None,
    });
    let streamer = streamer_with(&env, generator);

    let (conversation, mut rx) = streamer
        .stream_answer("student-1", "What is inertia?", 9, None)
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(events.len(), 3);
    assert_eq!(events[0], AnswerEvent::Delta("Half ".to_string()));
    assert_eq!(events[1], AnswerEvent::Delta("an answer".to_string()));
    assert!(matches!(events[2], AnswerEvent::Error(_)));

    let tutor = wait_for_tutor_message(&env.conversations(), &conversation.id)
        .await
        .expect("partial answer persisted");
    assert_eq!(tutor.content, "Half an answer");
}

#[tokio::test]
async fn failure_before_any_fragment_persists_no_tutor_message() {
    let env = setup().await;

    let generator = Arc::new(ScriptedGenerator {
        fragments: vec!["never".to_string()],
        fail_after: Some(0),
        gate: None,
    });
    let streamer = streamer_with(&env, generator);

    let (conversation, mut rx) = streamer
        .stream_answer("student-1", "What is inertia?", 9, None)
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], AnswerEvent::Error(_)));

    // Only the student's question is on record.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let messages = env
        .conversations()
        .list_messages(&conversation.id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender, Sender::Student);
}

#[tokio::test]
async fn follow_up_questions_reuse_the_conversation() {
    let env = setup().await;
    let generator = Arc::new(ScriptedGenerator::new(&["answer one"]));
    let streamer = streamer_with(&env, generator);

    let (conversation, mut rx) = streamer
        .stream_answer("student-1", "First question?", 9, None)
        .await
        .unwrap();
    while rx.recv().await.is_some() {}
    wait_for_tutor_message(&env.conversations(), &conversation.id)
        .await
        .unwrap();

    let (same, mut rx) = streamer
        .stream_answer("student-1", "Second question?", 9, Some(&conversation.id))
        .await
        .unwrap();
    assert_eq!(same.id, conversation.id);
    while rx.recv().await.is_some() {}

    for _ in 0..200 {
        let count = env
            .conversations()
            .list_messages(&conversation.id)
            .await
            .unwrap()
            .len();
        if count == 4 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected 4 messages in the conversation");
}

#[tokio::test]
async fn another_students_conversation_is_not_found() {
    let env = setup().await;
    let generator = Arc::new(ScriptedGenerator::new(&["answer"]));
    let streamer = streamer_with(&env, generator);

    let theirs = env
        .conversations()
        .create_conversation("student-2")
        .await
        .unwrap();

    let err = streamer
        .stream_answer("student-1", "Question?", 9, Some(&theirs.id))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn empty_store_still_generates_from_an_empty_context() {
    let env = setup().await;
    let generator = Arc::new(ScriptedGenerator::new(&["I don't know."]));
    let streamer = streamer_with(&env, generator);

    let (text, sources) = streamer.answer("What is inertia?", 9).await.unwrap();
    assert_eq!(text, "I don't know.");
    assert!(sources.is_empty());
}

#[tokio::test]
async fn blocking_answer_returns_text_with_provenance() {
    let env = setup().await;
    env.index()
        .upsert(&[
            make_passage("j_0", "Inertia is resistance to change in motion.", 9, 0),
            make_passage("j_1", "Mass measures inertia.", 9, 1),
        ])
        .await
        .unwrap();

    let generator = Arc::new(ScriptedGenerator::new(&["Inertia is resistance."]));
    let streamer = streamer_with(&env, generator);

    let (text, sources) = streamer.answer("What is inertia?", 9).await.unwrap();
    assert_eq!(text, "Inertia is resistance.");
    assert_eq!(sources.len(), 2);
}

#[tokio::test]
async fn blocking_answer_propagates_generation_failure() {
    let env = setup().await;
    let generator = Arc::new(ScriptedGenerator {
        fragments: vec!["x".to_string()],
        fail_after: Some(0),
        gate: None,
    });
    let streamer = streamer_with(&env, generator);

    let err = streamer.answer("What is inertia?", 9).await.unwrap_err();
    assert!(matches!(err, Error::ExternalService(_)));
}
