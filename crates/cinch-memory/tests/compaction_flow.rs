//! End-to-end flow: prepare → compact → recall → prepare, against real stores.

use cinch_memory::context::compaction::{CompactionEngine, CompactionSettings, recall_instruction};
use cinch_memory::context::segment_turns;
use cinch_memory::prelude::*;
use cinch_memory::tools::{PIN_TOOL_NAME, RECALL_TOOL_NAME};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn turn(i: usize, bytes: usize) -> Vec<Message> {
    vec![
        Message::assistant_tool_calls(vec![ToolCall::new(
            format!("call_{i}"),
            "read_file",
            format!(r#"{{"path":"src/f{i}.rs"}}"#),
        )])
        .with_reasoning(format!("look at file {i}")),
        Message::tool_result(format!("call_{i}"), "y".repeat(bytes)).with_name("read_file"),
        Message::assistant_text(format!("File {i} reviewed.")),
    ]
}

fn counting_summarizer(calls: Arc<AtomicUsize>) -> Arc<dyn Summarize> {
    Arc::new(FnSummarizer::new(move |_, _, _| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok(format!("reviewed a source file, pass {n}")) }
    }))
}

/// 27 kB task description, five turns of 10/8/30/40/5 kB, then a short
/// protected tail: about 120 kB in total.
fn scenario_messages() -> Vec<Message> {
    let mut messages = vec![Message::user("z".repeat(27_000))];
    for (i, bytes) in [10_000, 8_000, 30_000, 40_000, 5_000].into_iter().enumerate() {
        messages.extend(turn(i, bytes));
    }
    messages.push(Message::user("anything else?"));
    messages.push(Message::assistant_text("No."));
    messages
}

fn scenario_settings() -> CompactionSettings {
    CompactionSettings {
        conversation_threshold: 80_000,
        message_threshold: 1_000_000,
        protected_recent: 2,
        summarization_model: "cheap/model".into(),
        summarization_prompt: "Summarize in at most 20 words.".into(),
        force: false,
    }
}

#[test]
fn segmentation_of_a_single_tool_turn() {
    let messages = vec![
        Message::system("sys"),
        Message::user("go"),
        Message::assistant_tool_calls(vec![ToolCall::new("c1", "ls", "{}")]),
        Message::tool_result("c1", "a.rs"),
        Message::assistant_text("done"),
    ];
    let turns = segment_turns(&messages);
    assert_eq!(turns.len(), 1);
    assert_eq!((turns[0].start, turns[0].end), (2, 4));
}

#[tokio::test]
async fn scenario_compacts_three_oldest_turns_then_stops() {
    let store = Arc::new(MemoryStore::in_memory().unwrap());
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = CompactionEngine::new(store.clone(), counting_summarizer(calls.clone()));

    let mut messages = scenario_messages();
    let original = messages.clone();
    let schemas: Vec<ToolDef> = Vec::new();

    let outcome = engine
        .compact(&mut messages, Some(schemas.as_slice()), &scenario_settings())
        .await;

    assert!((115_000..125_000).contains(&outcome.chars_before), "{}", outcome.chars_before);
    assert_eq!(outcome.memory_ids().len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(outcome.chars_after <= 80_000);
    assert!(outcome.chars_after > 60_000);
    assert_eq!(store.len().unwrap(), 3);

    // Turns 4 and 5 and the tail are untouched.
    assert_eq!(messages[10..], original[10..]);
    // Each compacted turn is a well-formed placeholder followed by shells.
    for (k, id) in outcome.memory_ids().into_iter().enumerate() {
        let first = &messages[1 + 3 * k];
        assert!(first.text().contains(id));
        assert!(first.text().contains(&recall_instruction(id)));
        assert!(first.reasoning.is_none() && first.tool_calls.is_none());
        assert!(messages[2 + 3 * k].is_empty_shell());
        assert!(messages[3 + 3 * k].is_empty_shell());
    }
}

#[tokio::test]
async fn prepare_recall_prepare_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = MemoryConfig::default()
        .with_store_path(dir.path().join("memory.redb"))
        .with_context_window(2_000);
    let calls = Arc::new(AtomicUsize::new(0));
    let profile = ContextProfile::build(
        ProfileKind::Memory,
        config,
        "openrouter",
        "acme/model",
        counting_summarizer(calls),
    )
    .unwrap();
    let memory = profile.as_memory().unwrap();
    memory.set_tool_schemas(profile.tools().definitions());

    let mut messages = vec![Message::user("review the crate")];
    messages.extend(turn(0, 2_000));
    messages.extend(turn(1, 2_000));
    messages.extend(turn(2, 2_000));
    messages.push(Message::user("summarize"));
    messages.push(Message::assistant_text("ok"));
    let first_turn = messages[1..4].to_vec();
    let conv = Arc::new(SharedConversation::new(messages));

    // First prepare compacts at least the oldest turn.
    let outcome = profile.prepare(conv.as_ref()).await;
    assert!(outcome.mutated);
    let pass = outcome.compaction.unwrap();
    let id = pass.memory_ids()[0].to_string();
    let placeholder_at = conv
        .messages()
        .iter()
        .position(|m| m.text().contains(&recall_instruction(&id)))
        .unwrap();
    assert_eq!(placeholder_at, 1);

    // Second prepare without new messages changes nothing.
    let entries = memory.store().len().unwrap();
    let again = profile.prepare(conv.as_ref()).await;
    assert!(!again.mutated);
    assert_eq!(again.messages, conv.messages());
    assert_eq!(memory.store().len().unwrap(), entries);

    // Recall restores the exact original messages.
    let ctx = ToolContext::new().with_conversation(conv.clone());
    let raw = profile
        .tools()
        .execute(RECALL_TOOL_NAME, &ctx, &format!(r#"{{"memory_id":"{id}"}}"#))
        .await;
    let response: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(response["status"], "ok");
    assert_eq!(response["messages_restored"], 3);
    assert!(!raw.contains("yyyy"));

    let restored = conv.messages();
    assert_eq!(
        serde_json::to_vec(&restored[1..4]).unwrap(),
        serde_json::to_vec(&first_turn).unwrap()
    );

    // Recall deferred exactly one pass.
    assert!(profile.prepare(conv.as_ref()).await.compaction.is_none());
    profile.after_response(conv.as_ref());
    assert!(profile.prepare(conv.as_ref()).await.compaction.is_some());

    // Two passes ran; the skipped and below-threshold prepares left no record.
    assert_eq!(memory.compaction_history().len(), 2);
    assert_eq!(memory.store().load_compaction_events(10).unwrap().len(), 2);
}

#[tokio::test]
async fn protected_tail_survives_forced_compaction() {
    let store = Arc::new(MemoryStore::in_memory().unwrap());
    let engine = CompactionEngine::new(store, counting_summarizer(Arc::new(AtomicUsize::new(0))));

    let mut messages = scenario_messages();
    let original = messages.clone();
    let settings = CompactionSettings {
        force: true,
        protected_recent: 4,
        ..scenario_settings()
    };
    engine.compact(&mut messages, None, &settings).await;

    let boundary = messages.len() - 4;
    assert_eq!(messages[boundary..], original[boundary..]);
}

#[tokio::test]
async fn pin_ceiling_through_tools() {
    let dir = tempfile::tempdir().unwrap();
    let config = MemoryConfig::default().with_store_path(dir.path().join("memory.redb"));
    let profile = MemoryProfile::new(
        config,
        "openrouter",
        "acme/model",
        counting_summarizer(Arc::new(AtomicUsize::new(0))),
    )
    .unwrap();
    for i in 0..6 {
        profile
            .store()
            .put(&MemoryEntry::new(format!("mem_{i}"), "content", "summary", "placeholder"))
            .unwrap();
    }

    let tools = profile.tools();
    let ctx = ToolContext::new();
    for i in 0..5 {
        let raw = tools
            .execute(PIN_TOOL_NAME, &ctx, &format!(r#"{{"memory_id":"mem_{i}"}}"#))
            .await;
        assert!(raw.contains("\"pinned\":true"), "{raw}");
    }

    let raw = tools
        .execute(PIN_TOOL_NAME, &ctx, r#"{"memory_id":"mem_5"}"#)
        .await;
    assert!(raw.contains("pin_limit_exceeded"), "{raw}");
    assert!(!profile.store().get("mem_5").unwrap().pinned);

    tools
        .execute(PIN_TOOL_NAME, &ctx, r#"{"memory_id":"mem_0","pin":false}"#)
        .await;
    let raw = tools
        .execute(PIN_TOOL_NAME, &ctx, r#"{"memory_id":"mem_5"}"#)
        .await;
    assert!(raw.contains("\"pinned\":true"), "{raw}");
    assert_eq!(profile.store().pinned_count().unwrap(), 5);
}

#[test]
fn zero_byte_store_is_recreated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.redb");
    std::fs::write(&path, b"").unwrap();

    let store = MemoryStore::open(&path).unwrap();
    store
        .put(&MemoryEntry::new("mem_a", "content", "summary", "placeholder"))
        .unwrap();
    let entry = store.access("mem_a", MemoryEntry::touch).unwrap();
    assert_eq!(entry.summary, "summary");
    drop(store);

    let reopened = MemoryStore::open(&path).unwrap();
    assert_eq!(reopened.len().unwrap(), 1);
}
