//! Tests for the in-memory and JSONL state providers

use std::io::Write;

use async_trait::async_trait;
use prometheus_browser_pool::core::{
    BrowserCommand, Command, CommandProblem, Dependencies, StateError, StateProvider,
};
use prometheus_browser_pool::infra::{CommandRegistry, InMemoryStateProvider, JsonlStateProvider};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Screenshot {
    url: String,
}

#[async_trait]
impl BrowserCommand<()> for Screenshot {
    async fn execute(
        &self,
        _browser: &(),
        _cancel: &CancellationToken,
        _deps: &Dependencies,
        _run_number: u32,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn payload(&self) -> Option<serde_json::Value> {
        serde_json::to_value(self).ok()
    }
}

/// No payload, so it cannot be written to disk.
struct Ephemeral;

#[async_trait]
impl BrowserCommand<()> for Ephemeral {
    async fn execute(
        &self,
        _browser: &(),
        _cancel: &CancellationToken,
        _deps: &Dependencies,
        _run_number: u32,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

fn shot(url: &str) -> Command<()> {
    Command::new(Screenshot {
        url: url.to_string(),
    })
}

fn registry() -> CommandRegistry<()> {
    CommandRegistry::new().with::<Screenshot>()
}

// ============================================================================
// IN-MEMORY
// ============================================================================

#[tokio::test]
async fn test_memory_provider_loads_oldest_first_up_to_limit() {
    let state = InMemoryStateProvider::<()>::new();
    let first = shot("https://1.test");
    let first_id = first.id();
    state.save_command(first).await.unwrap();
    let rejected = state
        .save_commands(vec![shot("https://2.test"), shot("https://3.test")])
        .await;
    assert!(rejected.is_empty());

    let loaded = state.load_commands(Some(2)).await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].id(), first_id);
    assert_eq!(state.saved_len(), 1);

    let rest = state.load_commands(None).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(state.saved_len(), 0);
}

#[tokio::test]
async fn test_memory_provider_keeps_problem_reason() {
    let state = InMemoryStateProvider::<()>::new();
    state
        .save_problem_command(shot("https://x.test"), CommandProblem::OperationCancelled)
        .await
        .unwrap();

    let problems = state.problems();
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].1, CommandProblem::OperationCancelled);
    assert!(state.load_commands(None).await.unwrap().is_empty());
}

// ============================================================================
// JSONL
// ============================================================================

#[tokio::test]
async fn test_jsonl_round_trip_preserves_identity() {
    let dir = tempfile::tempdir().unwrap();
    let state = JsonlStateProvider::open(dir.path(), registry()).unwrap();
    let original = Command::restore(
        prometheus_browser_pool::util::new_id(),
        2,
        std::sync::Arc::new(Screenshot {
            url: "https://keep.test".into(),
        }),
    );
    let id = original.id();
    state.save_command(original).await.unwrap();

    let reopened = JsonlStateProvider::open(dir.path(), registry()).unwrap();
    let loaded = reopened.load_commands(None).await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id(), id);
    assert_eq!(loaded[0].runs(), 2);
    assert_eq!(
        loaded[0].payload(),
        Some(serde_json::json!({ "url": "https://keep.test" }))
    );
    assert!(reopened.pending().unwrap().is_empty());
}

#[tokio::test]
async fn test_jsonl_limit_leaves_remainder_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let state = JsonlStateProvider::open(dir.path(), registry()).unwrap();
    let rejected = state
        .save_commands(vec![shot("https://1.test"), shot("https://2.test"), shot("https://3.test")])
        .await;
    assert!(rejected.is_empty());

    let loaded = state.load_commands(Some(2)).await.unwrap();
    assert_eq!(loaded.len(), 2);
    let pending = state.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload, Some(serde_json::json!({ "url": "https://3.test" })));
}

#[tokio::test]
async fn test_jsonl_rejects_commands_without_payload() {
    let dir = tempfile::tempdir().unwrap();
    let state = JsonlStateProvider::open(dir.path(), registry()).unwrap();

    let err = state.save_command(Command::new(Ephemeral)).await.unwrap_err();
    assert!(matches!(err, StateError::NotPersistable(_)));
    assert!(state.pending().unwrap().is_empty());
}

#[tokio::test]
async fn test_jsonl_batch_stores_what_it_can_and_hands_back_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let state = JsonlStateProvider::open(dir.path(), registry()).unwrap();
    let ephemeral = Command::new(Ephemeral);
    let ephemeral_id = ephemeral.id();

    let rejected = state
        .save_commands(vec![shot("https://1.test"), ephemeral, shot("https://2.test")])
        .await;

    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].command.id(), ephemeral_id);
    assert!(matches!(rejected[0].error, StateError::NotPersistable(_)));
    let pending = state.pending().unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[1].payload, Some(serde_json::json!({ "url": "https://2.test" })));
}

#[tokio::test]
async fn test_jsonl_load_swaps_file_without_leftovers() {
    let dir = tempfile::tempdir().unwrap();
    let state = JsonlStateProvider::open(dir.path(), registry()).unwrap();
    for url in ["https://1.test", "https://2.test", "https://3.test"] {
        state.save_command(shot(url)).await.unwrap();
    }

    assert_eq!(state.load_commands(Some(1)).await.unwrap().len(), 1);

    let mut names: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    assert_eq!(names, vec!["commands.jsonl"]);
    assert_eq!(state.pending().unwrap().len(), 2);
}

#[tokio::test]
async fn test_jsonl_problem_sink_accepts_anything() {
    let dir = tempfile::tempdir().unwrap();
    let state = JsonlStateProvider::open(dir.path(), registry()).unwrap();

    state
        .save_problem_command(Command::new(Ephemeral), CommandProblem::TooManyRuns)
        .await
        .unwrap();

    let problems = state.problems().unwrap();
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].problem, Some(CommandProblem::TooManyRuns));
    assert_eq!(problems[0].payload, None);
}

#[tokio::test]
async fn test_jsonl_skips_unknown_kinds_but_keeps_them() {
    let dir = tempfile::tempdir().unwrap();
    let state = JsonlStateProvider::open(dir.path(), registry()).unwrap();
    state.save_command(shot("https://known.test")).await.unwrap();

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(dir.path().join("commands.jsonl"))
        .unwrap();
    writeln!(
        file,
        r#"{{"id":"{}","kind":"retired.Command","runs":0,"payload":{{}}}}"#,
        prometheus_browser_pool::util::new_id()
    )
    .unwrap();

    let loaded = state.load_commands(None).await.unwrap();
    assert_eq!(loaded.len(), 1);
    let pending = state.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind, "retired.Command");
}

#[test]
fn test_problem_reasons_serialize_with_stable_names() {
    assert_eq!(
        serde_json::to_string(&CommandProblem::TooManyRuns).unwrap(),
        "\"too-many-attempts\""
    );
    assert_eq!(
        serde_json::to_string(&CommandProblem::OperationCancelled).unwrap(),
        "\"cancelled\""
    );
}
