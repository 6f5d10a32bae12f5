//! End-to-end scenarios against stub collaborators

mod common;

use common::{MemoryUploader, StubBackend, TestWorkspace};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use imageforge::GeneratorError;

fn read_state(run_dir: &Path) -> serde_json::Value {
    let raw = std::fs::read_to_string(run_dir.join("run_state.json")).unwrap();
    serde_json::from_str(&raw).unwrap()
}

fn plan_prompts(state: &serde_json::Value) -> Vec<Option<String>> {
    state["plan"]["groups"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["prompt"].as_str().map(str::to_string))
        .collect()
}

/// Five groups over a two-prompt pool: the run completes, every group gets a
/// prompt different from its predecessor, all groups are recorded complete,
/// and the task count equals images_per_group x group_count.
#[tokio::test]
async fn scene_run_completes_with_adjacent_prompt_constraint() {
    let workspace = TestWorkspace::new(6, 2);
    let template = workspace.scene_template(5, 2);
    let backend = Arc::new(StubBackend::succeeding());
    let uploader = Arc::new(MemoryUploader::new());

    let orchestrator =
        workspace.orchestrator(template, backend.clone(), uploader.clone(), None);
    let result = orchestrator.run(false, true).await.unwrap();

    assert_eq!(result.total_groups, 5);
    assert_eq!(result.completed_groups, 5);
    assert_eq!(result.total_images, 10);
    assert_eq!(result.successful_images, 10);
    assert_eq!(result.failed_images, 0);
    assert_eq!(backend.submit_count(), 10);

    let state = read_state(&result.run_dir);
    assert_eq!(state["completed_groups"].as_object().unwrap().len(), 5);

    let prompts = plan_prompts(&state);
    assert_eq!(prompts.len(), 5);
    for pair in prompts.windows(2) {
        assert!(pair[0].is_some());
        assert_ne!(pair[0], pair[1], "adjacent groups shared a prompt");
    }

    // Generated files land in numbered group directories.
    for group_num in 1..=5 {
        let group_dir = result.run_dir.join(format!("group_{:02}", group_num));
        assert!(group_dir.join("image_01.png").exists());
        assert!(group_dir.join("image_02.png").exists());
        assert!(group_dir.join("result.json").exists());
    }
    assert!(result.run_dir.join("generation_log.json").exists());

    // Six distinct products at most, each uploaded once.
    assert!(uploader.upload_count() <= 6);
}

/// Dropping two groups from a completed run's ledger and resuming executes
/// exactly those two groups, replays the persisted plan, and ends 5/5.
#[tokio::test]
async fn resume_executes_only_unfinished_groups() {
    let workspace = TestWorkspace::new(6, 2);
    let template = workspace.scene_template(5, 2);

    let first_backend = Arc::new(StubBackend::succeeding());
    let orchestrator = workspace.orchestrator(
        template.clone(),
        first_backend.clone(),
        Arc::new(MemoryUploader::new()),
        None,
    );
    let first = orchestrator.run(false, true).await.unwrap();
    assert_eq!(first.completed_groups, 5);
    let original_plan = plan_prompts(&read_state(&first.run_dir));

    // Simulate a crash after group 2: forget groups 3 and 4.
    let state_file = first.run_dir.join("run_state.json");
    let mut state: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&state_file).unwrap()).unwrap();
    let completed = state["completed_groups"].as_object_mut().unwrap();
    let kept: BTreeMap<String, serde_json::Value> = completed
        .iter()
        .filter(|(k, _)| k.as_str() < "3")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    *completed = kept.into_iter().collect();
    std::fs::write(&state_file, serde_json::to_string_pretty(&state).unwrap()).unwrap();

    let resume_backend = Arc::new(StubBackend::succeeding());
    let resume_uploader = Arc::new(MemoryUploader::new());
    let orchestrator = workspace.orchestrator(
        PathBuf::new(),
        resume_backend.clone(),
        resume_uploader.clone(),
        None,
    );
    let resumed = orchestrator.resume(&first.run_dir, true).await.unwrap();

    // Only groups 3 and 4 re-executed: 2 groups x 2 images.
    assert_eq!(resume_backend.submit_count(), 4);
    assert_eq!(resumed.completed_groups, 5);
    assert_eq!(resumed.total_groups, 5);
    assert_eq!(resumed.total_images, 4);

    // Resume re-uploads assets (the cache is per-run) but never re-plans.
    assert!(resume_uploader.upload_count() > 0);
    assert_eq!(plan_prompts(&read_state(&first.run_dir)), original_plan);
}

#[tokio::test]
async fn resuming_a_fully_complete_run_issues_no_tasks() {
    let workspace = TestWorkspace::new(4, 2);
    let template = workspace.scene_template(2, 1);

    let orchestrator = workspace.orchestrator(
        template,
        Arc::new(StubBackend::succeeding()),
        Arc::new(MemoryUploader::new()),
        None,
    );
    let first = orchestrator.run(false, true).await.unwrap();

    let backend = Arc::new(StubBackend::succeeding());
    let orchestrator = workspace.orchestrator(
        PathBuf::new(),
        backend.clone(),
        Arc::new(MemoryUploader::new()),
        None,
    );
    let resumed = orchestrator.resume(&first.run_dir, true).await.unwrap();

    assert_eq!(backend.submit_count(), 0);
    assert_eq!(resumed.completed_groups, 2);
}

#[tokio::test]
async fn corrupted_state_is_fatal_on_resume() {
    let workspace = TestWorkspace::new(2, 1);
    let run_dir = workspace.root().join("outputs/run_broken");
    std::fs::create_dir_all(&run_dir).unwrap();
    std::fs::write(run_dir.join("run_state.json"), "{definitely not json").unwrap();

    let orchestrator = workspace.orchestrator(
        PathBuf::new(),
        Arc::new(StubBackend::succeeding()),
        Arc::new(MemoryUploader::new()),
        None,
    );
    let err = orchestrator.resume(&run_dir, true).await.unwrap_err();
    assert!(matches!(err, GeneratorError::StateCorruption { .. }));
}

#[tokio::test]
async fn unknown_specified_product_aborts_before_dispatch() {
    let workspace = TestWorkspace::new(3, 1);
    let template = workspace.write_template(serde_json::json!({
        "name": "bad-pin",
        "mode": "scene_generation",
        "group_count": 2,
        "images_per_group": 1,
        "product_images": {
            "source_dir": "assets/products",
            "specified_images": ["ghost.png"]
        },
        "prompts": { "source_dir": "assets/prompts" },
        "output": { "base_dir": "outputs" }
    }));

    let backend = Arc::new(StubBackend::succeeding());
    let orchestrator = workspace.orchestrator(
        template,
        backend.clone(),
        Arc::new(MemoryUploader::new()),
        None,
    );
    let err = orchestrator.run(false, true).await.unwrap_err();
    assert!(matches!(err, GeneratorError::Configuration { .. }));
    assert_eq!(backend.submit_count(), 0);
}

#[tokio::test]
async fn dry_run_validates_without_generating() {
    let workspace = TestWorkspace::new(3, 2);
    let template = workspace.scene_template(2, 1);
    let backend = Arc::new(StubBackend::succeeding());
    let uploader = Arc::new(MemoryUploader::new());

    let orchestrator = workspace.orchestrator(template, backend.clone(), uploader.clone(), None);
    let result = orchestrator.run(true, true).await.unwrap();

    assert_eq!(result.completed_groups, 0);
    assert_eq!(result.total_images, 0);
    assert_eq!(backend.submit_count(), 0);
    assert_eq!(uploader.upload_count(), 0);
    // No run directory is created for a dry run.
    assert!(!workspace.root().join("outputs").exists());
}

/// Task failures stay per-task: the run finishes with a summary counting the
/// failures instead of aborting sibling tasks or other groups.
#[tokio::test]
async fn task_failures_do_not_abort_the_run() {
    let workspace = TestWorkspace::new(6, 2);
    let template = workspace.scene_template(3, 2);
    // Enough failures that every task exhausts its retry budget.
    let backend = Arc::new(StubBackend::flaky(1_000));
    let orchestrator = workspace.orchestrator(
        template,
        backend.clone(),
        Arc::new(MemoryUploader::new()),
        None,
    );

    let result = orchestrator.run(false, true).await.unwrap();
    assert_eq!(result.total_groups, 3);
    assert_eq!(result.completed_groups, 3);
    assert_eq!(result.total_images, 6);
    assert_eq!(result.failed_images, 6);
    assert_eq!(result.successful_images, 0);
}
