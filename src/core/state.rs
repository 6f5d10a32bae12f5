//! Durable, resumable progress ledger for a batch run
//!
//! Every mutation is written to the state file before the call returns, so a
//! crash between two group completions loses at most the in-flight group.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::allocation::AllocationPlan;
use crate::error::{GeneratorError, GeneratorResult};
use crate::models::GroupResult;

const STATE_FILE_NAME: &str = "run_state.json";

/// Persisted run progress. Completed groups are stored as opaque payloads so
/// older state files stay loadable across result-shape changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub template_path: String,
    pub started_at: DateTime<Utc>,
    pub plan: AllocationPlan,
    #[serde(default)]
    pub completed_groups: BTreeMap<usize, serde_json::Value>,
    #[serde(default)]
    pub current_group: Option<usize>,
}

/// Owns the state file for one run directory.
pub struct StateManager {
    state_file: PathBuf,
    state: Mutex<Option<RunState>>,
}

impl StateManager {
    pub fn new(run_dir: &Path) -> Self {
        Self {
            state_file: run_dir.join(STATE_FILE_NAME),
            state: Mutex::new(None),
        }
    }

    /// Load a previous run's state.
    ///
    /// An absent file means a fresh run; a file that exists but does not
    /// parse is fatal — guessing would risk re-running completed groups.
    pub async fn load(&self) -> GeneratorResult<Option<RunState>> {
        if !self.state_file.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.state_file)?;
        let loaded: RunState =
            serde_json::from_str(&raw).map_err(|_| GeneratorError::StateCorruption {
                path: self.state_file.display().to_string(),
            })?;
        tracing::info!(
            "loaded state: {} groups already complete",
            loaded.completed_groups.len()
        );
        let mut state = self.state.lock().await;
        *state = Some(loaded.clone());
        Ok(Some(loaded))
    }

    /// Initialize and persist a fresh run state.
    pub async fn initialize(
        &self,
        template_path: String,
        plan: AllocationPlan,
    ) -> GeneratorResult<RunState> {
        let fresh = RunState {
            run_id: Uuid::new_v4(),
            template_path,
            started_at: Utc::now(),
            plan,
            completed_groups: BTreeMap::new(),
            current_group: None,
        };
        let mut state = self.state.lock().await;
        persist(&self.state_file, &fresh)?;
        *state = Some(fresh.clone());
        Ok(fresh)
    }

    pub async fn mark_group_started(&self, group_index: usize) -> GeneratorResult<()> {
        let mut state = self.state.lock().await;
        let state = state
            .as_mut()
            .ok_or_else(|| GeneratorError::config("run state not initialized"))?;
        state.current_group = Some(group_index);
        persist(&self.state_file, state)
    }

    /// Record a group's completion and persist before returning.
    pub async fn mark_group_complete(
        &self,
        group_index: usize,
        result: &GroupResult,
    ) -> GeneratorResult<()> {
        let payload = serde_json::to_value(result)?;
        let mut state = self.state.lock().await;
        let state = state
            .as_mut()
            .ok_or_else(|| GeneratorError::config("run state not initialized"))?;
        state.completed_groups.insert(group_index, payload);
        state.current_group = None;
        persist(&self.state_file, state)?;
        tracing::info!("[group {}] ✅ complete, state saved", group_index + 1);
        Ok(())
    }

    pub async fn is_group_complete(&self, group_index: usize) -> bool {
        let state = self.state.lock().await;
        state
            .as_ref()
            .map(|s| s.completed_groups.contains_key(&group_index))
            .unwrap_or(false)
    }

    pub async fn completed_count(&self) -> usize {
        let state = self.state.lock().await;
        state.as_ref().map(|s| s.completed_groups.len()).unwrap_or(0)
    }

    pub async fn snapshot(&self) -> Option<RunState> {
        let state = self.state.lock().await;
        state.clone()
    }
}

fn persist(state_file: &Path, state: &RunState) -> GeneratorResult<()> {
    if let Some(parent) = state_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let serialized = serde_json::to_string_pretty(state)?;
    std::fs::write(state_file, serialized)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::allocation::GroupAssignment;
    use crate::models::ImageResult;

    fn empty_plan(group_count: usize) -> AllocationPlan {
        AllocationPlan {
            groups: (0..group_count)
                .map(|_| GroupAssignment {
                    prompt: Some(PathBuf::from("p.txt")),
                    reference: None,
                    use_specified_products: false,
                })
                .collect(),
        }
    }

    fn group_result(group_index: usize) -> GroupResult {
        GroupResult {
            group_index,
            group_dir: PathBuf::from(format!("group_{:02}", group_index + 1)),
            product_images: vec![PathBuf::from("a.png")],
            reference_image: None,
            prompt_template: "p.txt".to_string(),
            prompt_rendered: "a prompt".to_string(),
            images: vec![ImageResult {
                index: 0,
                output_path: PathBuf::from("image_01.png"),
                task_id: "t-1".to_string(),
                prompt: "a prompt".to_string(),
                input_images: vec!["https://cdn.test/a".to_string()],
                success: true,
                error: None,
            }],
            text: None,
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn completed_groups_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StateManager::new(dir.path());
        manager
            .initialize("template.json".to_string(), empty_plan(5))
            .await
            .unwrap();

        for index in 0..3 {
            manager
                .mark_group_complete(index, &group_result(index))
                .await
                .unwrap();
        }

        // Fresh manager over the same directory, as a resumed process.
        let reloaded = StateManager::new(dir.path());
        let state = reloaded.load().await.unwrap().expect("state present");
        assert_eq!(state.completed_groups.len(), 3);
        assert_eq!(state.plan.groups.len(), 5);
        for index in 0..3 {
            assert!(reloaded.is_group_complete(index).await);
        }
        assert!(!reloaded.is_group_complete(3).await);
        assert!(!reloaded.is_group_complete(4).await);
    }

    #[tokio::test]
    async fn absent_state_file_is_a_fresh_run() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StateManager::new(dir.path());
        assert!(manager.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupted_state_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STATE_FILE_NAME), "{not json").unwrap();

        let manager = StateManager::new(dir.path());
        let err = manager.load().await.unwrap_err();
        assert!(matches!(err, GeneratorError::StateCorruption { .. }));
    }

    #[tokio::test]
    async fn mark_started_tracks_in_flight_group() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StateManager::new(dir.path());
        manager
            .initialize("template.json".to_string(), empty_plan(2))
            .await
            .unwrap();
        manager.mark_group_started(1).await.unwrap();

        let state = manager.snapshot().await.unwrap();
        assert_eq!(state.current_group, Some(1));

        manager
            .mark_group_complete(1, &group_result(1))
            .await
            .unwrap();
        let state = manager.snapshot().await.unwrap();
        assert_eq!(state.current_group, None);
    }
}
