//! Run directory layout and artifact writing

use chrono::Local;
use std::path::{Path, PathBuf};

use crate::error::GeneratorResult;
use crate::models::{GenerationLog, GroupResult, TextResult};

const GROUP_RESULT_FILE: &str = "result.json";
const GENERATION_LOG_FILE: &str = "generation_log.json";
const TEXT_FILE: &str = "copy.txt";

/// Creates the run's directory tree and writes its artifacts.
pub struct OutputManager {
    base_dir: PathBuf,
}

impl OutputManager {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Create a fresh timestamped run directory under the base dir.
    pub fn create_run_directory(&self) -> GeneratorResult<PathBuf> {
        let name = format!("run_{}", Local::now().format("%Y%m%d_%H%M%S"));
        let run_dir = self.base_dir.join(name);
        std::fs::create_dir_all(&run_dir)?;
        Ok(run_dir)
    }

    pub fn create_group_dir(&self, run_dir: &Path, group_num: usize) -> GeneratorResult<PathBuf> {
        let group_dir = run_dir.join(format!("group_{:02}", group_num));
        std::fs::create_dir_all(&group_dir)?;
        Ok(group_dir)
    }

    pub fn image_path(&self, group_dir: &Path, image_num: usize, extension: &str) -> PathBuf {
        group_dir.join(format!("image_{:02}.{}", image_num, extension))
    }

    pub fn save_group_result(&self, result: &GroupResult) -> GeneratorResult<()> {
        let serialized = serde_json::to_string_pretty(result)?;
        std::fs::write(result.group_dir.join(GROUP_RESULT_FILE), serialized)?;
        Ok(())
    }

    /// Write the group's generated copy, with the user's tags appended.
    pub fn save_text(
        &self,
        group_dir: &Path,
        text: &TextResult,
        tags: &[String],
    ) -> GeneratorResult<()> {
        let mut body = format!("Title: {}\n\n{}\n", text.title, text.content);
        if !tags.is_empty() {
            let tag_line = tags
                .iter()
                .map(|t| format!("#{}", t))
                .collect::<Vec<_>>()
                .join(" ");
            body.push_str(&format!("\n{}\n", tag_line));
        }
        std::fs::write(group_dir.join(TEXT_FILE), body)?;
        Ok(())
    }

    pub fn save_generation_log(&self, run_dir: &Path, log: &GenerationLog) -> GeneratorResult<()> {
        let serialized = serde_json::to_string_pretty(log)?;
        std::fs::write(run_dir.join(GENERATION_LOG_FILE), serialized)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_paths_are_numbered_per_group() {
        let output = OutputManager::new(PathBuf::from("/tmp/out"));
        let path = output.image_path(Path::new("/tmp/out/run_x/group_01"), 3, "png");
        assert_eq!(
            path,
            PathBuf::from("/tmp/out/run_x/group_01/image_03.png")
        );
    }

    #[test]
    fn text_file_appends_configured_tags() {
        let dir = tempfile::tempdir().unwrap();
        let output = OutputManager::new(dir.path().to_path_buf());
        let text = TextResult {
            title: "Morning glow".to_string(),
            content: "A light serum for daily use.".to_string(),
            success: true,
            error: None,
        };
        output
            .save_text(dir.path(), &text, &["skincare".to_string(), "serum".to_string()])
            .unwrap();

        let written = std::fs::read_to_string(dir.path().join(TEXT_FILE)).unwrap();
        assert!(written.contains("Title: Morning glow"));
        assert!(written.ends_with("#skincare #serum\n"));
    }
}
