use std::io::Cursor;
use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use image::ImageFormat;
use log::warn;

use super::Classifier;
use crate::agent_config::CommandLine;
use crate::models::Frame;

/// Category names, one per line, indexed by line number.
pub fn parse_categories(contents: &str) -> Vec<String> {
    contents.lines().map(|line| line.trim().to_string()).collect()
}

/// Parses `index score` lines (whitespace or comma separated) and returns
/// them ranked best first. Blank lines are skipped.
pub fn parse_predictions(output: &str) -> Result<Vec<(usize, f32)>> {
    let mut ranked = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|field| !field.is_empty());
        let (Some(index), Some(score)) = (fields.next(), fields.next()) else {
            bail!("malformed prediction line '{line}'");
        };
        let index: usize = index
            .parse()
            .with_context(|| format!("bad category index in '{line}'"))?;
        let score: f32 = score
            .parse()
            .with_context(|| format!("bad score in '{line}'"))?;
        ranked.push((index, score));
    }
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(ranked)
}

/// Runs the compiled model as a child process on a PNG of the frame.
pub struct ProcessClassifier {
    cmd: CommandLine,
    categories_path: PathBuf,
    input_path: PathBuf,
    categories: RwLock<Vec<String>>,
}

impl ProcessClassifier {
    pub fn new(cmd: CommandLine, categories_path: PathBuf, scratch_dir: PathBuf) -> Self {
        Self {
            cmd,
            categories_path,
            input_path: scratch_dir.join("model-input.png"),
            categories: RwLock::new(Vec::new()),
        }
    }

    /// The model may have been replaced since the last call, so the table is
    /// re-read every time.
    async fn reload_categories(&self) {
        match tokio::fs::read_to_string(&self.categories_path).await {
            Ok(contents) => {
                let parsed = parse_categories(&contents);
                let mut guard = self
                    .categories
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                *guard = parsed;
            }
            Err(err) => warn!(
                "Could not read categories from {}: {err}",
                self.categories_path.display()
            ),
        }
    }
}

#[async_trait]
impl Classifier for ProcessClassifier {
    async fn predict(&self, frame: &Frame) -> Result<Vec<(usize, f32)>> {
        self.reload_categories().await;

        let image = frame.to_rgb_image()?;
        let mut encoded = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .context("failed to encode model input")?;
        tokio::fs::write(&self.input_path, encoded)
            .await
            .with_context(|| format!("failed to write {}", self.input_path.display()))?;

        let output = self
            .cmd
            .to_command()
            .arg(&self.input_path)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.cmd.program))?;
        if !output.status.success() {
            bail!(
                "model exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        parse_predictions(&String::from_utf8_lossy(&output.stdout))
    }

    fn category(&self, index: usize) -> Option<String> {
        self.categories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(index)
            .cloned()
    }
}
