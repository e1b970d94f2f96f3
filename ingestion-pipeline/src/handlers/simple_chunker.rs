//! Fixed-size character-window chunker with overlap and split-character preference (§4.5).

use async_trait::async_trait;
use common::error::AppError;
use common::pipeline_state::{ArtifactKind, DerivedFile, FileDetails, PipelineState};
use common::utils::config::ChunkerConfig;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::handler::{Outcome, StepHandler};

const SEARCH_WINDOW: usize = 200;
const SPLIT_PREFERENCES: &[&str] = &["\n\n", "\n", ". ", "! ", "? "];

fn stem(name: &str) -> String {
    std::path::Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(name)
        .to_string()
}

/// Finds the end of the best split point within `[target_end - SEARCH_WINDOW, target_end)`.
/// Returns `target_end` unchanged if no preferred split character is present in the window.
fn find_split_end(chars: &[char], target_end: usize) -> usize {
    let window_start = target_end.saturating_sub(SEARCH_WINDOW);
    let window: String = chars[window_start..target_end].iter().collect();

    for pattern in SPLIT_PREFERENCES {
        if let Some(byte_pos) = window.rfind(pattern) {
            let char_offset = window[..byte_pos].chars().count() + pattern.chars().count();
            return window_start + char_offset;
        }
    }

    target_end
}

fn walk_chunks(text: &str, max_chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if len == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut pos = 0usize;

    while pos < len {
        let target_end = (pos + max_chunk_size).min(len);
        let end = if target_end < len {
            find_split_end(&chars, target_end)
        } else {
            target_end
        };

        let slice: String = chars[pos..end].iter().collect();
        let trimmed = slice.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        let next_pos = (end.saturating_sub(overlap)).max(pos + 1);
        pos = next_pos;
    }

    chunks
}

pub struct SimpleChunkerHandler {
    config: ChunkerConfig,
}

impl SimpleChunkerHandler {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StepHandler for SimpleChunkerHandler {
    fn step_name(&self) -> &'static str {
        "text-chunking"
    }

    async fn invoke(
        &self,
        mut state: PipelineState,
        _cancel: &CancellationToken,
    ) -> Result<(Outcome, PipelineState), AppError> {
        let parents: Vec<(String, String, u32)> = state
            .artifacts_of_kind(ArtifactKind::ExtractedText)
            .map(|artifact| (artifact.id.clone(), artifact.name.clone(), artifact.section_number))
            .collect();

        let mut produced = 0usize;

        for (parent_id, parent_name, section_number) in parents {
            let text = match state.context.extracted_text.get(&parent_id) {
                Some(text) => text.clone(),
                None => {
                    warn!(artifact = %parent_id, "missing extracted text; using fallback sample");
                    format!("Sample text content for {parent_name}")
                }
            };

            let stem = stem(&parent_name);
            let chunks = walk_chunks(&text, self.config.simple_max_chunk_size, self.config.simple_text_overlap);

            for (ordinal, chunk_text) in chunks.into_iter().enumerate() {
                let mut artifact = FileDetails::new_deterministic(
                    &format!("{parent_id}:simple-chunk:{ordinal}"),
                    format!("{stem}.chunk{ordinal:03}.txt"),
                    chunk_text.len() as u64,
                    "text/plain",
                    ArtifactKind::TextPartition,
                    ordinal as u32,
                    section_number,
                );

                let content_sha256 = format!("{:x}", Sha256::digest(chunk_text.as_bytes()));
                artifact.attach_derived_file(
                    "chunk.txt",
                    DerivedFile {
                        parent_artifact_id: parent_id.clone(),
                        source_partition_id: Some(parent_id.clone()),
                        content_sha256,
                    },
                );

                state.context.chunk_text.insert(artifact.id.clone(), chunk_text);
                state.files.push(artifact);
                produced += 1;
            }
        }

        state.log(self.step_name(), format!("produced {produced} chunk(s)"));
        Ok((Outcome::Success, state))
    }
}
