//! Heading-aware chunker that tracks title hierarchy across markdown, underline,
//! and numbered heading styles (§4.6).

use std::sync::OnceLock;

use async_trait::async_trait;
use common::error::AppError;
use common::pipeline_state::{ArtifactKind, ChunkMetadata, DerivedFile, FileDetails, PipelineState};
use common::utils::config::ChunkerConfig;
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::handler::{Outcome, StepHandler};

fn markdown_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("valid regex"))
}

fn numbered_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^((?:\d+\.)+)\s+(.+)$").expect("valid regex"))
}

#[derive(Clone, Debug)]
struct Heading {
    start: usize,
    level: u8,
    title: String,
}

fn line_starts(text: &str) -> Vec<(usize, &str)> {
    let mut lines = Vec::new();
    let mut offset = 0usize;
    for line in text.split('\n') {
        lines.push((offset, line));
        offset += line.len() + 1;
    }
    lines
}

fn detect_headings(text: &str) -> Vec<Heading> {
    let lines = line_starts(text);
    let mut headings = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let (start, line) = lines[i];

        if let Some(caps) = markdown_heading_re().captures(line) {
            headings.push(Heading {
                start,
                level: caps[1].len() as u8,
                title: caps[2].trim().to_string(),
            });
            i += 1;
            continue;
        }

        if let Some(caps) = numbered_heading_re().captures(line) {
            headings.push(Heading {
                start,
                level: caps[1].matches('.').count() as u8,
                title: caps[2].trim().to_string(),
            });
            i += 1;
            continue;
        }

        if i + 1 < lines.len() {
            let (_, next_line) = lines[i + 1];
            let trimmed_next = next_line.trim_end_matches('\r');
            let title_line = line.trim();
            if !title_line.is_empty() && trimmed_next.len() >= 3 {
                if trimmed_next.chars().all(|c| c == '=') {
                    headings.push(Heading { start, level: 1, title: title_line.to_string() });
                    i += 2;
                    continue;
                } else if trimmed_next.chars().all(|c| c == '-') {
                    headings.push(Heading { start, level: 2, title: title_line.to_string() });
                    i += 2;
                    continue;
                }
            }
        }

        i += 1;
    }

    headings.sort_by_key(|heading| heading.start);
    headings
}

fn update_title_stack(stack: &mut Vec<String>, heading: &Heading) {
    let level = heading.level.max(1) as usize;
    stack.truncate(level - 1);
    while stack.len() < level - 1 {
        stack.push("Untitled Section".to_string());
    }
    stack.push(heading.title.clone());
}

fn split_sentences(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < text.len() {
        if bytes[i] == b'.' && i + 1 < text.len() && (bytes[i + 1] == b' ' || bytes[i + 1] == b'\n') {
            sentences.push(text[start..=i].to_string());
            i += 2;
            start = i;
            continue;
        }
        i += 1;
    }
    if start < text.len() {
        sentences.push(text[start..].to_string());
    }
    sentences.retain(|s| !s.trim().is_empty());
    sentences
}

fn force_split_words(text: &str, max_chunk_size: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut buffer = String::new();

    for word in text.split_whitespace() {
        let candidate_len = if buffer.is_empty() {
            word.chars().count()
        } else {
            buffer.chars().count() + 1 + word.chars().count()
        };

        if candidate_len > max_chunk_size && !buffer.is_empty() {
            out.push(std::mem::take(&mut buffer));
        }
        if !buffer.is_empty() {
            buffer.push(' ');
        }
        buffer.push_str(word);

        if buffer.chars().count() > max_chunk_size {
            out.push(std::mem::take(&mut buffer));
        }
    }
    if !buffer.is_empty() {
        out.push(buffer);
    }
    out
}

/// Splits an oversized section into pieces each within `max_chunk_size`, per
/// the paragraph -> sentence -> word-boundary fallback ladder.
fn enforce_size(text: &str, max_chunk_size: usize) -> Vec<String> {
    if text.chars().count() <= max_chunk_size {
        return vec![text.to_string()];
    }

    let paragraphs: Vec<&str> = text.split("\n\n").filter(|p| !p.trim().is_empty()).collect();
    let units: Vec<String> = if paragraphs.len() > 1 {
        paragraphs.into_iter().map(str::to_string).collect()
    } else {
        split_sentences(text)
    };

    let mut out = Vec::new();
    let mut buffer = String::new();

    for unit in units {
        let candidate_len = if buffer.is_empty() {
            unit.chars().count()
        } else {
            buffer.chars().count() + 2 + unit.chars().count()
        };

        if candidate_len > max_chunk_size && !buffer.is_empty() {
            out.push(std::mem::take(&mut buffer));
        }
        if !buffer.is_empty() {
            buffer.push_str("\n\n");
        }
        buffer.push_str(&unit);

        if buffer.chars().count() > max_chunk_size {
            out.extend(force_split_words(&buffer, max_chunk_size));
            buffer.clear();
        }
    }
    if !buffer.is_empty() {
        out.push(buffer);
    }
    if out.is_empty() {
        out.push(text.to_string());
    }
    out
}

struct ChunkAccumulator {
    text: String,
    title: String,
    title_level: u8,
    title_hierarchy: Vec<String>,
}

fn build_chunks(text: &str, config: &ChunkerConfig) -> Vec<ChunkAccumulator> {
    let headings = detect_headings(text);

    if headings.is_empty() {
        return enforce_size(text, config.semantic_max_chunk_size)
            .into_iter()
            .filter(|chunk| !chunk.trim().is_empty())
            .map(|chunk| ChunkAccumulator {
                text: chunk,
                title: String::new(),
                title_level: 0,
                title_hierarchy: Vec::new(),
            })
            .collect();
    }

    let mut chunks: Vec<ChunkAccumulator> = Vec::new();
    let mut stack: Vec<String> = Vec::new();

    let mut section_bounds: Vec<usize> = headings.iter().map(|h| h.start).collect();
    section_bounds.push(text.len());

    if headings[0].start > 0 {
        let leading = &text[0..headings[0].start];
        if !leading.trim().is_empty() {
            for piece in enforce_size(leading, config.semantic_max_chunk_size) {
                chunks.push(ChunkAccumulator {
                    text: piece,
                    title: String::new(),
                    title_level: 0,
                    title_hierarchy: Vec::new(),
                });
            }
        }
    }

    for (idx, heading) in headings.iter().enumerate() {
        update_title_stack(&mut stack, heading);
        let end = section_bounds[idx + 1];
        let section_text = &text[heading.start..end];

        let title = if config.include_title_context {
            heading.title.clone()
        } else {
            String::new()
        };
        let title_hierarchy = if config.include_title_context {
            stack.clone()
        } else {
            Vec::new()
        };

        let pieces = enforce_size(section_text, config.semantic_max_chunk_size);
        let starts_new_chunk = heading.level <= config.title_level_threshold || chunks.is_empty();

        if pieces.len() == 1 && !starts_new_chunk {
            let piece = &pieces[0];
            let fits = chunks
                .last()
                .map(|last| last.text.chars().count() + piece.chars().count() + 2 <= config.semantic_max_chunk_size)
                .unwrap_or(false);

            if fits {
                let last = chunks.last_mut().expect("checked above");
                last.text.push_str("\n\n");
                last.text.push_str(piece);
                continue;
            }
        }

        for piece in pieces {
            chunks.push(ChunkAccumulator {
                text: piece,
                title: title.clone(),
                title_level: heading.level,
                title_hierarchy: title_hierarchy.clone(),
            });
        }
    }

    chunks
}

fn stem(name: &str) -> String {
    std::path::Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(name)
        .to_string()
}

pub struct SemanticChunkerHandler {
    config: ChunkerConfig,
}

impl SemanticChunkerHandler {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StepHandler for SemanticChunkerHandler {
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
            let mut chunks = build_chunks(&text, &self.config);
            chunks.retain(|chunk| chunk.text.trim().chars().count() >= self.config.semantic_min_chunk_size);

            if chunks.is_empty() {
                let mut all = build_chunks(&text, &self.config);
                if !all.is_empty() {
                    all.sort_by_key(|chunk| std::cmp::Reverse(chunk.text.chars().count()));
                    chunks.push(all.remove(0));
                }
            }

            for (ordinal, chunk) in chunks.into_iter().enumerate() {
                let mut artifact = FileDetails::new_deterministic(
                    &format!("{parent_id}:semantic-chunk:{ordinal}"),
                    format!("{stem}.semantic-chunk{ordinal:03}.txt"),
                    chunk.text.len() as u64,
                    "text/plain",
                    ArtifactKind::TextPartition,
                    ordinal as u32,
                    section_number,
                );

                let content_sha256 = format!("{:x}", Sha256::digest(chunk.text.as_bytes()));
                artifact.attach_derived_file(
                    "chunk.txt",
                    DerivedFile {
                        parent_artifact_id: parent_id.clone(),
                        source_partition_id: Some(parent_id.clone()),
                        content_sha256,
                    },
                );

                state.context.chunk_metadata.insert(
                    artifact.id.clone(),
                    ChunkMetadata {
                        title: chunk.title,
                        title_level: chunk.title_level,
                        title_hierarchy: chunk.title_hierarchy,
                    },
                );
                state.context.chunk_text.insert(artifact.id.clone(), chunk.text);
                state.files.push(artifact);
                produced += 1;
            }
        }

        state.log(self.step_name(), format!("produced {produced} semantic chunk(s)"));
        Ok((Outcome::Success, state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::pipeline_state::UploadedFile;

    fn state_with_extracted_text(text: &str) -> PipelineState {
        let mut state = PipelineState::new("default", Vec::<UploadedFile>::new());
        let artifact = FileDetails::new("doc.md", text.len() as u64, "text/markdown", ArtifactKind::ExtractedText, 0, 0);
        state.context.extracted_text.insert(artifact.id.clone(), text.to_string());
        state.files.push(artifact);
        state
    }

    #[tokio::test]
    async fn markdown_with_two_h2s_produces_three_titled_chunks_in_order() {
        let config = ChunkerConfig {
            title_level_threshold: 2,
            semantic_min_chunk_size: 1,
            ..ChunkerConfig::default()
        };
        let handler = SemanticChunkerHandler::new(config);
        let text = "# T\n\nI.\n\n## A\n\nAlpha.\n\n## B\n\nBeta.";
        let state = state_with_extracted_text(text);

        let (outcome, state) = handler.invoke(state, &CancellationToken::new()).await.expect("invoke");
        assert_eq!(outcome, Outcome::Success);

        let mut partitions: Vec<_> = state.artifacts_of_kind(ArtifactKind::TextPartition).collect();
        partitions.sort_by_key(|artifact| artifact.partition_number);
        assert_eq!(partitions.len(), 3);

        let titles: Vec<&str> = partitions
            .iter()
            .map(|artifact| state.context.chunk_metadata[&artifact.id].title.as_str())
            .collect();
        assert_eq!(titles, vec!["T", "A", "B"]);
    }

    #[tokio::test]
    async fn paragraph_overflow_without_headings_splits_on_boundaries() {
        let config = ChunkerConfig {
            semantic_max_chunk_size: 1000,
            semantic_min_chunk_size: 100,
            ..ChunkerConfig::default()
        };
        let handler = SemanticChunkerHandler::new(config);
        let paragraph = "Lorem ipsum dolor sit amet consectetur adipiscing elit. ".repeat(15);
        let text = format!("{paragraph}\n\n{paragraph}\n\n{paragraph}");
        let state = state_with_extracted_text(&text);

        let (_, state) = handler.invoke(state, &CancellationToken::new()).await.expect("invoke");
        let partitions: Vec<_> = state.artifacts_of_kind(ArtifactKind::TextPartition).collect();
        assert!(!partitions.is_empty());
        for partition in &partitions {
            let chunk = &state.context.chunk_text[&partition.id];
            assert!(chunk.chars().count() <= 1000);
        }
    }

    #[tokio::test]
    async fn heading_at_position_zero_starts_the_first_chunk_there() {
        let config = ChunkerConfig {
            semantic_min_chunk_size: 1,
            ..ChunkerConfig::default()
        };
        let handler = SemanticChunkerHandler::new(config);
        let text = "# Intro\n\nSome body text.";
        let state = state_with_extracted_text(text);

        let (_, state) = handler.invoke(state, &CancellationToken::new()).await.expect("invoke");
        let partitions: Vec<_> = state.artifacts_of_kind(ArtifactKind::TextPartition).collect();
        assert_eq!(partitions.len(), 1);
        assert!(state.context.chunk_text[&partitions[0].id].starts_with("# Intro"));
    }

    #[tokio::test]
    async fn include_title_context_false_empties_hierarchy_but_keeps_body() {
        let config = ChunkerConfig {
            include_title_context: false,
            semantic_min_chunk_size: 1,
            ..ChunkerConfig::default()
        };
        let handler = SemanticChunkerHandler::new(config);
        let text = "# T\n\nBody.";
        let state = state_with_extracted_text(text);

        let (_, state) = handler.invoke(state, &CancellationToken::new()).await.expect("invoke");
        let partitions: Vec<_> = state.artifacts_of_kind(ArtifactKind::TextPartition).collect();
        let metadata = &state.context.chunk_metadata[&partitions[0].id];
        assert!(metadata.title.is_empty());
        assert!(metadata.title_hierarchy.is_empty());
        assert!(state.context.chunk_text[&partitions[0].id].contains("Body."));
    }

    #[tokio::test]
    async fn empty_input_produces_zero_chunks() {
        let handler = SemanticChunkerHandler::new(ChunkerConfig::default());
        let state = state_with_extracted_text("");

        let (_, state) = handler.invoke(state, &CancellationToken::new()).await.expect("invoke");
        assert_eq!(state.artifacts_of_kind(ArtifactKind::TextPartition).count(), 0);
    }

    #[tokio::test]
    async fn retrying_the_handler_reuses_the_same_artifact_ids() {
        let config = ChunkerConfig {
            title_level_threshold: 2,
            semantic_min_chunk_size: 1,
            ..ChunkerConfig::default()
        };
        let handler = SemanticChunkerHandler::new(config);
        let text = "# T\n\nI.\n\n## A\n\nAlpha.\n\n## B\n\nBeta.";
        let state = state_with_extracted_text(text);

        let (_, first) = handler.invoke(state.clone(), &CancellationToken::new()).await.expect("first run");
        let (_, second) = handler.invoke(state, &CancellationToken::new()).await.expect("second run");

        let mut first_ids: Vec<&String> = first.artifacts_of_kind(ArtifactKind::TextPartition).map(|a| &a.id).collect();
        let mut second_ids: Vec<&String> = second.artifacts_of_kind(ArtifactKind::TextPartition).map(|a| &a.id).collect();
        first_ids.sort();
        second_ids.sort();
        assert_eq!(first_ids, second_ids);

        for id in &first_ids {
            assert_eq!(first.context.chunk_text[*id], second.context.chunk_text[*id]);
            assert_eq!(
                first.context.chunk_metadata[*id].title,
                second.context.chunk_metadata[*id].title
            );
        }
    }
}
