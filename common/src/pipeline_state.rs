//! The mutable record threaded through every step of one ingestion run (data model §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ArtifactId = String;

/// A caller-supplied file awaiting extraction. Immutable after construction.
#[derive(Clone, Debug)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
            content_type: content_type.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    Undefined,
    ExtractedText,
    TextPartition,
    TextEmbeddingVector,
    SyntheticData,
    ExtractedContent,
}

/// A derived-file label attached to an artifact, e.g. `extracted.txt` or `chunk.txt`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DerivedFile {
    pub parent_artifact_id: ArtifactId,
    pub source_partition_id: Option<ArtifactId>,
    pub content_sha256: String,
}

/// A file-like record produced at some pipeline stage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileDetails {
    pub id: ArtifactId,
    pub name: String,
    pub byte_size: u64,
    pub content_type: String,
    pub kind: ArtifactKind,
    pub partition_number: u32,
    pub section_number: u32,
    pub derived_files: HashMap<String, DerivedFile>,
}

impl FileDetails {
    pub fn new(
        name: impl Into<String>,
        byte_size: u64,
        content_type: impl Into<String>,
        kind: ArtifactKind,
        partition_number: u32,
        section_number: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            byte_size,
            content_type: content_type.into(),
            kind,
            partition_number,
            section_number,
            derived_files: HashMap::new(),
        }
    }

    /// Like [`FileDetails::new`], but the id is derived from `seed` instead of drawn at
    /// random. Handlers that mint an artifact from something already present in the
    /// input state (a parent artifact id plus an ordinal) must use this constructor so
    /// that invoking the handler twice on the same input produces the same artifact id,
    /// per the retry-safety contract on `StepHandler::invoke`.
    pub fn new_deterministic(
        seed: &str,
        name: impl Into<String>,
        byte_size: u64,
        content_type: impl Into<String>,
        kind: ArtifactKind,
        partition_number: u32,
        section_number: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()).to_string(),
            name: name.into(),
            byte_size,
            content_type: content_type.into(),
            kind,
            partition_number,
            section_number,
            derived_files: HashMap::new(),
        }
    }

    pub fn attach_derived_file(&mut self, label: impl Into<String>, derived: DerivedFile) {
        self.derived_files.insert(label.into(), derived);
    }

    pub fn has_derived_file(&self, label: &str) -> bool {
        self.derived_files.contains_key(label)
    }
}

/// Per-heading metadata produced by the semantic chunker (§4.6).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub title: String,
    pub title_level: u8,
    pub title_hierarchy: Vec<String>,
}

/// The side-band bus carrying heavy payloads without copying them into `FileDetails`.
///
/// A typed struct of parallel maps, per the re-architecture guidance in the design
/// notes: this replaces a single `string -> opaque` map with one map per payload shape,
/// so no runtime downcast is ever needed to read a value back out.
#[derive(Clone, Debug, Default)]
pub struct ContextArguments {
    pub extracted_text: HashMap<ArtifactId, String>,
    pub chunk_text: HashMap<ArtifactId, String>,
    pub embeddings: HashMap<ArtifactId, Vec<f32>>,
    pub chunk_metadata: HashMap<ArtifactId, ChunkMetadata>,
}

#[derive(Clone, Debug)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub source: String,
    pub text: String,
}

/// One ingestion run: files, chunks, context, step lists, and logs (§3).
#[derive(Clone, Debug)]
pub struct PipelineState {
    pub index: String,
    pub document_id: String,
    pub execution_id: String,
    pub steps: Vec<String>,
    pub remaining_steps: Vec<String>,
    pub completed_steps: Vec<String>,
    pub tags: HashMap<String, String>,
    pub files_to_upload: Vec<UploadedFile>,
    pub files: Vec<FileDetails>,
    pub context: ContextArguments,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub complete: bool,
    pub upload_complete: bool,
    pub logs: Vec<LogEntry>,
}

impl PipelineState {
    pub fn new(index: impl Into<String>, files_to_upload: Vec<UploadedFile>) -> Self {
        let now = Utc::now();
        Self {
            index: index.into(),
            document_id: Uuid::new_v4().to_string(),
            execution_id: Uuid::new_v4().to_string(),
            steps: Vec::new(),
            remaining_steps: Vec::new(),
            completed_steps: Vec::new(),
            tags: HashMap::new(),
            files_to_upload,
            files: Vec::new(),
            context: ContextArguments::default(),
            created_at: now,
            last_update: now,
            complete: false,
            upload_complete: false,
            logs: Vec::new(),
        }
    }

    /// Appends a step name to both `steps` and `remaining_steps` (§4.1).
    pub fn then(&mut self, step_name: impl Into<String>) -> &mut Self {
        let name = step_name.into();
        self.steps.push(name.clone());
        self.remaining_steps.push(name);
        self
    }

    pub fn touch(&mut self) {
        self.last_update = Utc::now();
    }

    pub fn log(&mut self, source: impl Into<String>, text: impl Into<String>) {
        self.logs.push(LogEntry {
            time: Utc::now(),
            source: source.into(),
            text: text.into(),
        });
        self.touch();
    }

    pub fn artifacts_of_kind(&self, kind: ArtifactKind) -> impl Iterator<Item = &FileDetails> {
        self.files.iter().filter(move |file| file.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn then_appends_to_both_lists() {
        let mut state = PipelineState::new("default", vec![]);
        state.then("text-extraction").then("text-chunking");

        assert_eq!(state.steps, vec!["text-extraction", "text-chunking"]);
        assert_eq!(state.remaining_steps, state.steps);
        assert!(state.completed_steps.is_empty());
    }

    #[test]
    fn document_and_execution_ids_are_stable_across_clone() {
        let state = PipelineState::new("default", vec![]);
        let cloned = state.clone();
        assert_eq!(state.document_id, cloned.document_id);
        assert_eq!(state.execution_id, cloned.execution_id);
    }

    #[test]
    fn log_updates_last_update() {
        let mut state = PipelineState::new("default", vec![]);
        let before = state.last_update;
        std::thread::sleep(std::time::Duration::from_millis(2));
        state.log("test", "hello");
        assert!(state.last_update >= before);
        assert_eq!(state.logs.len(), 1);
    }
}
