//! Converts uploaded bytes into markdown text via the remote extractor, with fallback (§4.4).

use std::sync::Arc;

use async_trait::async_trait;
use common::error::AppError;
use common::extractor::ExtractorClient;
use common::pipeline_state::{ArtifactKind, DerivedFile, FileDetails, PipelineState};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::handler::{Outcome, StepHandler};

const TEXTUAL_EXTRA_MIME_TYPES: &[&str] = &["application/json", "application/xml", "application/javascript"];

fn is_textual(content_type: &str) -> bool {
    content_type.starts_with("text/")
        || TEXTUAL_EXTRA_MIME_TYPES.contains(&content_type)
        || content_type.contains("xml")
}

fn fallback_markdown(name: &str, content_type: &str, byte_len: usize) -> String {
    format!(
        "# {name}\n\n**File Type:** {content_type}\n**File Size:** {byte_len} bytes\n**Note:** Binary content could not be extracted."
    )
}

pub struct ExtractionHandler {
    extractor: Arc<dyn ExtractorClient>,
}

impl ExtractionHandler {
    pub fn new(extractor: Arc<dyn ExtractorClient>) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl StepHandler for ExtractionHandler {
    fn step_name(&self) -> &'static str {
        "text-extraction"
    }

    async fn invoke(
        &self,
        mut state: PipelineState,
        _cancel: &CancellationToken,
    ) -> Result<(Outcome, PipelineState), AppError> {
        let uploads = std::mem::take(&mut state.files_to_upload);
        let healthy = self.extractor.is_healthy().await;
        let execution_id = state.execution_id.clone();

        for (ordinal, upload) in uploads.into_iter().enumerate() {
            let mut artifact = FileDetails::new_deterministic(
                &format!("{execution_id}:{}:{ordinal}", self.step_name()),
                &upload.file_name,
                upload.bytes.len() as u64,
                &upload.content_type,
                ArtifactKind::ExtractedText,
                0,
                0,
            );

            let markdown = if healthy {
                match self
                    .extractor
                    .convert_file(&upload.file_name, &upload.content_type, upload.bytes.clone())
                    .await
                {
                    Ok(markdown) => markdown,
                    Err(err) => {
                        warn!(file = %upload.file_name, error = %err, "extractor failed; falling back");
                        fallback_text(&upload.file_name, &upload.content_type, &upload.bytes)
                    }
                }
            } else {
                fallback_text(&upload.file_name, &upload.content_type, &upload.bytes)
            };

            let content_sha256 = format!("{:x}", Sha256::digest(markdown.as_bytes()));
            artifact.attach_derived_file(
                "extracted.txt",
                DerivedFile {
                    parent_artifact_id: artifact.id.clone(),
                    source_partition_id: None,
                    content_sha256,
                },
            );

            state
                .context
                .extracted_text
                .insert(artifact.id.clone(), markdown);
            state.files.push(artifact);
        }

        state.upload_complete = true;
        state.log(
            self.step_name(),
            format!("extracted {} file(s)", state.files.len()),
        );

        Ok((Outcome::Success, state))
    }
}

fn fallback_text(name: &str, content_type: &str, bytes: &[u8]) -> String {
    if is_textual(content_type) {
        match String::from_utf8(bytes.to_vec()) {
            Ok(text) => return text,
            Err(_) => return fallback_markdown(name, content_type, bytes.len()),
        }
    }
    fallback_markdown(name, content_type, bytes.len())
}
