//! Remote markdown extractor client (§6.1).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use crate::error::AppError;
use crate::utils::config::ExtractorConfig;

#[derive(Debug, Deserialize)]
struct ConvertFileResponse {
    success: bool,
    markdown: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConvertUrlResponse {
    success: bool,
    markdown: Option<String>,
    error: Option<String>,
}

/// Converts uploaded bytes or a remote URL into markdown text.
#[async_trait]
pub trait ExtractorClient: Send + Sync {
    async fn convert_file(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, AppError>;

    async fn convert_url(&self, url: &str) -> Result<String, AppError>;

    async fn is_healthy(&self) -> bool;
}

pub struct HttpExtractorClient {
    http: Client,
    base_url: String,
}

impl HttpExtractorClient {
    pub fn new(config: &ExtractorConfig) -> Result<Self, AppError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ExtractorClient for HttpExtractorClient {
    async fn convert_file(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, AppError> {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .map_err(|err| AppError::Validation(err.to_string()))?;
        let form = Form::new()
            .part("file", part)
            .text("filename", file_name.to_string());

        let response = self
            .http
            .post(format!("{}/convert", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|err| AppError::ExternalUnavailable(err.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalUnavailable(format!(
                "extractor responded with status {}",
                response.status()
            )));
        }

        let body: ConvertFileResponse = response
            .json()
            .await
            .map_err(|err| AppError::ExternalUnavailable(err.to_string()))?;

        if !body.success {
            return Err(AppError::ExternalUnavailable(
                body.error.unwrap_or_else(|| "extractor reported failure".to_string()),
            ));
        }

        body.markdown
            .ok_or_else(|| AppError::ExternalUnavailable("extractor returned no markdown".to_string()))
    }

    async fn convert_url(&self, url: &str) -> Result<String, AppError> {
        let response = self
            .http
            .post(format!("{}/convert-url", self.base_url))
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .map_err(|err| AppError::ExternalUnavailable(err.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalUnavailable(format!(
                "extractor responded with status {}",
                response.status()
            )));
        }

        let body: ConvertUrlResponse = response
            .json()
            .await
            .map_err(|err| AppError::ExternalUnavailable(err.to_string()))?;

        if !body.success {
            return Err(AppError::ExternalUnavailable(
                body.error.unwrap_or_else(|| "extractor reported failure".to_string()),
            ));
        }

        body.markdown
            .ok_or_else(|| AppError::ExternalUnavailable("extractor returned no markdown".to_string()))
    }

    async fn is_healthy(&self) -> bool {
        match self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                warn!(error = %err, "extractor health check failed");
                false
            }
        }
    }
}
