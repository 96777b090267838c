//! Image CDN Module
//!
//! Uploads rendered images to Cloudinary so Instagram can fetch them by URL,
//! and deletes them again once the post is live.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::config;

const API_BASE_URL: &str = "https://api.cloudinary.com/v1_1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedImage {
    pub url: String,
    pub public_id: String,
}

#[async_trait]
pub trait ImageHost: Send + Sync {
    async fn upload(&self, path: &Path) -> Result<HostedImage>;
    async fn delete(&self, public_id: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct CloudinaryCredentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
    public_id: String,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

pub struct CloudinaryClient {
    credentials: CloudinaryCredentials,
    folder: String,
    http_client: reqwest::Client,
}

impl CloudinaryClient {
    pub fn new(credentials: CloudinaryCredentials, folder: impl Into<String>) -> Result<Self> {
        log::info!("Cloudinary configured for cloud \"{}\"", credentials.cloud_name);
        Ok(Self {
            credentials,
            folder: folder.into(),
            http_client: config::http_client()?,
        })
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/{}/image/{}", API_BASE_URL, self.credentials.cloud_name, action)
    }

    fn sign(&self, params: &[(&str, &str)]) -> String {
        sign_params(params, &self.credentials.api_secret)
    }
}

#[async_trait]
impl ImageHost for CloudinaryClient {
    async fn upload(&self, path: &Path) -> Result<HostedImage> {
        let public_id = unique_public_id(&self.folder, path, Utc::now().timestamp_millis());
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(&[("public_id", &public_id), ("timestamp", &timestamp)]);

        log::debug!("Uploading {} to Cloudinary as {}", path.display(), public_id);

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read image {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image.png".to_string());

        let form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name(file_name))
            .text("api_key", self.credentials.api_key.clone())
            .text("public_id", public_id)
            .text("timestamp", timestamp)
            .text("signature", signature)
            .text("signature_algorithm", "sha256");

        let response = self
            .http_client
            .post(self.endpoint("upload"))
            .multipart(form)
            .send()
            .await
            .context("Failed to send Cloudinary upload request")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Cloudinary upload failed (status {}): {}", status, error_text);
        }

        let uploaded: UploadResponse = response
            .json()
            .await
            .context("Failed to parse Cloudinary upload response")?;

        log::debug!("Image uploaded successfully. URL: {}", uploaded.secure_url);
        Ok(HostedImage {
            url: uploaded.secure_url,
            public_id: uploaded.public_id,
        })
    }

    async fn delete(&self, public_id: &str) -> Result<()> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(&[("public_id", public_id), ("timestamp", &timestamp)]);

        let params = [
            ("public_id", public_id),
            ("timestamp", timestamp.as_str()),
            ("api_key", self.credentials.api_key.as_str()),
            ("signature", signature.as_str()),
            ("signature_algorithm", "sha256"),
        ];

        let response = self
            .http_client
            .post(self.endpoint("destroy"))
            .form(&params)
            .send()
            .await
            .context("Failed to send Cloudinary destroy request")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Cloudinary destroy failed (status {}): {}", status, error_text);
        }

        let destroyed: DestroyResponse = response
            .json()
            .await
            .context("Failed to parse Cloudinary destroy response")?;
        if destroyed.result != "ok" {
            anyhow::bail!("Cloudinary could not delete {}: {}", public_id, destroyed.result);
        }

        log::debug!("Deleted image {} from Cloudinary", public_id);
        Ok(())
    }
}

/// `<folder>/<file stem>-<millis>`.
pub fn unique_public_id(folder: &str, path: &Path, millis: i64) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    format!("{}/{}-{}", folder.trim_end_matches('/'), stem, millis)
}

/// Hex SHA-256 of the sorted `key=value&...` string followed by the secret.
pub fn sign_params(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let to_sign = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    hex::encode(Sha256::digest(format!("{}{}", to_sign, api_secret).as_bytes()))
}
