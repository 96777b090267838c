//! Image Rendering Module
//!
//! Fills an HTML template with post content and screenshots it with a
//! headless browser into a square PNG.
//!
//! A template lives in `<templates>/<id>/` as `template.ejs` (or
//! `template.html`). An optional `template.json` manifest supplies default
//! variables and maps sibling asset files onto variables:
//!
//! ```json
//! {
//!   "defaultVariables": { "handle": "fixin5mins", "totalSlides": 5 },
//!   "files": [
//!     { "fileName": "style.css", "variableMapping": "styles" },
//!     { "fileName": "background.svg", "variableMapping": "backgroundImage" }
//!   ]
//! }
//! ```
//!
//! Text assets (`.css`, `.ejs`) are inlined; anything else is passed as an
//! absolute `file://` URL.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

use crate::config::DEFAULT_SCREENSHOT_TIMEOUT;

/// Instagram square post edge, in pixels.
pub const IMAGE_SIZE: u32 = 1080;

const TEMPLATE_FILES: [&str; 2] = ["template.ejs", "template.html"];
const MANIFEST_FILE: &str = "template.json";

/// Asset mappings used when a template has no manifest
const CONVENTIONAL_ASSETS: [(&str, &str); 4] = [
    ("style.css", "styles"),
    ("background.png", "backgroundImage"),
    ("background.jpg", "backgroundImage"),
    ("background.svg", "backgroundImage"),
];

pub type TemplateVariables = BTreeMap<String, String>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateManifest {
    #[serde(default)]
    pub default_variables: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub files: Vec<TemplateAsset>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateAsset {
    pub file_name: String,
    pub variable_mapping: String,
}

#[async_trait]
pub trait ImageRenderer: Send + Sync {
    /// Render `template_id` with `variables`, returning the path of the PNG.
    async fn render(&self, template_id: &str, variables: &TemplateVariables) -> Result<PathBuf>;
}

pub struct HtmlScreenshotRenderer {
    templates_dir: PathBuf,
    output_dir: PathBuf,
    browser: String,
    screenshot_timeout: Duration,
}

impl HtmlScreenshotRenderer {
    pub fn new(templates_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, browser: impl Into<String>) -> Self {
        Self {
            templates_dir: templates_dir.into(),
            output_dir: output_dir.into(),
            browser: browser.into(),
            screenshot_timeout: DEFAULT_SCREENSHOT_TIMEOUT,
        }
    }

    /// Kill the browser if a screenshot takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.screenshot_timeout = timeout;
        self
    }

    async fn read_template(&self, template_id: &str) -> Result<String> {
        let dir = self.templates_dir.join(template_id);
        for name in TEMPLATE_FILES {
            let path = dir.join(name);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read template {}", path.display()));
            }
        }
        anyhow::bail!("Template \"{}\" not found in {}", template_id, dir.display())
    }

    async fn read_manifest(&self, dir: &Path) -> Result<Option<TemplateManifest>> {
        let path = dir.join(MANIFEST_FILE);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }

        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let manifest = serde_json::from_str(&raw).with_context(|| format!("Invalid manifest {}", path.display()))?;
        Ok(Some(manifest))
    }

    /// Template markup and the variables it renders with: manifest defaults,
    /// overridden by `variables`, overridden by mapped asset files.
    async fn prepare(&self, template_id: &str, variables: &TemplateVariables) -> Result<(String, TemplateVariables)> {
        let markup = self.read_template(template_id).await?;
        let dir = self.templates_dir.join(template_id);

        let (defaults, assets) = match self.read_manifest(&dir).await? {
            Some(manifest) => (manifest.default_variables, manifest.files),
            None => (
                BTreeMap::new(),
                CONVENTIONAL_ASSETS
                    .iter()
                    .map(|(file_name, variable)| TemplateAsset {
                        file_name: file_name.to_string(),
                        variable_mapping: variable.to_string(),
                    })
                    .collect(),
            ),
        };

        let mut merged: TemplateVariables = defaults
            .into_iter()
            .map(|(name, value)| (name, variable_text(value)))
            .collect();
        merged.extend(variables.iter().map(|(k, v)| (k.clone(), v.clone())));

        for asset in assets {
            if TEMPLATE_FILES.contains(&asset.file_name.as_str()) {
                continue;
            }
            let path = dir.join(&asset.file_name);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                log::debug!("Template \"{}\" has no {}", template_id, asset.file_name);
                continue;
            }
            merged.insert(asset.variable_mapping, asset_value(&path).await?);
        }

        Ok((markup, merged))
    }

    async fn screenshot(&self, html_path: &Path, png_path: &Path) -> Result<()> {
        let html_path = tokio::fs::canonicalize(html_path)
            .await
            .with_context(|| format!("Failed to resolve {}", html_path.display()))?;

        log::debug!("Capturing {} with {}", html_path.display(), self.browser);

        let capture = Command::new(&self.browser)
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--hide-scrollbars")
            .arg(format!("--window-size={},{}", IMAGE_SIZE, IMAGE_SIZE))
            .arg(format!("--screenshot={}", png_path.display()))
            .arg(format!("file://{}", html_path.display()))
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.screenshot_timeout, capture)
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Browser \"{}\" timed out after {:?} capturing {}",
                    self.browser,
                    self.screenshot_timeout,
                    html_path.display()
                )
            })?
            .with_context(|| format!("Failed to launch browser \"{}\"", self.browser))?;

        if !output.status.success() {
            anyhow::bail!(
                "Browser exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        if !tokio::fs::try_exists(png_path).await.unwrap_or(false) {
            anyhow::bail!("Browser did not produce {}", png_path.display());
        }
        Ok(())
    }
}

#[async_trait]
impl ImageRenderer for HtmlScreenshotRenderer {
    async fn render(&self, template_id: &str, variables: &TemplateVariables) -> Result<PathBuf> {
        let (template, variables) = self.prepare(template_id, variables).await?;
        let html = fill_template(&template, &variables);

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("Failed to create output directory {}", self.output_dir.display()))?;

        let stem = format!("template-{}-{}", template_id, Utc::now().timestamp_millis());
        let html_path = self.output_dir.join(format!("{}.html", stem));
        let png_path = self.output_dir.join(format!("{}.png", stem));

        tokio::fs::write(&html_path, html)
            .await
            .with_context(|| format!("Failed to write {}", html_path.display()))?;

        let result = self.screenshot(&html_path, &png_path).await;
        if let Err(e) = tokio::fs::remove_file(&html_path).await {
            log::debug!("Could not remove {}: {}", html_path.display(), e);
        }
        result?;

        log::info!("Rendered template \"{}\" to {}", template_id, png_path.display());
        Ok(png_path)
    }
}

/// Strings pass through; other JSON values render as JSON text.
fn variable_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

async fn asset_value(path: &Path) -> Result<String> {
    let inline = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("css") | Some("ejs")
    );
    if inline {
        return tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read asset {}", path.display()));
    }

    let absolute = tokio::fs::canonicalize(path)
        .await
        .with_context(|| format!("Failed to resolve asset {}", path.display()))?;
    Ok(format!("file://{}", absolute.display()))
}

/// Substitute `<%= name %>` (HTML-escaped) and `<%- name %>` (raw) tags.
/// Unknown names render as empty strings; anything else is copied through.
pub fn fill_template(template: &str, variables: &TemplateVariables) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("<%") {
        out.push_str(&rest[..start]);
        let tag = &rest[start..];

        let Some(end) = tag.find("%>") else {
            out.push_str(tag);
            return out;
        };

        let body = &tag[2..end];
        match body.chars().next() {
            Some('=') => out.push_str(&escape_html(lookup(variables, &body[1..]))),
            Some('-') => out.push_str(lookup(variables, &body[1..])),
            _ => out.push_str(&tag[..end + 2]),
        }
        rest = &tag[end + 2..];
    }

    out.push_str(rest);
    out
}

fn lookup<'a>(variables: &'a TemplateVariables, name: &str) -> &'a str {
    variables.get(name.trim()).map(String::as_str).unwrap_or("")
}

pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
