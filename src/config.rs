//! Configuration module for environment variables and API credentials
//!
//! Values come from the process environment, optionally seeded from a `.env`
//! file. Credentials are optional here and only demanded by the steps that
//! use them.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::ai::DEFAULT_MODELS;
use crate::cdn::CloudinaryCredentials;
use crate::instagram::{InstagramCredentials, DEFAULT_GRAPH_API_URL};
use crate::topics::DEFAULT_MAX_TOPICS;

/// File name of the pipeline binary the daemon spawns.
pub const PIPELINE_BIN_NAME: &str = "generate-and-post";

/// Whole-request limit for outbound API calls.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default limit for one headless-browser screenshot.
pub const DEFAULT_SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Config {
    /// Scheduler state record (last template, last post, next slots)
    pub scheduler_state_path: PathBuf,

    pub topic_cache_path: PathBuf,
    pub category_cache_path: PathBuf,

    /// Topics kept before the least recently used one is evicted
    pub topic_cache_capacity: usize,

    /// One subdirectory per template
    pub templates_dir: PathBuf,

    /// Where rendered images are written
    pub output_dir: PathBuf,

    /// Overrides the sibling `generate-and-post` binary
    pub pipeline_bin: Option<PathBuf>,
    pub pipeline_mock: bool,
    pub pipeline_skip_posting: bool,

    /// OpenAI-compatible API root (OpenRouter by default)
    pub ai_base_url: String,
    pub ai_api_key: Option<String>,

    /// Models tried in order until one answers
    pub ai_models: Vec<String>,

    pub instagram_access_token: Option<String>,
    pub instagram_account_id: Option<String>,
    pub graph_api_url: String,
    pub instagram_handle: String,

    pub cloudinary_cloud_name: Option<String>,
    pub cloudinary_api_key: Option<String>,
    pub cloudinary_api_secret: Option<String>,
    pub cloudinary_folder: String,

    /// Chromium-compatible browser used for screenshots
    pub browser_bin: String,
    pub screenshot_timeout: Duration,

    /// Serve `/health` and `/schedule` on this port when set
    pub health_port: Option<u16>,
}

impl Config {
    /// Load configuration from `.env` and the process environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let flag = |key: &str| {
            get(key)
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false)
        };

        let health_port: Option<u16> = match get("HEALTH_PORT") {
            Some(port) => Some(
                port.parse()
                    .with_context(|| format!("HEALTH_PORT must be a port number, got \"{}\"", port))?,
            ),
            None => None,
        };

        let ai_models = get("AI_MODELS")
            .map(|v| {
                v.split(',')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|models| !models.is_empty())
            .unwrap_or_else(|| DEFAULT_MODELS.iter().map(|m| m.to_string()).collect());

        Ok(Config {
            scheduler_state_path: get("SCHEDULER_STATE_PATH")
                .unwrap_or_else(|| ".post-scheduler-state.json".to_string())
                .into(),
            topic_cache_path: get("TOPIC_CACHE_PATH")
                .unwrap_or_else(|| "temp/topic-cache.json".to_string())
                .into(),
            category_cache_path: get("CATEGORY_CACHE_PATH")
                .unwrap_or_else(|| "temp/category-cache.json".to_string())
                .into(),
            topic_cache_capacity: get("TOPIC_CACHE_CAPACITY")
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(DEFAULT_MAX_TOPICS),
            templates_dir: get("TEMPLATES_DIR").unwrap_or_else(|| "templates".to_string()).into(),
            output_dir: get("OUTPUT_DIR").unwrap_or_else(|| "temp".to_string()).into(),

            pipeline_bin: get("PIPELINE_BIN").map(PathBuf::from),
            pipeline_mock: flag("PIPELINE_MOCK"),
            pipeline_skip_posting: flag("PIPELINE_SKIP_POSTING"),

            ai_base_url: get("AI_SERVICE_BASE_URL").unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string()),
            ai_api_key: get("AI_SERVICE_API_KEY"),
            ai_models,

            instagram_access_token: get("INSTAGRAM_ACCESS_TOKEN"),
            instagram_account_id: get("INSTAGRAM_BUSINESS_ACCOUNT_ID"),
            graph_api_url: get("GRAPH_API_URL").unwrap_or_else(|| DEFAULT_GRAPH_API_URL.to_string()),
            instagram_handle: get("INSTAGRAM_HANDLE").unwrap_or_else(|| "fixin5mins".to_string()),

            cloudinary_cloud_name: get("CLOUDINARY_CLOUD_NAME"),
            cloudinary_api_key: get("CLOUDINARY_API_KEY"),
            cloudinary_api_secret: get("CLOUDINARY_API_SECRET"),
            cloudinary_folder: get("CLOUDINARY_FOLDER").unwrap_or_else(|| "fixin5mins".to_string()),

            browser_bin: get("BROWSER_BIN").unwrap_or_else(|| "chromium".to_string()),
            screenshot_timeout: get("SCREENSHOT_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|&secs: &u64| secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SCREENSHOT_TIMEOUT),
            health_port,
        })
    }

    /// Instagram Graph API credentials, or an error naming what is missing
    pub fn instagram_credentials(&self) -> Result<InstagramCredentials> {
        let missing = missing_vars(&[
            ("INSTAGRAM_ACCESS_TOKEN", &self.instagram_access_token),
            ("INSTAGRAM_BUSINESS_ACCOUNT_ID", &self.instagram_account_id),
        ]);

        match (&self.instagram_access_token, &self.instagram_account_id) {
            (Some(access_token), Some(account_id)) => Ok(InstagramCredentials {
                access_token: access_token.clone(),
                account_id: account_id.clone(),
            }),
            _ => Err(anyhow::anyhow!("Instagram credentials not configured"))
                .with_context(|| format!("Set {} in the environment", missing.join(" and "))),
        }
    }

    pub fn cloudinary_credentials(&self) -> Result<CloudinaryCredentials> {
        let missing = missing_vars(&[
            ("CLOUDINARY_CLOUD_NAME", &self.cloudinary_cloud_name),
            ("CLOUDINARY_API_KEY", &self.cloudinary_api_key),
            ("CLOUDINARY_API_SECRET", &self.cloudinary_api_secret),
        ]);

        match (&self.cloudinary_cloud_name, &self.cloudinary_api_key, &self.cloudinary_api_secret) {
            (Some(cloud_name), Some(api_key), Some(api_secret)) => Ok(CloudinaryCredentials {
                cloud_name: cloud_name.clone(),
                api_key: api_key.clone(),
                api_secret: api_secret.clone(),
            }),
            _ => Err(anyhow::anyhow!("Cloudinary is not configured"))
                .with_context(|| format!("Set {} in the environment", missing.join(", "))),
        }
    }

    /// The pipeline executable: `PIPELINE_BIN`, else the sibling binary.
    pub fn pipeline_program(&self) -> Result<PathBuf> {
        if let Some(bin) = &self.pipeline_bin {
            return Ok(bin.clone());
        }

        let exe = env::current_exe().context("Failed to locate the running executable")?;
        let dir = exe
            .parent()
            .context("Running executable has no parent directory")?;
        Ok(dir.join(format!("{}{}", PIPELINE_BIN_NAME, env::consts::EXE_SUFFIX)))
    }
}

fn missing_vars<'a>(vars: &[(&'a str, &Option<String>)]) -> Vec<&'a str> {
    vars.iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| *name)
        .collect()
}

/// HTTP client shared by the API integrations
pub fn http_client() -> Result<reqwest::Client> {
    http_client_with_timeouts(HTTP_REQUEST_TIMEOUT, HTTP_CONNECT_TIMEOUT)
}

pub fn http_client_with_timeouts(request: Duration, connect: Duration) -> Result<reqwest::Client> {
    log::debug!(
        "Creating HTTP client with extended timeouts ({}s request, {}s connect)...",
        request.as_secs(),
        connect.as_secs()
    );

    reqwest::Client::builder()
        .timeout(request)
        .connect_timeout(connect)
        .tcp_keepalive(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(10)
        .build()
        .context("Failed to build HTTP client")
}

/// Install the timed pretty logger. `RUST_LOG` wins over `LOG_LEVEL`; the
/// default level is `info`.
pub fn init_logging() {
    let filter = env::var("RUST_LOG")
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| env::var("LOG_LEVEL").ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "info".to_string());

    let mut builder = pretty_env_logger::formatted_timed_builder();
    builder.parse_filters(&filter);
    if builder.try_init().is_err() {
        log::debug!("Logger already initialized");
    }
}
