//! Content Pipeline Module
//!
//! One end-to-end post: resolve a topic, write the copy, render it onto a
//! template, host the image and publish it to Instagram, then clean up.

use anyhow::{Context, Result};
use chrono::Local;
use std::path::{Path, PathBuf};

use crate::ai::{mock_content, ContentGenerator, EmotionalContent};
use crate::cdn::{HostedImage, ImageHost};
use crate::instagram::{format_caption, Publisher, DEFAULT_HASHTAGS};
use crate::render::{ImageRenderer, TemplateVariables};
use crate::templates::DEFAULT_TEMPLATE;
use crate::topics::TopicRotation;

pub const HEADING: &str = "Fix your life in 5 minutes";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub topic: Option<String>,
    pub category: Option<String>,
    pub template: String,
    pub skip_posting: bool,
    /// AI failures are fatal instead of falling back to canned copy.
    pub force: bool,
    pub mock: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            topic: None,
            category: None,
            template: DEFAULT_TEMPLATE.to_string(),
            skip_posting: false,
            force: false,
            mock: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub topic: String,
    pub content: EmotionalContent,
    pub image_path: PathBuf,
    pub hosted: HostedImage,
    /// `None` when posting was skipped.
    pub post_id: Option<String>,
}

pub struct Pipeline {
    topics: TopicRotation,
    generator: Box<dyn ContentGenerator>,
    renderer: Box<dyn ImageRenderer>,
    image_host: Option<Box<dyn ImageHost>>,
    publisher: Option<Box<dyn Publisher>>,
    handle: String,
}

impl Pipeline {
    pub fn new(
        topics: TopicRotation,
        generator: Box<dyn ContentGenerator>,
        renderer: Box<dyn ImageRenderer>,
        handle: impl Into<String>,
    ) -> Self {
        Self {
            topics,
            generator,
            renderer,
            image_host: None,
            publisher: None,
            handle: handle.into(),
        }
    }

    pub fn with_image_host(mut self, host: Box<dyn ImageHost>) -> Self {
        self.image_host = Some(host);
        self
    }

    pub fn with_publisher(mut self, publisher: Box<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn topics(&self) -> &TopicRotation {
        &self.topics
    }

    pub async fn run(&mut self, options: &PipelineOptions) -> Result<PipelineReport> {
        // Pick the topic and write the copy
        let topic = resolve_topic(&mut self.topics, options.topic.as_deref(), options.category.as_deref());
        log::info!("Generating content for topic: {}", topic);

        let content = self.content_for(&topic, options).await?;
        log::info!("Emotional Hook: {}", content.emotional_hook);
        log::info!("Action Step: {}", content.action_step);
        log::info!("Emotional Reward: {}", content.emotional_reward);

        // Render the image
        log::info!("Generating image with template: {}", options.template);
        let variables = template_variables(&content, &topic, &self.handle);
        let image_path = self
            .renderer
            .render(&options.template, &variables)
            .await
            .with_context(|| format!("Failed to render template \"{}\"", options.template))?;
        log::info!("Successfully generated image: {}", image_path.display());

        // Upload it so Instagram can fetch it
        let host = self
            .image_host
            .as_ref()
            .context("Cloudinary is not configured. Cannot upload images.")?;
        let hosted = host.upload(&image_path).await.context("Image upload failed")?;
        log::info!("Image uploaded to Cloudinary: {}", hosted.url);

        if options.skip_posting {
            log::info!("Skipping Instagram posting (--skip-posting flag provided)");
            log::info!("Image generated at: {}", image_path.display());
            log::info!("Image hosted on Cloudinary at: {}", hosted.url);
            return Ok(PipelineReport {
                topic,
                content,
                image_path,
                hosted,
                post_id: None,
            });
        }

        let publisher = self.publisher.as_ref().context(
            "Instagram credentials missing. Set INSTAGRAM_ACCESS_TOKEN and INSTAGRAM_BUSINESS_ACCOUNT_ID",
        )?;

        // Publish
        log::info!("Posting content to Instagram...");
        let caption = format_caption(&content.caption(), &DEFAULT_HASHTAGS);
        let post_id = publisher
            .publish(&hosted.url, &caption)
            .await
            .context("Instagram publishing failed")?;
        log::info!("Successfully posted to Instagram! Post ID: {}", post_id);

        // Local file and hosted copy are no longer needed
        cleanup(host.as_ref(), &image_path, &hosted.public_id).await;

        Ok(PipelineReport {
            topic,
            content,
            image_path,
            hosted,
            post_id: Some(post_id),
        })
    }

    async fn content_for(&self, topic: &str, options: &PipelineOptions) -> Result<EmotionalContent> {
        if options.mock {
            log::info!("Using mock content (--mock flag provided)");
            return Ok(mock_content(topic));
        }

        match self.generator.generate_emotional_content(topic).await {
            Ok(content) => Ok(content),
            Err(e) if options.force => Err(e.context("Failed to generate content with AI service")),
            Err(e) => {
                log::warn!("Failed to generate content with AI service: {:#}", e);
                log::info!("Falling back to mock content");
                Ok(mock_content(topic))
            }
        }
    }
}

/// Explicit topic, else the category's LRU topic, else the global LRU topic.
pub fn resolve_topic(rotation: &mut TopicRotation, topic: Option<&str>, category: Option<&str>) -> String {
    if let Some(topic) = topic {
        rotation.update_topic_usage(topic);
        return topic.to_string();
    }

    if let Some(category) = category {
        match rotation.least_recently_used_topic_from_category(category) {
            Ok(topic) => {
                log::info!("Using topic from category \"{}\": {}", category, topic);
                return topic;
            }
            Err(e) => log::warn!("{}. Falling back to least recently used topic.", e),
        }
    }

    let topic = rotation.least_recently_used_topic();
    log::info!("Using least recently used topic: {}", topic);
    topic
}

pub fn template_variables(content: &EmotionalContent, topic: &str, handle: &str) -> TemplateVariables {
    let mut variables = TemplateVariables::new();
    variables.insert("emotionalHook".to_string(), content.emotional_hook.clone());
    variables.insert("actionStep".to_string(), content.action_step.clone());
    variables.insert("emotionalReward".to_string(), content.emotional_reward.clone());
    variables.insert("topic".to_string(), topic.to_string());
    variables.insert("handle".to_string(), handle.to_string());
    variables.insert("heading".to_string(), HEADING.to_string());
    variables.insert("date".to_string(), Local::now().format("%B %Y").to_string());
    variables
}

async fn cleanup(host: &dyn ImageHost, image_path: &Path, public_id: &str) {
    log::info!("Deleting image from Cloudinary (ID: {})...", public_id);
    if let Err(e) = host.delete(public_id).await {
        log::warn!("Error during cleanup of hosted image: {:#}", e);
    }

    log::info!("Deleting local image file: {}...", image_path.display());
    if let Err(e) = tokio::fs::remove_file(image_path).await {
        log::warn!("Error during cleanup of {}: {}", image_path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct FakeGenerator {
        fail: bool,
    }

    #[async_trait]
    impl ContentGenerator for FakeGenerator {
        async fn generate_emotional_content(&self, topic: &str) -> Result<EmotionalContent> {
            if self.fail {
                anyhow::bail!("all models failed");
            }
            Ok(EmotionalContent {
                emotional_hook: format!("AI hook about {}", topic),
                action_step: "AI action".to_string(),
                emotional_reward: "AI reward".to_string(),
            })
        }
    }

    /// Writes a placeholder PNG so cleanup has something to delete.
    struct FakeRenderer {
        dir: PathBuf,
        seen: Arc<Mutex<Vec<TemplateVariables>>>,
    }

    #[async_trait]
    impl ImageRenderer for FakeRenderer {
        async fn render(&self, template_id: &str, variables: &TemplateVariables) -> Result<PathBuf> {
            self.seen.lock().unwrap().push(variables.clone());
            let path = self.dir.join(format!("{}.png", template_id));
            tokio::fs::write(&path, b"png").await?;
            Ok(path)
        }
    }

    #[derive(Default)]
    struct FakeHost {
        deleted: Arc<Mutex<Vec<String>>>,
        fail_delete: bool,
    }

    #[async_trait]
    impl ImageHost for FakeHost {
        async fn upload(&self, path: &Path) -> Result<HostedImage> {
            let stem = path.file_stem().unwrap().to_string_lossy();
            Ok(HostedImage {
                url: format!("https://cdn.test/{}.png", stem),
                public_id: format!("fixin5mins/{}", stem),
            })
        }

        async fn delete(&self, public_id: &str) -> Result<()> {
            if self.fail_delete {
                anyhow::bail!("cdn unavailable");
            }
            self.deleted.lock().unwrap().push(public_id.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakePublisher {
        captions: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Publisher for FakePublisher {
        async fn publish(&self, image_url: &str, caption: &str) -> Result<String> {
            assert!(image_url.starts_with("https://cdn.test/"));
            self.captions.lock().unwrap().push(caption.to_string());
            Ok("ig-123".to_string())
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        dir: PathBuf,
        seen: Arc<Mutex<Vec<TemplateVariables>>>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().to_path_buf();
            Self {
                _dir: dir,
                dir: path,
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn pipeline(&self, generator_fails: bool) -> Pipeline {
            Pipeline::new(
                TopicRotation::in_memory(),
                Box::new(FakeGenerator { fail: generator_fails }),
                Box::new(FakeRenderer {
                    dir: self.dir.clone(),
                    seen: self.seen.clone(),
                }),
                "fixin5mins",
            )
        }
    }

    #[tokio::test]
    async fn full_run_publishes_and_cleans_up() {
        let harness = Harness::new();
        let host = FakeHost::default();
        let deleted = host.deleted.clone();
        let publisher = FakePublisher::default();
        let captions = publisher.captions.clone();

        let mut pipeline = harness
            .pipeline(false)
            .with_image_host(Box::new(host))
            .with_publisher(Box::new(publisher));

        let options = PipelineOptions {
            topic: Some("hydration".to_string()),
            ..PipelineOptions::default()
        };
        let report = pipeline.run(&options).await.unwrap();

        assert_eq!(report.topic, "hydration");
        assert_eq!(report.post_id.as_deref(), Some("ig-123"));
        assert_eq!(report.content.emotional_hook, "AI hook about hydration");
        assert!(!report.image_path.exists());
        assert_eq!(deleted.lock().unwrap().as_slice(), ["fixin5mins/quote-red"]);

        let captions = captions.lock().unwrap();
        assert!(captions[0].starts_with("AI hook about hydration\n\nAI action\n\nAI reward\n\n#productivity"));

        let seen = harness.seen.lock().unwrap();
        assert_eq!(seen[0]["heading"], HEADING);
        assert_eq!(seen[0]["handle"], "fixin5mins");
        assert_eq!(seen[0]["topic"], "hydration");
    }

    #[tokio::test]
    async fn skip_posting_stops_after_upload_without_cleanup() {
        let harness = Harness::new();
        let host = FakeHost::default();
        let deleted = host.deleted.clone();
        let mut pipeline = harness.pipeline(false).with_image_host(Box::new(host));

        let options = PipelineOptions {
            skip_posting: true,
            mock: true,
            ..PipelineOptions::default()
        };
        let report = pipeline.run(&options).await.unwrap();

        assert!(report.post_id.is_none());
        assert!(report.image_path.exists());
        assert!(deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_publisher_is_an_error() {
        let harness = Harness::new();
        let mut pipeline = harness.pipeline(false).with_image_host(Box::new(FakeHost::default()));

        let err = pipeline.run(&PipelineOptions::default()).await.unwrap_err();
        assert!(err.to_string().contains("INSTAGRAM_ACCESS_TOKEN"));
    }

    #[tokio::test]
    async fn missing_image_host_is_an_error() {
        let harness = Harness::new();
        let mut pipeline = harness.pipeline(false);

        let err = pipeline.run(&PipelineOptions::default()).await.unwrap_err();
        assert!(err.to_string().contains("Cloudinary is not configured"));
    }

    #[tokio::test]
    async fn ai_failure_falls_back_to_mock_unless_forced() {
        let harness = Harness::new();
        let options = PipelineOptions {
            topic: Some("focus".to_string()),
            skip_posting: true,
            ..PipelineOptions::default()
        };

        let mut pipeline = harness.pipeline(true).with_image_host(Box::new(FakeHost::default()));
        let report = pipeline.run(&options).await.unwrap();
        assert_eq!(report.content, mock_content("focus"));

        let forced = PipelineOptions {
            force: true,
            ..options
        };
        let mut pipeline = harness.pipeline(true).with_image_host(Box::new(FakeHost::default()));
        assert!(pipeline.run(&forced).await.is_err());
    }

    #[tokio::test]
    async fn cleanup_failures_do_not_fail_the_run() {
        let harness = Harness::new();
        let host = FakeHost {
            fail_delete: true,
            ..FakeHost::default()
        };
        let mut pipeline = harness
            .pipeline(false)
            .with_image_host(Box::new(host))
            .with_publisher(Box::new(FakePublisher::default()));

        let report = pipeline.run(&PipelineOptions::default()).await.unwrap();
        assert_eq!(report.post_id.as_deref(), Some("ig-123"));
    }

    #[test]
    fn unknown_category_falls_back_to_global_lru() {
        let mut rotation = TopicRotation::in_memory();
        let topic = resolve_topic(&mut rotation, None, Some("nonexistent"));
        assert_eq!(topic, "productivity");
    }

    #[test]
    fn category_and_explicit_topic_resolution() {
        let mut rotation = TopicRotation::in_memory();
        assert_eq!(resolve_topic(&mut rotation, None, Some("financial")), "money management");
        assert_eq!(resolve_topic(&mut rotation, Some("cold showers"), Some("financial")), "cold showers");
        assert!(rotation.topics().iter().any(|t| t.topic == "cold showers"));
    }
}
