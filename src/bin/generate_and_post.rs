//! Generate and Post
//!
//! One-shot content pipeline: pick a topic, write the copy, render it onto a
//! template and publish it to Instagram. Spawned by the scheduler for every
//! slot; also runnable by hand.

use anyhow::{Context, Result};
use clap::Parser;
use insta_autoposter::ai::AiClient;
use insta_autoposter::cdn::CloudinaryClient;
use insta_autoposter::config::{self, Config};
use insta_autoposter::instagram::GraphApiPublisher;
use insta_autoposter::pipeline::{Pipeline, PipelineOptions};
use insta_autoposter::render::HtmlScreenshotRenderer;
use insta_autoposter::templates::DEFAULT_TEMPLATE;
use insta_autoposter::topics::TopicRotation;

#[derive(Debug, Parser)]
#[command(name = "generate-and-post", version, about = "Generate a 5-minute fix post and publish it to Instagram")]
struct Cli {
    /// Topic to write about (defaults to the least recently used topic)
    #[arg(short = 't', long)]
    topic: Option<String>,

    /// Pick the least recently used topic from this category
    #[arg(short = 'c', long)]
    category: Option<String>,

    /// Template to render
    #[arg(short = 'T', long, default_value = DEFAULT_TEMPLATE)]
    template: String,

    /// Render and upload, but do not publish
    #[arg(short = 's', long)]
    skip_posting: bool,

    /// Fail instead of falling back to mock content when the AI service fails
    #[arg(short = 'f', long)]
    force: bool,

    /// Use built-in mock content instead of the AI service
    #[arg(short = 'm', long)]
    mock: bool,

    /// List topic categories and exit
    #[arg(short = 'l', long)]
    list_categories: bool,
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    config::init_logging();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        log::error!("Error in content generation and posting process: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = Config::from_env().context("Failed to load configuration")?;
    let topics = TopicRotation::json(&cfg.topic_cache_path, &cfg.category_cache_path, cfg.topic_cache_capacity);

    if cli.list_categories {
        println!("Available categories:");
        for category in topics.categories() {
            println!("  {:<16} {}", category.category, category.description);
        }
        return Ok(());
    }

    // Required collaborators
    let generator = AiClient::new(cfg.ai_base_url.clone(), cfg.ai_api_key.clone(), cfg.ai_models.clone())?;
    let renderer = HtmlScreenshotRenderer::new(&cfg.templates_dir, &cfg.output_dir, cfg.browser_bin.clone())
        .with_timeout(cfg.screenshot_timeout);

    let mut pipeline = Pipeline::new(topics, Box::new(generator), Box::new(renderer), cfg.instagram_handle.clone());

    // Optional ones; the pipeline reports which is missing when it needs it
    match cfg.cloudinary_credentials() {
        Ok(credentials) => {
            pipeline = pipeline.with_image_host(Box::new(CloudinaryClient::new(
                credentials,
                cfg.cloudinary_folder.clone(),
            )?));
        }
        Err(e) => log::warn!("{:#}", e),
    }

    if !cli.skip_posting {
        match cfg.instagram_credentials() {
            Ok(credentials) => {
                pipeline = pipeline.with_publisher(Box::new(GraphApiPublisher::new(
                    credentials,
                    cfg.graph_api_url.clone(),
                )?));
            }
            Err(e) => log::warn!("{:#}", e),
        }
    }

    let options = PipelineOptions {
        topic: cli.topic,
        category: cli.category,
        template: cli.template,
        skip_posting: cli.skip_posting,
        force: cli.force,
        mock: cli.mock,
    };

    let report = pipeline.run(&options).await?;
    match report.post_id {
        Some(post_id) => log::info!("Posted \"{}\" as {}", report.topic, post_id),
        None => log::info!("Generated \"{}\" at {}", report.topic, report.image_path.display()),
    }

    Ok(())
}
