//! AI Content Module
//!
//! Generates the three-part "fix in 5 minutes" copy for a topic through an
//! OpenAI-compatible chat completion API, trying each configured model in
//! turn until one answers with usable JSON.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config;

/// Free models tried in order when no chain is configured.
pub const DEFAULT_MODELS: [&str; 6] = [
    "qwen/qwen3-4b:free",
    "deepseek/deepseek-chat-v3-0324:free",
    "meta-llama/llama-4-maverick:free",
    "meta-llama/llama-3.1-8b-instruct:free",
    "mistralai/mistral-small-3.1-24b-instruct:free",
    "moonshotai/kimi-vl-a3b-thinking:free",
];

const SYSTEM_PROMPT: &str = "Create content with emotional hooks, actionable steps (that can be done in 5 minutes), \
    and emotional rewards. Focus on providing genuine value in a concise format. \
    The emotional hook should resonate with the target audience's pain point. \
    The action step must be something that can be completed in 5 minutes or less. \
    The emotional reward should describe the positive feeling after completing the action.";

/// Hook, action step and reward for one post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionalContent {
    pub emotional_hook: String,
    pub action_step: String,
    pub emotional_reward: String,
}

impl EmotionalContent {
    pub fn caption(&self) -> String {
        format!(
            "{}\n\n{}\n\n{}",
            self.emotional_hook, self.action_step, self.emotional_reward
        )
    }
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate_emotional_content(&self, topic: &str) -> Result<EmotionalContent>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct AiClient {
    base_url: String,
    api_key: Option<String>,
    models: Vec<String>,
    http_client: reqwest::Client,
}

impl AiClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, models: Vec<String>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            api_key,
            models,
            http_client: config::http_client()?,
        })
    }

    /// Run one prompt against the model chain; the first successful reply wins.
    pub async fn complete(&self, prompt: &str, system_prompt: &str) -> Result<String> {
        let mut last_error = None;

        for model in &self.models {
            match self.complete_with_model(model, prompt, system_prompt).await {
                Ok(output) => return Ok(output),
                Err(e) => {
                    log::warn!("Model {} failed, trying next model: {:#}", model, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("No AI models configured")))
    }

    async fn complete_with_model(&self, model: &str, prompt: &str, system_prompt: &str) -> Result<String> {
        log::debug!("Requesting completion from {}", model);

        let request = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: 0.7,
            max_tokens: 1000,
        };

        let mut builder = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .context("Failed to send chat completion request")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            anyhow::bail!("AI service error (status {}): {}", status, error_text);
        }

        let response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("No completion returned")
    }
}

#[async_trait]
impl ContentGenerator for AiClient {
    async fn generate_emotional_content(&self, topic: &str) -> Result<EmotionalContent> {
        let prompt = emotional_prompt(topic)?;
        let raw = self.complete(&prompt, SYSTEM_PROMPT).await?;
        parse_json_reply(&raw)
    }
}

fn emotional_prompt(topic: &str) -> Result<String> {
    let example = EmotionalContent {
        emotional_hook: "Feeling overwhelmed by your to-do list?".to_string(),
        action_step: "Spend 5 minutes making a simple daily task planner to stay focused and productive.".to_string(),
        emotional_reward: "Regain a sense of calm and control over your day.".to_string(),
    };
    let schema = serde_json::to_string_pretty(&example).context("Failed to serialize content schema")?;

    Ok(format!(
        "Create a 'fix in 5 minutes' content piece about {}\n\n\
        Please respond with valid JSON that follows this structure:\n{}\n\n\
        Respond ONLY with the JSON, no other text.",
        topic, schema
    ))
}

/// Parse a model reply as JSON, falling back to the first `{...}` span when
/// the model wrapped the object in prose or code fences.
pub fn parse_json_reply<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    let direct = serde_json::from_str(raw.trim());
    if let Ok(value) = direct {
        return Ok(value);
    }

    let extracted = match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => raw,
    };

    serde_json::from_str(extracted).with_context(|| format!("Failed to parse AI response as JSON: {}", raw))
}

/// Canned copy for offline runs and AI outages.
pub fn mock_content(topic: &str) -> EmotionalContent {
    let canned = match topic.to_lowercase().as_str() {
        "productivity" => Some((
            "Feeling overwhelmed by your to-do list?",
            "Spend 5 minutes prioritizing just your top 3 tasks for today.",
            "Experience immediate relief and clarity about what truly matters.",
        )),
        "exercise" => Some((
            "Finding it hard to fit workouts into your busy schedule?",
            "Try a 5-minute high-intensity interval routine right where you are.",
            "Feel energized and proud that you prioritized your health today.",
        )),
        "mindfulness" => Some((
            "Mind racing with too many thoughts?",
            "Take 5 minutes to focus only on your breathing: in for 4, hold for 4, out for 4.",
            "Return to your tasks with a calmer mind and renewed focus.",
        )),
        "stress" => Some((
            "Feeling tense and stressed out?",
            "Spend 5 minutes doing progressive muscle relaxation, tensing and releasing each muscle group.",
            "Experience immediate physical relief and a clearer mindset.",
        )),
        "focus" => Some((
            "Struggling to concentrate on important work?",
            "Set a 5-minute timer and work on just one task with zero distractions.",
            "Build momentum and break through the mental block that was holding you back.",
        )),
        _ => None,
    };

    match canned {
        Some((hook, action, reward)) => EmotionalContent {
            emotional_hook: hook.to_string(),
            action_step: action.to_string(),
            emotional_reward: reward.to_string(),
        },
        None => EmotionalContent {
            emotional_hook: format!("Feeling challenged with {}?", topic),
            action_step: format!(
                "Take 5 minutes to write down one small step you can take today to improve your {}.",
                topic
            ),
            emotional_reward: format!(
                "Gain confidence and direction in your {} journey with this simple action.",
                topic
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json_reply() {
        let raw = r#"{"emotionalHook":"Tired?","actionStep":"Drink water.","emotionalReward":"Feel fresh."}"#;
        let content: EmotionalContent = parse_json_reply(raw).unwrap();
        assert_eq!(content.emotional_hook, "Tired?");
        assert_eq!(content.action_step, "Drink water.");
    }

    #[test]
    fn extracts_json_wrapped_in_prose() {
        let raw = "Sure! Here you go:\n```json\n{\"emotionalHook\":\"Stuck?\",\"actionStep\":\"Walk.\",\"emotionalReward\":\"Unstuck.\"}\n```";
        let content: EmotionalContent = parse_json_reply(raw).unwrap();
        assert_eq!(content.emotional_reward, "Unstuck.");
    }

    #[test]
    fn rejects_reply_without_json() {
        assert!(parse_json_reply::<EmotionalContent>("I cannot help with that").is_err());
    }

    #[test]
    fn mock_content_is_topic_aware() {
        assert_eq!(
            mock_content("Focus").emotional_hook,
            "Struggling to concentrate on important work?"
        );
        assert_eq!(mock_content("budgeting").emotional_hook, "Feeling challenged with budgeting?");
    }

    #[test]
    fn caption_joins_three_parts() {
        let caption = mock_content("productivity").caption();
        assert_eq!(caption.matches("\n\n").count(), 2);
        assert!(caption.starts_with("Feeling overwhelmed"));
    }

    #[test]
    fn prompt_embeds_schema_keys() {
        let prompt = emotional_prompt("sleep hygiene").unwrap();
        assert!(prompt.contains("sleep hygiene"));
        assert!(prompt.contains("\"emotionalHook\""));
        assert!(prompt.contains("\"emotionalReward\""));
    }

    #[tokio::test]
    async fn empty_model_chain_is_an_error() {
        let client = AiClient::new("http://127.0.0.1:9", None, Vec::new()).unwrap();
        let err = client.complete("hi", "sys").await.unwrap_err();
        assert!(err.to_string().contains("No AI models configured"));
    }
}
