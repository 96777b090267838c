//! Topic Rotation Module
//!
//! Two-level least-recently-used rotation over categories and the topics
//! inside them. Picking a topic also marks it used, so consecutive posts walk
//! through every category before one repeats.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::store::{JsonFileStore, MemoryStore, Store};

pub const DEFAULT_MAX_TOPICS: usize = 100;

/// Category assigned to topics nobody has classified.
pub const OTHER_CATEGORY: &str = "other";

const OTHER_DESCRIPTION: &str = "Topics supplied directly by callers";

/// Returned when there is nothing at all to rotate through.
const FALLBACK_TOPIC: &str = "productivity";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicEntry {
    pub topic: String,
    pub category: String,
    /// Milliseconds since the Unix epoch.
    pub last_used: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryInfo {
    pub category: String,
    /// Milliseconds since the Unix epoch.
    pub last_used: i64,
    pub description: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RotationError {
    #[error("Category \"{0}\" does not exist")]
    UnknownCategory(String),

    #[error("No topics found in category \"{0}\"")]
    EmptyCategory(String),
}

pub struct TopicRotation {
    topics: Vec<TopicEntry>,
    categories: Vec<CategoryInfo>,
    max_topics: usize,
    topic_store: Box<dyn Store<Vec<TopicEntry>>>,
    category_store: Box<dyn Store<Vec<CategoryInfo>>>,
}

impl TopicRotation {
    /// Load both collections, seeding defaults when either one is empty.
    pub fn new(
        topic_store: impl Store<Vec<TopicEntry>> + 'static,
        category_store: impl Store<Vec<CategoryInfo>> + 'static,
        max_topics: usize,
    ) -> Self {
        let mut rotation = Self {
            topics: load_collection(&topic_store),
            categories: load_collection(&category_store),
            max_topics,
            topic_store: Box::new(topic_store),
            category_store: Box::new(category_store),
        };

        if rotation.topics.is_empty() || rotation.categories.is_empty() {
            log::info!("Topic cache is empty, seeding default topics");
            rotation.seed_defaults(now_millis());
        }

        rotation
    }

    pub fn json(topic_path: impl Into<PathBuf>, category_path: impl Into<PathBuf>, max_topics: usize) -> Self {
        Self::new(
            JsonFileStore::new(topic_path),
            JsonFileStore::new(category_path),
            max_topics,
        )
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new(), MemoryStore::new(), DEFAULT_MAX_TOPICS)
    }

    /// Least recently used category.
    ///
    /// With `update_timestamp` the category is marked used right away;
    /// otherwise the bump is left to the topic selection that follows.
    pub fn least_recently_used_category(&mut self, update_timestamp: bool) -> String {
        let Some(index) = oldest_index(&self.categories, |c| c.last_used) else {
            return FALLBACK_TOPIC.to_string();
        };

        let category = self.categories[index].category.clone();
        log::info!(
            "Least recently used category: \"{}\" (timestamp: {})",
            category,
            self.categories[index].last_used
        );

        if update_timestamp {
            let now = now_millis();
            self.categories[index].last_used = now;
            log::info!("Updated category \"{}\" timestamp to {}", category, now);
            self.save();
        }

        category
    }

    /// Least recently used topic from the least recently used category.
    pub fn least_recently_used_topic(&mut self) -> String {
        let category = self.least_recently_used_category(false);

        let topic = match self.oldest_topic_in(&category) {
            Some(topic) => topic,
            None => {
                let fallback = oldest_index(&self.topics, |t| t.last_used)
                    .map(|i| self.topics[i].topic.clone())
                    .unwrap_or_else(|| FALLBACK_TOPIC.to_string());
                log::warn!(
                    "No topics found in category \"{}\", using fallback topic \"{}\"",
                    category,
                    fallback
                );
                fallback
            }
        };

        self.update_topic_usage(&topic);
        topic
    }

    /// Least recently used topic within a named category.
    pub fn least_recently_used_topic_from_category(&mut self, category: &str) -> Result<String, RotationError> {
        let Some(category_index) = self.categories.iter().position(|c| c.category == category) else {
            return Err(RotationError::UnknownCategory(category.to_string()));
        };

        let topic = self
            .oldest_topic_in(category)
            .ok_or_else(|| RotationError::EmptyCategory(category.to_string()))?;

        log::info!("Found least recently used topic \"{}\" in category \"{}\"", topic, category);

        self.categories[category_index].last_used = now_millis();
        self.save();

        self.update_topic_usage(&topic);
        Ok(topic)
    }

    /// Mark a topic as used now, creating it under `other` if it is new.
    pub fn update_topic_usage(&mut self, topic: &str) {
        let now = now_millis();
        let needle = topic.to_lowercase();

        match self.topics.iter_mut().find(|t| t.topic.to_lowercase() == needle) {
            Some(entry) => {
                entry.last_used = now;
                let category = entry.category.clone();
                if let Some(info) = self.categories.iter_mut().find(|c| c.category == category) {
                    info.last_used = now;
                }
                log::info!("Updated topic \"{}\" and category \"{}\" timestamps to {}", topic, category, now);
            }
            None => {
                self.add_topic(topic, OTHER_CATEGORY, now);
                log::info!("Added new topic \"{}\" to \"{}\" category", topic, OTHER_CATEGORY);
            }
        }

        self.save();
    }

    pub fn categories(&self) -> Vec<CategoryInfo> {
        self.categories.clone()
    }

    pub fn topics(&self) -> &[TopicEntry] {
        &self.topics
    }

    fn oldest_topic_in(&self, category: &str) -> Option<String> {
        self.topics
            .iter()
            .filter(|t| t.category == category)
            .min_by_key(|t| t.last_used)
            .map(|t| t.topic.clone())
    }

    fn add_topic(&mut self, topic: &str, category: &str, now: i64) {
        self.topics.push(TopicEntry {
            topic: topic.to_string(),
            category: category.to_string(),
            last_used: now,
        });

        // Registering the category keeps every topic reachable through
        // category rotation and listing.
        if !self.categories.iter().any(|c| c.category == category) {
            self.categories.push(CategoryInfo {
                category: category.to_string(),
                last_used: now,
                description: OTHER_DESCRIPTION.to_string(),
            });
        }

        if self.topics.len() > self.max_topics {
            if let Some(index) = oldest_index(&self.topics, |t| t.last_used) {
                let evicted = self.topics.remove(index);
                log::debug!("Evicted least recently used topic \"{}\"", evicted.topic);
            }
        }
    }

    fn seed_defaults(&mut self, now: i64) {
        self.categories = DEFAULT_CATEGORIES
            .iter()
            .enumerate()
            .map(|(i, (category, description))| CategoryInfo {
                category: category.to_string(),
                last_used: now - 10_000_000 + (i as i64) * 500_000,
                description: description.to_string(),
            })
            .collect();

        // Staggered so the seed order is also the initial rotation order.
        self.topics = DEFAULT_TOPICS
            .iter()
            .flat_map(|(category, topics)| topics.iter().map(move |topic| (*category, *topic)))
            .enumerate()
            .map(|(i, (category, topic))| TopicEntry {
                topic: topic.to_string(),
                category: category.to_string(),
                last_used: now - (10_000_000 - (i as i64) * 1000),
            })
            .collect();

        self.save();
    }

    fn save(&self) {
        if let Err(e) = self.topic_store.save(&self.topics) {
            log::warn!("Failed to save topic cache: {}", e);
        }
        if let Err(e) = self.category_store.save(&self.categories) {
            log::warn!("Failed to save category cache: {}", e);
        }
        log::debug!(
            "Saved {} topics and {} categories",
            self.topics.len(),
            self.categories.len()
        );
    }
}

fn load_collection<T>(store: &dyn Store<Vec<T>>) -> Vec<T> {
    match store.load() {
        Ok(Some(items)) => items,
        Ok(None) => Vec::new(),
        Err(e) => {
            log::warn!("Failed to load topic cache: {}", e);
            Vec::new()
        }
    }
}

/// Index of the smallest timestamp; ties go to the earliest entry.
fn oldest_index<T>(items: &[T], last_used: impl Fn(&T) -> i64) -> Option<usize> {
    items
        .iter()
        .enumerate()
        .min_by_key(|(_, item)| last_used(item))
        .map(|(i, _)| i)
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

const DEFAULT_CATEGORIES: [(&str, &str); 10] = [
    ("productivity", "Efficiency, task management, and getting things done"),
    ("mindfulness", "Awareness, presence, and mental practices"),
    ("physical_health", "Exercise, nutrition, and bodily wellbeing"),
    ("mental_health", "Emotional wellness, psychology, and personal stability"),
    ("relationships", "Interpersonal connections and social skills"),
    ("career", "Professional growth and workplace success"),
    ("learning", "Knowledge acquisition and cognitive skills"),
    ("creativity", "Artistic expression and innovative thinking"),
    ("financial", "Money management and financial wellbeing"),
    ("personal_growth", "Self-improvement and character development"),
];

const DEFAULT_TOPICS: [(&str, [&str; 10]); 10] = [
    ("productivity", [
        "productivity", "time management", "procrastination", "focus", "task prioritization",
        "goal setting", "habits", "morning routine", "evening routine", "digital detox",
    ]),
    ("mindfulness", [
        "mindfulness", "meditation", "breathing exercises", "stress reduction", "anxiety relief",
        "gratitude practice", "journaling", "present moment awareness", "mindful eating", "body scan",
    ]),
    ("physical_health", [
        "exercise", "hydration", "nutrition", "sleep hygiene", "posture",
        "stretching", "walking", "strength training", "cardio workouts", "quick workouts",
    ]),
    ("mental_health", [
        "mental clarity", "emotional intelligence", "positive thinking", "self-compassion", "confidence",
        "resilience", "boundaries", "imposter syndrome", "perfectionism", "burnout prevention",
    ]),
    ("relationships", [
        "communication skills", "active listening", "conflict resolution", "relationship building", "networking",
        "social connections", "family time", "friendship maintenance", "empathy development", "forgiveness",
    ]),
    ("career", [
        "career growth", "work-life balance", "remote work", "leadership skills", "public speaking",
        "interview preparation", "resume building", "email management", "meeting efficiency", "professional development",
    ]),
    ("learning", [
        "learning techniques", "note-taking", "speed reading", "memory improvement", "knowledge retention",
        "skill acquisition", "curiosity cultivation", "continuous learning", "information processing", "critical thinking",
    ]),
    ("creativity", [
        "creative thinking", "idea generation", "problem solving", "innovation", "brainstorming",
        "creative writing", "artistic expression", "design thinking", "creative blocks", "inspiration finding",
    ]),
    ("financial", [
        "money management", "saving habits", "budgeting", "expense tracking", "financial goals",
        "investing basics", "debt reduction", "financial mindset", "impulse buying", "money saving",
    ]),
    ("personal_growth", [
        "personal growth", "self-awareness", "life purpose", "identity", "values clarification",
        "comfort zone expansion", "limiting beliefs", "personal vision", "authenticity", "self-reflection",
    ]),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn category_stamp(rotation: &TopicRotation, name: &str) -> i64 {
        rotation
            .categories()
            .into_iter()
            .find(|c| c.category == name)
            .map(|c| c.last_used)
            .unwrap()
    }

    #[test]
    fn seeds_ten_categories_and_a_full_cache() {
        let rotation = TopicRotation::in_memory();
        assert_eq!(rotation.categories().len(), 10);
        assert_eq!(rotation.topics().len(), DEFAULT_MAX_TOPICS);
        assert!(!rotation.categories().iter().any(|c| c.category == OTHER_CATEGORY));
    }

    #[test]
    fn category_lookup_without_update_leaves_timestamps_alone() {
        let mut rotation = TopicRotation::in_memory();
        let before = rotation.categories();

        assert_eq!(rotation.least_recently_used_category(false), "productivity");
        assert_eq!(rotation.categories(), before);

        assert_eq!(rotation.least_recently_used_category(true), "productivity");
        assert!(category_stamp(&rotation, "productivity") > before[0].last_used);
        assert_eq!(rotation.least_recently_used_category(false), "mindfulness");
    }

    #[test]
    fn consecutive_topics_come_from_different_categories() {
        let mut rotation = TopicRotation::in_memory();

        let first = rotation.least_recently_used_topic();
        let second = rotation.least_recently_used_topic();
        let third = rotation.least_recently_used_topic();

        assert_eq!(first, "productivity");
        assert_eq!(second, "mindfulness");
        assert_eq!(third, "exercise");
    }

    #[test]
    fn category_pick_skips_recently_used_topic() {
        let mut rotation = TopicRotation::in_memory();

        rotation.update_topic_usage("Productivity");
        let picked = rotation
            .least_recently_used_topic_from_category("productivity")
            .unwrap();

        assert_eq!(picked, "time management");
        assert_ne!(
            rotation.least_recently_used_topic_from_category("productivity").unwrap(),
            "time management"
        );
    }

    #[test]
    fn unknown_category_is_an_error() {
        let mut rotation = TopicRotation::in_memory();
        assert_eq!(
            rotation.least_recently_used_topic_from_category("nonexistent"),
            Err(RotationError::UnknownCategory("nonexistent".to_string()))
        );
    }

    #[test]
    fn empty_category_is_an_error() {
        let categories = vec![
            CategoryInfo {
                category: "career".to_string(),
                last_used: 1,
                description: String::new(),
            },
            CategoryInfo {
                category: "hobbies".to_string(),
                last_used: 2,
                description: String::new(),
            },
        ];
        let topics = vec![TopicEntry {
            topic: "remote work".to_string(),
            category: "career".to_string(),
            last_used: 1,
        }];
        let mut rotation = TopicRotation::new(
            MemoryStore::with_value(topics),
            MemoryStore::with_value(categories),
            DEFAULT_MAX_TOPICS,
        );

        assert_eq!(
            rotation.least_recently_used_topic_from_category("hobbies"),
            Err(RotationError::EmptyCategory("hobbies".to_string()))
        );
    }

    #[test]
    fn empty_lru_category_falls_back_to_global_lru_topic() {
        let categories = vec![
            CategoryInfo {
                category: "hobbies".to_string(),
                last_used: 1,
                description: String::new(),
            },
            CategoryInfo {
                category: "career".to_string(),
                last_used: 2,
                description: String::new(),
            },
        ];
        let topics = vec![
            TopicEntry {
                topic: "public speaking".to_string(),
                category: "career".to_string(),
                last_used: 20,
            },
            TopicEntry {
                topic: "remote work".to_string(),
                category: "career".to_string(),
                last_used: 10,
            },
        ];
        let mut rotation = TopicRotation::new(
            MemoryStore::with_value(topics),
            MemoryStore::with_value(categories),
            DEFAULT_MAX_TOPICS,
        );

        assert_eq!(rotation.least_recently_used_topic(), "remote work");
        assert!(category_stamp(&rotation, "career") > 2);
    }

    #[test]
    fn unseen_topic_evicts_global_lru_at_capacity() {
        let mut rotation = TopicRotation::in_memory();
        assert_eq!(rotation.topics().len(), 100);

        rotation.update_topic_usage("cold showers");

        assert_eq!(rotation.topics().len(), 100);
        assert!(rotation.topics().iter().any(|t| t.topic == "cold showers" && t.category == OTHER_CATEGORY));
        assert!(!rotation.topics().iter().any(|t| t.topic == "productivity"));
        assert!(rotation.categories().iter().any(|c| c.category == OTHER_CATEGORY));
    }

    #[test]
    fn topic_lookup_is_case_insensitive() {
        let mut rotation = TopicRotation::in_memory();
        rotation.update_topic_usage("MEDITATION");

        let matches = rotation
            .topics()
            .iter()
            .filter(|t| t.topic.eq_ignore_ascii_case("meditation"))
            .count();
        assert_eq!(matches, 1);
    }

    #[test]
    fn state_survives_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let topic_path = dir.path().join("temp/topic-cache.json");
        let category_path = dir.path().join("temp/category-cache.json");

        let mut rotation = TopicRotation::json(&topic_path, &category_path, DEFAULT_MAX_TOPICS);
        let first = rotation.least_recently_used_topic();
        drop(rotation);

        let mut reloaded = TopicRotation::json(&topic_path, &category_path, DEFAULT_MAX_TOPICS);
        assert_ne!(reloaded.least_recently_used_topic(), first);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&topic_path).unwrap()).unwrap();
        assert!(raw[0]["lastUsed"].is_i64());
    }
}
