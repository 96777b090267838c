//! Template Rotation Module
//!
//! Picks the visual template for each scheduled post, never repeating the
//! template used by the previous post when there is any alternative.

use rand::seq::SliceRandom;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use crate::state::{SchedulerStateStore, StateUpdate};

/// Used when the template directory cannot be read.
pub const FALLBACK_TEMPLATES: [&str; 3] = ["motivation-accent", "quote-red", "self-love-gradient"];

/// Used when the catalog is readable but empty.
pub const DEFAULT_TEMPLATE: &str = "quote-red";

/// Source of template ids.
pub trait TemplateCatalog: Send + Sync {
    fn list_template_ids(&self) -> io::Result<Vec<String>>;
}

/// Every subdirectory of `root` is a template, named after the directory.
#[derive(Debug, Clone)]
pub struct DirectoryCatalog {
    root: PathBuf,
}

impl DirectoryCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl TemplateCatalog for DirectoryCatalog {
    fn list_template_ids(&self) -> io::Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

pub struct TemplateRotation {
    catalog: Box<dyn TemplateCatalog>,
    state: Arc<SchedulerStateStore>,
}

impl TemplateRotation {
    pub fn new(catalog: impl TemplateCatalog + 'static, state: Arc<SchedulerStateStore>) -> Self {
        Self {
            catalog: Box::new(catalog),
            state,
        }
    }

    pub fn state(&self) -> &SchedulerStateStore {
        &self.state
    }

    /// Template ids from the catalog, or the built-in list if it is unreadable.
    pub fn available_templates(&self) -> Vec<String> {
        match self.catalog.list_template_ids() {
            Ok(ids) => ids,
            Err(e) => {
                log::error!("Failed to read templates directory: {}", e);
                FALLBACK_TEMPLATES.iter().map(|t| t.to_string()).collect()
            }
        }
    }

    /// Random template other than the last one used, recorded as the new last.
    pub fn select_next_template(&self) -> String {
        let templates = self.available_templates();

        match templates.len() {
            0 => {
                log::warn!("No templates found, using default \"{}\"", DEFAULT_TEMPLATE);
                return DEFAULT_TEMPLATE.to_string();
            }
            1 => return templates[0].clone(),
            _ => {}
        }

        let last_used = self.state.read().last_used_template;
        let candidates: Vec<&String> = templates.iter().filter(|t| **t != last_used).collect();

        let Some(selected) = candidates.choose(&mut rand::thread_rng()).map(|t| (*t).clone()) else {
            return DEFAULT_TEMPLATE.to_string();
        };

        log::debug!("Selected template \"{}\" (previous: \"{}\")", selected, last_used);
        self.state.write(StateUpdate::template(selected.clone()));
        selected
    }
}
