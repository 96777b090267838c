//! Daily Instagram Autoposter Library
//!
//! Core functionality for the "fix your life in 5 minutes" autoposter: topic
//! and template rotation, daily slot scheduling, and the content pipeline
//! (AI copy, image rendering, hosting and Instagram publishing).

pub mod ai;
pub mod cdn;
pub mod config;
pub mod http_server;
pub mod instagram;
pub mod pipeline;
pub mod render;
pub mod schedule_config;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod templates;
pub mod topics;
