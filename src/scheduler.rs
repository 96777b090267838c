//! Scheduler Module
//!
//! Resident daily scheduler. On start and at every local midnight it plans
//! the day's posting slots, arms a one-shot timer per slot, and when a timer
//! fires it picks a template and runs the content pipeline as a child process.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, TimeZone, Utc};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinSet;

use crate::schedule_config::{
    format_date_to_cron, random_time_in_window_on, OptimalTimes, EVENING_WINDOW, MORNING_WINDOW,
};
use crate::state::StateUpdate;
use crate::templates::TemplateRotation;

/// How the day's slots are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ScheduleMode {
    /// One slot per optimal time configured for the weekday.
    Optimal,
    /// One random slot in the morning window and one in the evening window.
    Windows,
}

/// Arguments for one run of the content pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PipelineRequest {
    pub template: String,
    pub topic: Option<String>,
    pub category: Option<String>,
    pub skip_posting: bool,
    pub mock: bool,
}

impl PipelineRequest {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["--template".to_string(), self.template.clone()];
        if let Some(topic) = &self.topic {
            args.push("--topic".to_string());
            args.push(topic.clone());
        }
        if let Some(category) = &self.category {
            args.push("--category".to_string());
            args.push(category.clone());
        }
        if self.skip_posting {
            args.push("--skip-posting".to_string());
        }
        if self.mock {
            args.push("--mock".to_string());
        }
        args
    }
}

/// Flags forwarded to every scheduled pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineFlags {
    pub skip_posting: bool,
    pub mock: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineExit {
    Success,
    /// Non-zero exit; `None` when the process was killed by a signal.
    Failed(Option<i32>),
}

#[async_trait]
pub trait PipelineLauncher: Send + Sync {
    async fn launch(&self, request: &PipelineRequest) -> Result<PipelineExit>;
}

/// Runs the pipeline binary with inherited stdout/stderr.
pub struct ProcessLauncher {
    program: PathBuf,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl PipelineLauncher for ProcessLauncher {
    async fn launch(&self, request: &PipelineRequest) -> Result<PipelineExit> {
        let status = Command::new(&self.program)
            .args(request.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .with_context(|| format!("Failed to start content generation process {}", self.program.display()))?;

        Ok(if status.success() {
            PipelineExit::Success
        } else {
            PipelineExit::Failed(status.code())
        })
    }
}

/// A slot planned for today.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledSlot {
    pub name: String,
    pub at: DateTime<Local>,
    pub cron: String,
}

/// Result of a fired slot, reported back to the run loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotOutcome {
    pub slot: String,
    pub template: String,
    pub succeeded: bool,
}

/// Wall clock the scheduler plans against.
pub type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

struct Inner {
    rotation: Mutex<TemplateRotation>,
    times: OptimalTimes,
    mode: ScheduleMode,
    launcher: Arc<dyn PipelineLauncher>,
    flags: PipelineFlags,
}

#[derive(Clone)]
pub struct DailyScheduler {
    inner: Arc<Inner>,
    clock: Clock,
}

impl DailyScheduler {
    pub fn new(
        rotation: TemplateRotation,
        times: OptimalTimes,
        mode: ScheduleMode,
        launcher: Arc<dyn PipelineLauncher>,
        flags: PipelineFlags,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                rotation: Mutex::new(rotation),
                times,
                mode,
                launcher,
                flags,
            }),
            clock: Arc::new(Local::now),
        }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Local> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Run `f` against the template rotation on the blocking pool. The state
    /// store behind it does synchronous file I/O.
    async fn with_rotation<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&TemplateRotation) -> T + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let rotation = inner.rotation.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&rotation)
        })
        .await
        .context("Template rotation task failed")
    }

    /// Schedule today's posts, then re-plan at every local midnight.
    ///
    /// Never returns under normal operation.
    pub async fn run(self) -> Result<()> {
        let mut tasks = JoinSet::new();

        // Plan whatever is left of today
        log::info!("Scheduling today's posts...");
        self.schedule_day((self.clock)(), &mut tasks).await;

        loop {
            // Sleep until local midnight, reaping fired slots meanwhile
            let wait = duration_until_next_midnight((self.clock)());
            log::info!("Next daily planning in {} minutes", wait.as_secs() / 60);

            let midnight = tokio::time::sleep(wait);
            tokio::pin!(midnight);

            loop {
                tokio::select! {
                    _ = &mut midnight => {
                        log::info!("Midnight trigger: scheduling posts for the new day");
                        self.schedule_day((self.clock)(), &mut tasks).await;
                        break;
                    }
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        match joined {
                            Ok(outcome) => log::info!(
                                "Slot {} finished with template {} ({})",
                                outcome.slot,
                                outcome.template,
                                if outcome.succeeded { "success" } else { "failed" }
                            ),
                            Err(e) => log::error!("Scheduled slot task aborted: {}", e),
                        }
                    }
                }
            }
        }
    }

    /// Plan the day containing `now`, persist each slot time, and arm timers
    /// for the slots still in the future.
    pub async fn schedule_day(&self, now: DateTime<Local>, tasks: &mut JoinSet<SlotOutcome>) -> Vec<ScheduledSlot> {
        let slots = self.plan_day(now).await;

        for slot in &slots {
            let delay = match (slot.at - now).to_std() {
                Ok(delay) => delay,
                Err(_) => {
                    log::warn!(
                        "Slot {} at {} has already passed, skipping",
                        slot.name,
                        slot.at.format("%H:%M")
                    );
                    continue;
                }
            };

            let scheduler = self.clone();
            let name = slot.name.clone();
            tasks.spawn(async move {
                tokio::time::sleep(delay).await;
                scheduler.fire_slot(&name).await
            });

            log::info!(
                "Scheduled {} post at {} (cron: {})",
                slot.name,
                slot.at.format("%H:%M"),
                slot.cron
            );
        }

        slots
    }

    /// Compute the day's slots and record `next<Slot>Schedule` for each.
    ///
    /// A slot that cannot be computed is logged and left out; the others are
    /// still planned.
    pub async fn plan_day(&self, now: DateTime<Local>) -> Vec<ScheduledSlot> {
        let date = now.date_naive();
        let planned: Vec<(String, Result<DateTime<Local>, String>)> = match self.inner.mode {
            ScheduleMode::Optimal => {
                let day = date.weekday();
                let count = self.inner.times.times_for(day).len();
                if count == 0 {
                    log::error!("No optimal posting times configured for {}", day);
                }
                (0..count)
                    .map(|i| {
                        let at = self
                            .inner
                            .times
                            .posting_time_on(date, day, i)
                            .map_err(|e| e.to_string());
                        (format!("optimal{}", i + 1), at)
                    })
                    .collect()
            }
            ScheduleMode::Windows => [MORNING_WINDOW, EVENING_WINDOW]
                .iter()
                .map(|window| {
                    let at = random_time_in_window_on(date, window).map_err(|e| e.to_string());
                    (window.label.to_string(), at)
                })
                .collect(),
        };

        let mut slots = Vec::with_capacity(planned.len());
        for (name, at) in planned {
            match at {
                Ok(at) => slots.push(ScheduledSlot {
                    cron: format_date_to_cron(&at),
                    name,
                    at,
                }),
                Err(e) => log::error!("Failed to schedule {} post: {}", name, e),
            }
        }

        // Persist the planned times
        let updates: Vec<StateUpdate> = slots
            .iter()
            .map(|slot| StateUpdate::schedule(&slot.name, Some(slot.at.with_timezone(&Utc))))
            .collect();
        let recorded = self
            .with_rotation(move |rotation| {
                for update in updates {
                    rotation.state().write(update);
                }
            })
            .await;
        if let Err(e) = recorded {
            log::error!("Failed to record today's schedule: {:#}", e);
        }

        slots
    }

    /// Run one slot: pick a template, record the post, run the pipeline.
    pub async fn fire_slot(&self, slot: &str) -> SlotOutcome {
        let posted_at = (self.clock)().with_timezone(&Utc);
        let selected = self
            .with_rotation(move |rotation| {
                let template = rotation.select_next_template();
                // Recorded before the run, so a failed run still counts as a post.
                rotation.state().write(StateUpdate::post(template.clone(), posted_at));
                template
            })
            .await;

        let template = match selected {
            Ok(template) => template,
            Err(e) => {
                log::error!("Failed to select a template for {} post: {:#}", slot, e);
                return SlotOutcome {
                    slot: slot.to_string(),
                    template: String::new(),
                    succeeded: false,
                };
            }
        };
        log::info!("Selected template for {} post: {}", slot, template);

        let request = PipelineRequest {
            template: template.clone(),
            skip_posting: self.inner.flags.skip_posting,
            mock: self.inner.flags.mock,
            ..PipelineRequest::default()
        };

        log::info!("Running content generation with template: {}", template);
        let succeeded = match self.inner.launcher.launch(&request).await {
            Ok(PipelineExit::Success) => {
                log::info!("Content generation completed successfully");
                true
            }
            Ok(PipelineExit::Failed(code)) => {
                match code {
                    Some(code) => log::error!("Content generation process exited with code {}", code),
                    None => log::error!("Content generation process was terminated by a signal"),
                }
                false
            }
            Err(e) => {
                log::error!("Error running content generation: {:#}", e);
                false
            }
        };

        SlotOutcome {
            slot: slot.to_string(),
            template,
            succeeded,
        }
    }
}

/// Time left until the next local midnight.
pub fn duration_until_next_midnight(now: DateTime<Local>) -> Duration {
    let next_midnight = now
        .date_naive()
        .succ_opt()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .unwrap_or_else(|| now + ChronoDuration::hours(24));

    (next_midnight - now)
        .to_std()
        .unwrap_or(Duration::from_secs(60))
}
