//! Progress bar subscriber.
//!
//! One bar per batch counts finished tasks; below it, one bar per group
//! counts finished members. Either level can be silenced per batch through
//! [`BatchInfo::silent_main_bar`] and [`BatchInfo::silent_sub_bar`]. Bars
//! are drawn only when stdout is a terminal.

use std::collections::HashMap;
use std::io::IsTerminal;

use async_trait::async_trait;
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use parking_lot::Mutex;

use super::{BatchInfo, ExecutionCallback};
use crate::executor::{GroupProgress, TaskError, TaskLabel, TaskStatus};

const MAIN_TEMPLATE: &str =
    "{spinner:.green} {prefix:.bold.white} {bar:40.cyan/blue} {pos}/{len} ({percent}%) [{elapsed_precise}]";
const SUB_TEMPLATE: &str = "  {prefix:.white} {bar:20.green/dim} {pos}/{len} {msg}";

#[derive(Default)]
struct Bars {
    main: Option<ProgressBar>,
    groups: HashMap<String, ProgressBar>,
    silent_sub: bool,
}

/// Draws batch and group progress with `indicatif`
pub struct ProgressCallback {
    multi: MultiProgress,
    bars: Mutex<Bars>,
}

impl ProgressCallback {
    pub fn new() -> Self {
        let target = if std::io::stdout().is_terminal() {
            ProgressDrawTarget::stdout()
        } else {
            ProgressDrawTarget::hidden()
        };
        Self::with_draw_target(target)
    }

    /// Draw to an explicit target, e.g. [`ProgressDrawTarget::hidden`].
    pub fn with_draw_target(target: ProgressDrawTarget) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: Mutex::new(Bars::default()),
        }
    }

    fn main_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template(MAIN_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━━─")
    }

    fn sub_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template(SUB_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━━─")
    }

    fn status_text(status: TaskStatus) -> String {
        match status {
            TaskStatus::Ok => "[OK]".green().to_string(),
            TaskStatus::Skip => "[SKIP]".yellow().to_string(),
            TaskStatus::Error => "[ERROR]".red().bold().to_string(),
        }
    }

    /// Number of group bars currently shown
    pub fn group_bars(&self) -> usize {
        self.bars.lock().groups.len()
    }
}

impl Default for ProgressCallback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionCallback for ProgressCallback {
    async fn on_batch_start(&self, batch: &BatchInfo) {
        let mut bars = self.bars.lock();
        bars.groups.clear();
        bars.silent_sub = batch.silent_sub_bar;
        bars.main = if batch.silent_main_bar {
            None
        } else {
            let bar = self.multi.add(ProgressBar::new(batch.tasks as u64));
            bar.set_style(Self::main_style());
            bar.set_prefix(batch.name.clone());
            Some(bar)
        };
    }

    async fn on_task_finish(
        &self,
        _slot: usize,
        _task: &TaskLabel,
        _status: TaskStatus,
        _error: Option<&TaskError>,
    ) {
        if let Some(bar) = &self.bars.lock().main {
            bar.inc(1);
        }
    }

    async fn on_group_progress(&self, progress: &GroupProgress) {
        let mut bars = self.bars.lock();
        if bars.silent_sub {
            return;
        }
        let multi = &self.multi;
        let bar = bars
            .groups
            .entry(progress.parent_id.clone())
            .or_insert_with(|| {
                let bar = multi.add(ProgressBar::new(progress.total as u64));
                bar.set_style(Self::sub_style());
                bar.set_prefix(progress.parent_id.clone());
                bar
            });
        bar.set_position(progress.done as u64);
        if let Some(status) = progress.status {
            bar.finish_with_message(Self::status_text(status));
        }
    }

    async fn on_batch_end(&self, _batch: &BatchInfo, success: bool) {
        let mut bars = self.bars.lock();
        if let Some(bar) = bars.main.take() {
            if success {
                bar.finish_with_message("done");
            } else {
                bar.abandon_with_message("failed");
            }
        }
        for (_, bar) in bars.groups.drain() {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
    }
}
