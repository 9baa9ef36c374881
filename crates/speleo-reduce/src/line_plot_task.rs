//! Background line-plot reduction for an interactive editor.
//!
//! [`LinePlotTask`] owns a [`Task`] that runs the staged pipeline on a
//! snapshot of the latest region. Submitting a region whose fingerprint
//! matches the last submission is a no-op; anything else restarts the
//! task, cancelling a run already in flight. A run publishes its
//! [`LinePlotOutput`] only when every stage completed without being
//! cancelled, so readers never see a partial plot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use log::{debug, warn};

use crate::cancel::Cancellation;
use crate::changes::{ChangeSet, diff};
use crate::fingerprint::{Fingerprint, fingerprint};
use crate::pipeline::{Advance, Pipeline, STAGE_COUNT, Stage};
use crate::survey::Region;
use crate::task::{ExecutionMode, Task, TaskContext};
use crate::types::{LinePlotResult, ReduceConfig, ReduceError};

/// A published reduction and how it differs from the one before it.
#[derive(Debug, Clone)]
pub struct LinePlotOutput {
    pub result: LinePlotResult,
    pub changes: ChangeSet,
    /// Fingerprint of the input this output was computed from.
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Default)]
struct Input {
    region: Option<Region>,
    config: ReduceConfig,
    fingerprint: Option<Fingerprint>,
}

#[derive(Debug, Default)]
struct Shared {
    input: Mutex<Input>,
    output: RwLock<Option<Arc<LinePlotOutput>>>,
}

impl Shared {
    fn input(&self) -> MutexGuard<'_, Input> {
        self.input.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn output(&self) -> Option<Arc<LinePlotOutput>> {
        self.output
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, output: LinePlotOutput) {
        *self.output.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(output));
    }

    fn snapshot(&self) -> Option<(Region, ReduceConfig, Fingerprint)> {
        let input = self.input();
        Some((input.region.clone()?, input.config, input.fingerprint?))
    }

    fn run(&self, ctx: &TaskContext) {
        let Some((region, config, fingerprint)) = self.snapshot() else {
            debug!("line plot: no region submitted");
            return;
        };

        ctx.set_number_of_steps(STAGE_COUNT - 1);
        let result = match drive(Pipeline::new(region, config).into(), ctx) {
            Ok(result) => result,
            Err(ReduceError::Cancelled) => {
                debug!("line plot {fingerprint}: cancelled");
                return;
            }
            Err(err) => {
                warn!("line plot {fingerprint}: {err}");
                return;
            }
        };
        if ctx.is_cancelled() {
            debug!("line plot {fingerprint}: cancelled before publishing");
            return;
        }

        let previous = self.output();
        let changes = diff(previous.as_deref().map(|p| &p.result), &result);
        debug!(
            "line plot {fingerprint}: {} stations, {} changed trips",
            result.points.len(),
            changes.changed_trips().len()
        );
        self.publish(LinePlotOutput {
            result,
            changes,
            fingerprint,
        });
    }
}

/// Advance stage by stage, reporting each finished stage as progress.
fn drive(mut stage: Stage, ctx: &TaskContext) -> Result<LinePlotResult, ReduceError> {
    loop {
        match stage.advance(ctx)? {
            Advance::Next(next) => {
                ctx.set_progress(next.index());
                stage = next;
            }
            Advance::Complete(done) => return done.complete(ctx),
        }
    }
}

/// Keeps a line plot up to date with the region being edited.
#[derive(Debug)]
pub struct LinePlotTask {
    task: Task,
    shared: Arc<Shared>,
}

impl Default for LinePlotTask {
    fn default() -> Self {
        Self::new(ReduceConfig::default())
    }
}

impl LinePlotTask {
    #[must_use]
    pub fn new(config: ReduceConfig) -> Self {
        let shared = Arc::new(Shared {
            input: Mutex::new(Input {
                config,
                ..Input::default()
            }),
            output: RwLock::new(None),
        });
        let job = Arc::clone(&shared);
        let task = Task::new("line plot", move |ctx: &TaskContext| job.run(ctx));
        Self { task, shared }
    }

    /// The underlying task, for status, progress and parenting.
    #[must_use]
    pub const fn task(&self) -> &Task {
        &self.task
    }

    /// Choose where reductions run. Only honored while idle.
    pub fn set_execution_mode(&self, mode: ExecutionMode) -> bool {
        self.task.set_execution_mode(mode)
    }

    /// Submit a region. Returns whether a reduction was (re)started.
    pub fn set_region(&self, region: Region) -> bool {
        {
            let mut input = self.shared.input();
            let next = fingerprint(&region, &input.config);
            if input.fingerprint == Some(next) {
                debug!("line plot {next}: unchanged, not rerunning");
                return false;
            }
            input.region = Some(region);
            input.fingerprint = Some(next);
        }
        self.task.restart();
        true
    }

    /// Change the configuration. Returns whether a reduction was
    /// (re)started.
    pub fn set_config(&self, config: ReduceConfig) -> bool {
        {
            let mut input = self.shared.input();
            input.config = config;
            let Some(region) = input.region.as_ref() else {
                return false;
            };
            let next = fingerprint(region, &config);
            if input.fingerprint == Some(next) {
                return false;
            }
            input.fingerprint = Some(next);
        }
        self.task.restart();
        true
    }

    /// The most recently published output, if any run has completed.
    #[must_use]
    pub fn output(&self) -> Option<Arc<LinePlotOutput>> {
        self.shared.output()
    }

    /// Block until the current run, and any restart it triggered, ends.
    pub fn wait_to_finish(&self) {
        self.task.wait_to_finish();
    }

    /// Cancel the current run. The last published output stays.
    pub fn stop(&self) {
        self.task.stop();
    }
}
