//! Restartable background tasks with cooperative cancellation.
//!
//! A [`Task`] wraps a job closure and a small state machine:
//!
//! ```text
//! Ready ──start──▶ PreparingToStart ──▶ Running ──job returns──▶ Ready
//!                        │                 │
//!                      stop              stop ──▶ Stopped ──job returns──▶ Ready
//!                        │                 │
//!                     restart           restart ──▶ Restart ──job returns──▶ (start again)
//! ```
//!
//! Jobs poll [`TaskContext`] (it implements [`Cancellation`]) and return
//! early once the task is no longer running. Tasks can be nested: a child
//! always runs on the thread of its parent's job, and stopping a parent
//! stops every descendant.
//!
//! Each piece of state sits behind its own lock. When both a parent's and
//! a child's status are held, the parent's is taken first.

use std::fmt;
use std::sync::{
    Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::cancel::Cancellation;

/// Lifecycle state of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Idle; `start` is accepted.
    Ready,
    /// Accepted by `start`, the job has not begun yet.
    PreparingToStart,
    /// The job is executing.
    Running,
    /// Stop requested; the job is winding down.
    Stopped,
    /// Restart requested; the job reruns as soon as the current run ends.
    Restart,
}

/// Where a task's job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Spawned onto the rayon global pool; `start` returns immediately.
    #[default]
    ThreadPool,
    /// Run synchronously inside `start`.
    CurrentThread,
}

type Job = Box<dyn Fn(&TaskContext) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    steps: usize,
    current: usize,
}

#[derive(Debug, Clone, Copy)]
struct State {
    status: TaskStatus,
    needs_restart: bool,
}

struct Inner {
    name: RwLock<String>,
    state: RwLock<State>,
    progress: RwLock<Progress>,
    mode: RwLock<ExecutionMode>,
    parent: RwLock<Weak<Self>>,
    children: RwLock<Vec<Arc<Self>>>,
    idle: Mutex<()>,
    idle_changed: Condvar,
    job: Job,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A restartable unit of background work.
///
/// Cloning yields another handle to the same task.
#[derive(Clone)]
pub struct Task {
    inner: Arc<Inner>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name())
            .field("status", &self.status())
            .field("mode", &self.execution_mode())
            .finish_non_exhaustive()
    }
}

impl Task {
    /// Create a ready task that runs `job` each time it is started.
    pub fn new(name: impl Into<String>, job: impl Fn(&TaskContext) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: RwLock::new(name.into()),
                state: RwLock::new(State {
                    status: TaskStatus::Ready,
                    needs_restart: false,
                }),
                progress: RwLock::new(Progress::default()),
                mode: RwLock::new(ExecutionMode::default()),
                parent: RwLock::new(Weak::new()),
                children: RwLock::new(Vec::new()),
                idle: Mutex::new(()),
                idle_changed: Condvar::new(),
                job: Box::new(job),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> String {
        read(&self.inner.name).clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *write(&self.inner.name) = name.into();
    }

    #[must_use]
    pub fn status(&self) -> TaskStatus {
        read(&self.inner.state).status
    }

    /// Whether the task is running or about to.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Whether a restart was requested and has not been picked up yet.
    #[must_use]
    pub fn needs_restart(&self) -> bool {
        read(&self.inner.state).needs_restart
    }

    #[must_use]
    pub fn execution_mode(&self) -> ExecutionMode {
        *read(&self.inner.mode)
    }

    /// Choose where the job runs. Only honored while the task is ready.
    ///
    /// Moving a task onto the pool moves its children off it: children
    /// run inline on their parent's worker.
    pub fn set_execution_mode(&self, mode: ExecutionMode) -> bool {
        if self.status() != TaskStatus::Ready {
            warn!(
                "task {:?}: execution mode can only change while ready",
                self.name()
            );
            return false;
        }
        *write(&self.inner.mode) = mode;
        if mode == ExecutionMode::ThreadPool {
            for child in read(&self.inner.children).iter() {
                *write(&child.mode) = ExecutionMode::CurrentThread;
            }
        }
        true
    }

    /// The number of steps, and how many are done.
    #[must_use]
    pub fn progress(&self) -> (usize, usize) {
        let progress = *read(&self.inner.progress);
        (progress.current, progress.steps)
    }

    /// Attach this task under `parent`. Only honored while ready.
    ///
    /// The task is detached from any previous parent and switched to
    /// [`ExecutionMode::CurrentThread`].
    pub fn set_parent(&self, parent: &Self) -> bool {
        if self.status() != TaskStatus::Ready {
            warn!(
                "task {:?}: parent can only change while ready",
                self.name()
            );
            return false;
        }
        if Arc::ptr_eq(&self.inner, &parent.inner) {
            warn!("task {:?}: cannot be its own parent", self.name());
            return false;
        }

        let previous = read(&self.inner.parent).upgrade();
        if let Some(previous) = previous {
            if Arc::ptr_eq(&previous, &parent.inner) {
                return true;
            }
            write(&previous.children).retain(|child| !Arc::ptr_eq(child, &self.inner));
        }

        *write(&self.inner.mode) = ExecutionMode::CurrentThread;
        *write(&self.inner.parent) = Arc::downgrade(&parent.inner);
        write(&parent.inner.children).push(Arc::clone(&self.inner));
        true
    }

    /// Start the job if the task is ready; otherwise do nothing.
    pub fn start(&self) {
        self.inner.start();
    }

    /// Ask the job, and every descendant's job, to stop.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Start the job, or if it is already underway, stop it and run it
    /// again once the current run returns.
    pub fn restart(&self) {
        {
            let mut state = write(&self.inner.state);
            if state.status != TaskStatus::Ready {
                self.inner.stop_locked(&mut state);
                state.status = TaskStatus::Restart;
                state.needs_restart = true;
                return;
            }
        }
        self.inner.start();
    }

    /// Block until the task is ready again.
    pub fn wait_to_finish(&self) {
        let mut guard = lock(&self.inner.idle);
        while self.status() != TaskStatus::Ready {
            guard = self
                .inner
                .idle_changed
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Inner {
    fn is_running(&self) -> bool {
        matches!(
            read(&self.state).status,
            TaskStatus::Running | TaskStatus::PreparingToStart
        )
    }

    fn parents_running(&self) -> bool {
        let mut parent = read(&self.parent).upgrade();
        while let Some(task) = parent {
            if !task.is_running() {
                return false;
            }
            parent = read(&task.parent).upgrade();
        }
        true
    }

    fn name(&self) -> String {
        read(&self.name).clone()
    }

    fn set_progress(&self, current: usize) {
        let mut progress = write(&self.progress);
        progress.current = current.min(progress.steps);
    }

    fn set_number_of_steps(&self, steps: usize) {
        let mut progress = write(&self.progress);
        progress.steps = steps;
        progress.current = progress.current.min(steps);
    }

    fn start(self: &Arc<Self>) {
        {
            let mut state = write(&self.state);
            if state.status != TaskStatus::Ready {
                debug!(
                    "task {:?}: start ignored while {:?}",
                    self.name(),
                    state.status
                );
                return;
            }
            state.status = TaskStatus::PreparingToStart;
        }
        self.launch();
    }

    fn stop(&self) {
        let mut state = write(&self.state);
        self.stop_locked(&mut state);
    }

    /// Mark this task and its descendants stopped, with this task's state
    /// already locked.
    fn stop_locked(&self, state: &mut State) {
        if matches!(
            state.status,
            TaskStatus::Running | TaskStatus::PreparingToStart
        ) {
            state.status = TaskStatus::Stopped;
            for child in read(&self.children).iter() {
                let mut child_state = write(&child.state);
                child.stop_locked(&mut child_state);
            }
        }
    }

    /// Move from `PreparingToStart` to `Running` and hand the job to the
    /// configured executor.
    fn launch(self: &Arc<Self>) {
        if !self.parents_running() {
            debug!("task {:?}: parent is not running", self.name());
            self.stop();
            self.done();
            return;
        }

        {
            let mut state = write(&self.state);
            if state.status != TaskStatus::PreparingToStart {
                drop(state);
                self.done();
                return;
            }
            state.status = TaskStatus::Running;
            state.needs_restart = false;
        }
        self.set_progress(0);

        match *read(&self.mode) {
            ExecutionMode::ThreadPool => {
                let task = Arc::clone(self);
                rayon::spawn(move || task.run());
            }
            ExecutionMode::CurrentThread => self.run(),
        }
    }

    fn run(self: &Arc<Self>) {
        let context = TaskContext {
            inner: Arc::clone(self),
        };
        (self.job)(&context);
        self.done();
    }

    /// Settle the state after a run, or after a start that never ran.
    fn done(self: &Arc<Self>) {
        let rerun = {
            let mut state = write(&self.state);
            match state.status {
                // Passes through Ready under the same lock, so waiters
                // never observe an idle task between the two runs.
                TaskStatus::Restart => {
                    state.status = TaskStatus::PreparingToStart;
                    true
                }
                TaskStatus::Stopped | TaskStatus::Running => {
                    state.status = TaskStatus::Ready;
                    false
                }
                TaskStatus::Ready | TaskStatus::PreparingToStart => false,
            }
        };

        if rerun {
            debug!("task {:?}: restarting", self.name());
            self.launch();
            return;
        }

        let _guard = lock(&self.idle);
        self.idle_changed.notify_all();
    }
}

/// The view of its task handed to a running job.
pub struct TaskContext {
    inner: Arc<Inner>,
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("name", &self.inner.name())
            .finish_non_exhaustive()
    }
}

impl TaskContext {
    /// A handle to the task this job belongs to.
    #[must_use]
    pub fn task(&self) -> Task {
        Task {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn set_number_of_steps(&self, steps: usize) {
        self.inner.set_number_of_steps(steps);
    }

    /// Report progress, clamped to the number of steps.
    pub fn set_progress(&self, current: usize) {
        self.inner.set_progress(current);
    }
}

impl Cancellation for TaskContext {
    fn is_cancelled(&self) -> bool {
        read(&self.inner.state).status != TaskStatus::Running || !self.inner.parents_running()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;

    fn counting() -> (Arc<AtomicUsize>, impl Fn(&TaskContext) + Send + Sync + 'static) {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        (runs, move |_: &TaskContext| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Signals on `started`, then spins until cancelled.
    fn spin_until_cancelled(
        started: mpsc::Sender<()>,
    ) -> impl Fn(&TaskContext) + Send + Sync + 'static {
        let started = Mutex::new(started);
        move |ctx: &TaskContext| {
            lock(&started).send(()).unwrap();
            while !ctx.is_cancelled() {
                thread::yield_now();
            }
        }
    }

    #[test]
    fn current_thread_runs_inline() {
        let (runs, job) = counting();
        let task = Task::new("inline", job);
        assert!(task.set_execution_mode(ExecutionMode::CurrentThread));
        task.start();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(task.status(), TaskStatus::Ready);
    }

    #[test]
    fn thread_pool_runs_and_finishes() {
        let (runs, job) = counting();
        let task = Task::new("pooled", job);
        assert_eq!(task.execution_mode(), ExecutionMode::ThreadPool);
        task.start();
        task.wait_to_finish();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(task.status(), TaskStatus::Ready);
    }

    #[test]
    fn stop_cancels_running_job() {
        let (tx, rx) = mpsc::channel();
        let task = Task::new("spinner", spin_until_cancelled(tx));
        task.start();
        rx.recv().unwrap();
        assert!(task.is_running());
        task.stop();
        task.wait_to_finish();
        assert_eq!(task.status(), TaskStatus::Ready);
        assert!(!task.is_running());
    }

    #[test]
    fn start_while_running_is_ignored() {
        let (tx, rx) = mpsc::channel();
        let task = Task::new("spinner", spin_until_cancelled(tx));
        task.start();
        rx.recv().unwrap();
        task.start();
        assert_eq!(task.status(), TaskStatus::Running);
        task.stop();
        task.wait_to_finish();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn restart_reruns_after_current_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let counter = Arc::clone(&runs);
        let task = Task::new("restartable", move |ctx: &TaskContext| {
            let run = counter.fetch_add(1, Ordering::SeqCst);
            if run == 0 {
                lock(&tx).send(()).unwrap();
                while !ctx.is_cancelled() {
                    thread::yield_now();
                }
            }
        });
        task.start();
        rx.recv().unwrap();
        task.restart();
        task.wait_to_finish();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(!task.needs_restart());
        assert_eq!(task.status(), TaskStatus::Ready);
    }

    #[test]
    fn restart_when_ready_starts() {
        let (runs, job) = counting();
        let task = Task::new("idle", job);
        task.set_execution_mode(ExecutionMode::CurrentThread);
        task.restart();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn child_is_forced_onto_current_thread() {
        let parent = Task::new("parent", |_: &TaskContext| {});
        let child = Task::new("child", |_: &TaskContext| {});
        assert!(child.set_parent(&parent));
        assert_eq!(child.execution_mode(), ExecutionMode::CurrentThread);
    }

    #[test]
    fn pool_parent_moves_children_off_pool() {
        let parent = Task::new("parent", |_: &TaskContext| {});
        let child = Task::new("child", |_: &TaskContext| {});
        child.set_parent(&parent);
        child.set_execution_mode(ExecutionMode::ThreadPool);
        parent.set_execution_mode(ExecutionMode::ThreadPool);
        assert_eq!(child.execution_mode(), ExecutionMode::CurrentThread);
    }

    #[test]
    fn child_without_running_parent_does_not_run() {
        let parent = Task::new("parent", |_: &TaskContext| {});
        let (runs, job) = counting();
        let child = Task::new("child", job);
        child.set_parent(&parent);
        child.start();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(child.status(), TaskStatus::Ready);
    }

    #[test]
    fn child_runs_inside_parent_job() {
        let (runs, job) = counting();
        let child = Task::new("child", job);
        let handle = child.clone();
        let parent = Task::new("parent", move |_: &TaskContext| handle.start());
        child.set_parent(&parent);
        parent.start();
        parent.wait_to_finish();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(child.status(), TaskStatus::Ready);
    }

    #[test]
    fn stopping_parent_stops_child() {
        let (tx, rx) = mpsc::channel();
        let child = Task::new("child", spin_until_cancelled(tx));
        let handle = child.clone();
        let parent = Task::new("parent", move |_: &TaskContext| handle.start());
        child.set_parent(&parent);
        parent.start();
        rx.recv().unwrap();
        assert!(child.is_running());
        parent.stop();
        parent.wait_to_finish();
        assert_eq!(child.status(), TaskStatus::Ready);
        assert_eq!(parent.status(), TaskStatus::Ready);
    }

    #[test]
    fn reparenting_detaches_from_previous_parent() {
        let first = Task::new("first", |_: &TaskContext| {});
        let second = Task::new("second", |_: &TaskContext| {});
        let child = Task::new("child", |_: &TaskContext| {});
        child.set_parent(&first);
        child.set_parent(&second);
        assert!(read(&first.inner.children).is_empty());
        assert_eq!(read(&second.inner.children).len(), 1);
        assert!(!child.set_parent(&child));
    }

    #[test]
    fn parent_change_refused_while_running() {
        let (tx, rx) = mpsc::channel();
        let task = Task::new("spinner", spin_until_cancelled(tx));
        let other = Task::new("other", |_: &TaskContext| {});
        task.start();
        rx.recv().unwrap();
        assert!(!task.set_parent(&other));
        assert!(!task.set_execution_mode(ExecutionMode::CurrentThread));
        task.stop();
        task.wait_to_finish();
    }

    #[test]
    fn progress_is_clamped() {
        let task = Task::new("steps", |ctx: &TaskContext| {
            ctx.set_number_of_steps(4);
            ctx.set_progress(2);
            ctx.set_progress(9);
        });
        task.set_execution_mode(ExecutionMode::CurrentThread);
        task.start();
        assert_eq!(task.progress(), (4, 4));
    }

    #[test]
    fn rename() {
        let task = Task::new("before", |_: &TaskContext| {});
        task.set_name("after");
        assert_eq!(task.name(), "after");
    }
}
