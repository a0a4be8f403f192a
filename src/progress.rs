use clap::ValueEnum;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const MAX_STORED_WARNINGS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lower")]
pub enum ProgressMode {
    Auto,
    Rich,
    Plain,
    Quiet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedProgressMode {
    Rich,
    Plain,
    Quiet,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressConfig {
    pub mode: ProgressMode,
    pub idle_threshold: Duration,
    pub plain_interval: Duration,
    tty_override: Option<bool>,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            mode: ProgressMode::Auto,
            idle_threshold: Duration::from_secs(30),
            plain_interval: Duration::from_secs(5),
            tty_override: None,
        }
    }
}

impl ProgressConfig {
    pub fn new(mode: ProgressMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub fn with_tty_override(mut self, is_tty: bool) -> Self {
        self.tty_override = Some(is_tty);
        self
    }

    pub fn resolve_mode(self) -> ResolvedProgressMode {
        self.mode.resolve(
            self.tty_override
                .unwrap_or_else(|| std::io::stderr().is_terminal()),
        )
    }
}

impl ProgressMode {
    fn resolve(self, stderr_is_tty: bool) -> ResolvedProgressMode {
        match self {
            ProgressMode::Auto => {
                if stderr_is_tty {
                    ResolvedProgressMode::Rich
                } else {
                    ResolvedProgressMode::Plain
                }
            }
            ProgressMode::Rich => ResolvedProgressMode::Rich,
            ProgressMode::Plain => ResolvedProgressMode::Plain,
            ProgressMode::Quiet => ResolvedProgressMode::Quiet,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconstructSummary {
    pub final_video: PathBuf,
    pub output_dir: PathBuf,
    pub segment_count: usize,
    pub tiles_with_segments: usize,
    pub steps_done: u64,
    pub steps_planned: u64,
    pub elapsed: Duration,
    pub warning_count: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TraceSummary {
    pub output: PathBuf,
    pub samples: usize,
    pub duration_secs: f64,
    pub interval_secs: f64,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ProgressOutcome {
    pub elapsed: Duration,
    pub total_steps: u64,
    pub done_steps: u64,
    pub warning_count: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub label: String,
    pub stage: String,
    pub done_steps: u64,
    pub total_steps: u64,
    pub elapsed: Duration,
    pub eta: Option<Duration>,
    pub active_ops: Vec<String>,
}

/// Cheap, cloneable access to a running reporter. Counts completed
/// transcoder invocations ("steps").
#[derive(Clone)]
pub struct ProgressHandle {
    inner: Arc<ProgressInner>,
}

pub struct ProgressReporter {
    handle: ProgressHandle,
    ticker: Option<JoinHandle<()>>,
}

struct ProgressInner {
    label: String,
    mode: ResolvedProgressMode,
    idle_threshold: Duration,
    plain_interval: Duration,
    state: Mutex<ProgressState>,
    rich: Option<RichUi>,
    stop: AtomicBool,
    finalized: AtomicBool,
}

struct RichUi {
    multi: MultiProgress,
    overall: ProgressBar,
    stage: ProgressBar,
    ops: Mutex<HashMap<String, ProgressBar>>,
}

#[derive(Debug)]
struct ProgressState {
    started: Instant,
    stage: String,
    total_steps: u64,
    done_steps: u64,
    last_progress: Instant,
    last_plain_emit: Instant,
    last_idle_warn: Option<Instant>,
    operations: HashMap<String, String>,
    warnings: Vec<String>,
}

impl ProgressReporter {
    pub fn new(label: impl Into<String>, total_steps: u64, config: ProgressConfig) -> Self {
        let label = label.into();
        let mode = config.resolve_mode();
        let now = Instant::now();

        let rich = if mode == ResolvedProgressMode::Rich {
            Some(RichUi::new(&label, total_steps))
        } else {
            None
        };

        let inner = Arc::new(ProgressInner {
            label,
            mode,
            idle_threshold: config.idle_threshold,
            plain_interval: config.plain_interval,
            state: Mutex::new(ProgressState {
                started: now,
                stage: "initializing".to_string(),
                total_steps,
                done_steps: 0,
                last_progress: now,
                last_plain_emit: now.checked_sub(config.plain_interval).unwrap_or(now),
                last_idle_warn: None,
                operations: HashMap::new(),
                warnings: Vec::new(),
            }),
            rich,
            stop: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
        });

        // The ticker only redraws and raises idle warnings; a hung ffmpeg
        // still blocks the pipeline thread.
        let ticker_inner = Arc::clone(&inner);
        let ticker = thread::spawn(move || {
            while !ticker_inner.stop.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(500));
                ticker_inner.tick_once();
            }
        });

        let handle = ProgressHandle { inner };
        handle.set_stage("starting");
        Self {
            handle,
            ticker: Some(ticker),
        }
    }

    pub fn handle(&self) -> ProgressHandle {
        self.handle.clone()
    }

    pub fn finish(mut self, final_message: impl Into<String>) -> ProgressOutcome {
        self.shutdown_ticker();
        self.handle.inner.finalize(Some(final_message.into()))
    }

    fn shutdown_ticker(&mut self) {
        self.handle.inner.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.ticker.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.shutdown_ticker();
        let _ = self.handle.inner.finalize(None);
    }
}

impl ProgressHandle {
    pub fn set_stage(&self, stage: impl Into<String>) {
        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            state.stage = stage.into();
            snapshot_locked(&self.inner.label, &state)
        };
        self.inner.render_snapshot(&snapshot, true);
    }

    pub fn inc_steps(&self, delta: u64) {
        if delta == 0 {
            return;
        }
        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            state.done_steps = state.done_steps.saturating_add(delta);
            if state.total_steps > 0 {
                state.done_steps = state.done_steps.min(state.total_steps);
            }
            state.last_progress = Instant::now();
            snapshot_locked(&self.inner.label, &state)
        };
        self.inner.render_snapshot(&snapshot, false);
    }

    pub fn set_operation_status(&self, operation_id: impl Into<String>, status: impl Into<String>) {
        let op_id = operation_id.into();
        let status = status.into();

        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            state.operations.insert(op_id.clone(), status.clone());
            snapshot_locked(&self.inner.label, &state)
        };

        if let Some(rich) = &self.inner.rich {
            rich.set_operation(&op_id, &status);
        }
        self.inner.render_snapshot(&snapshot, false);
    }

    pub fn clear_operation(&self, operation_id: &str) {
        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            state.operations.remove(operation_id);
            snapshot_locked(&self.inner.label, &state)
        };

        if let Some(rich) = &self.inner.rich {
            rich.clear_operation(operation_id);
        }
        self.inner.render_snapshot(&snapshot, false);
    }

    pub fn log(&self, message: impl Into<String>) {
        self.inner.emit_message("INFO", &message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        {
            let mut state = self.inner.state.lock().unwrap();
            push_warning_locked(&mut state, &message);
        }
        self.inner.emit_message("WARN", &message);
    }
}

impl ProgressInner {
    fn tick_once(&self) {
        if self.mode == ResolvedProgressMode::Quiet {
            return;
        }

        let (snapshot, plain_due, idle_warning) = {
            let mut state = self.state.lock().unwrap();
            let now = Instant::now();

            let plain_due = now.duration_since(state.last_plain_emit) >= self.plain_interval;
            if plain_due {
                state.last_plain_emit = now;
            }

            let idle_warning = if idle_warning_due(
                now,
                state.last_progress,
                state.last_idle_warn,
                self.idle_threshold,
                state.done_steps,
                state.total_steps,
            ) {
                state.last_idle_warn = Some(now);
                let msg = format!(
                    "IDLE WARNING: no step completed for {}s (stage={}, active={})",
                    now.duration_since(state.last_progress).as_secs(),
                    state.stage,
                    active_op_display(&state.operations)
                );
                push_warning_locked(&mut state, &msg);
                Some(msg)
            } else {
                None
            };

            (snapshot_locked(&self.label, &state), plain_due, idle_warning)
        };

        if self.mode == ResolvedProgressMode::Rich {
            self.render_snapshot_rich(&snapshot);
        } else if plain_due {
            self.render_snapshot_plain(&snapshot);
        }

        if let Some(msg) = idle_warning {
            self.emit_message("WARN", &msg);
        }
    }

    fn render_snapshot(&self, snapshot: &ProgressSnapshot, force_plain: bool) {
        match self.mode {
            ResolvedProgressMode::Rich => self.render_snapshot_rich(snapshot),
            ResolvedProgressMode::Plain => {
                if force_plain {
                    self.render_snapshot_plain(snapshot);
                }
            }
            ResolvedProgressMode::Quiet => {}
        }
    }

    fn render_snapshot_rich(&self, snapshot: &ProgressSnapshot) {
        let Some(rich) = &self.rich else {
            return;
        };

        rich.overall.set_length(snapshot.total_steps.max(1));
        rich.overall.set_position(snapshot.done_steps);
        rich.overall.set_message(format!(
            "stage={} ETA={}",
            snapshot.stage,
            format_eta(snapshot.eta)
        ));
        rich.stage.set_message(format!(
            "{} | elapsed {}",
            snapshot.stage,
            format_duration(snapshot.elapsed)
        ));
    }

    fn render_snapshot_plain(&self, snapshot: &ProgressSnapshot) {
        let pct = if snapshot.total_steps == 0 {
            0.0
        } else {
            (snapshot.done_steps as f64 / snapshot.total_steps as f64) * 100.0
        };
        eprintln!(
            "[PROGRESS] {} elapsed={} stage={} done={} / {} ({:.1}%) ETA={} active={}",
            snapshot.label,
            format_duration(snapshot.elapsed),
            snapshot.stage,
            snapshot.done_steps,
            snapshot.total_steps,
            pct,
            format_eta(snapshot.eta),
            if snapshot.active_ops.is_empty() {
                "-".to_string()
            } else {
                snapshot.active_ops.join(",")
            }
        );
    }

    fn emit_message(&self, level: &str, message: &str) {
        match self.mode {
            ResolvedProgressMode::Quiet => {}
            ResolvedProgressMode::Plain => {
                eprintln!("[{}] {}: {}", level, self.label, message);
            }
            ResolvedProgressMode::Rich => {
                if let Some(rich) = &self.rich {
                    rich.stage
                        .println(format!("[{}] {}: {}", level, self.label, message));
                } else {
                    eprintln!("[{}] {}: {}", level, self.label, message);
                }
            }
        }
    }

    fn finalize(&self, final_message: Option<String>) -> ProgressOutcome {
        if self.finalized.swap(true, Ordering::Relaxed) {
            return self.current_outcome();
        }

        let outcome = self.current_outcome();
        let snapshot = {
            let state = self.state.lock().unwrap();
            snapshot_locked(&self.label, &state)
        };

        match self.mode {
            ResolvedProgressMode::Quiet => {}
            ResolvedProgressMode::Plain => {
                self.render_snapshot_plain(&snapshot);
                if let Some(msg) = final_message.as_deref() {
                    eprintln!("[DONE] {}: {}", self.label, msg);
                }
            }
            ResolvedProgressMode::Rich => {
                if let Some(rich) = &self.rich {
                    rich.overall.finish_with_message(format!(
                        "done={} / {} elapsed={}",
                        snapshot.done_steps,
                        snapshot.total_steps,
                        format_duration(snapshot.elapsed)
                    ));
                    match final_message {
                        Some(msg) => rich.stage.finish_with_message(msg),
                        None => rich.stage.abandon(),
                    }
                    rich.clear_all_ops();
                }
            }
        }

        outcome
    }

    fn current_outcome(&self) -> ProgressOutcome {
        let state = self.state.lock().unwrap();
        ProgressOutcome {
            elapsed: state.started.elapsed(),
            total_steps: state.total_steps,
            done_steps: state.done_steps,
            warning_count: state.warnings.len(),
            warnings: state.warnings.clone(),
        }
    }
}

impl RichUi {
    fn new(label: &str, total_steps: u64) -> Self {
        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(total_steps.max(1)));
        let stage = multi.add(ProgressBar::new_spinner());

        overall.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len} steps | {msg}",
            )
            .expect("valid progress template"),
        );
        overall.set_message(format!("{} starting", label));

        stage.set_style(
            ProgressStyle::with_template("{spinner:.yellow} {msg}")
                .expect("valid stage template")
                .tick_chars("|/-\\ "),
        );
        stage.enable_steady_tick(Duration::from_millis(120));
        stage.set_message("starting");

        Self {
            multi,
            overall,
            stage,
            ops: Mutex::new(HashMap::new()),
        }
    }

    fn set_operation(&self, op_id: &str, status: &str) {
        let mut ops = self.ops.lock().unwrap();
        let bar = ops.entry(op_id.to_string()).or_insert_with(|| {
            let pb = self.multi.add(ProgressBar::new_spinner());
            pb.set_style(
                ProgressStyle::with_template("{spinner:.magenta} {prefix:.bold} {msg}")
                    .expect("valid operation template")
                    .tick_chars("|/-\\ "),
            );
            pb.enable_steady_tick(Duration::from_millis(120));
            pb.set_prefix(op_id.to_string());
            pb
        });
        bar.set_message(status.to_string());
    }

    fn clear_operation(&self, op_id: &str) {
        let mut ops = self.ops.lock().unwrap();
        if let Some(bar) = ops.remove(op_id) {
            bar.finish_and_clear();
        }
    }

    fn clear_all_ops(&self) {
        let mut ops = self.ops.lock().unwrap();
        for (_id, bar) in ops.drain() {
            bar.finish_and_clear();
        }
    }
}

fn push_warning_locked(state: &mut ProgressState, message: &str) {
    if state.warnings.len() >= MAX_STORED_WARNINGS {
        state.warnings.remove(0);
    }
    state.warnings.push(message.to_string());
}

fn snapshot_locked(label: &str, state: &ProgressState) -> ProgressSnapshot {
    let elapsed = state.started.elapsed();
    let mut active_ops = state.operations.keys().cloned().collect::<Vec<_>>();
    active_ops.sort();
    active_ops.truncate(4);

    ProgressSnapshot {
        label: label.to_string(),
        stage: state.stage.clone(),
        done_steps: state.done_steps,
        total_steps: state.total_steps,
        elapsed,
        eta: compute_eta(state.total_steps, state.done_steps, elapsed),
        active_ops,
    }
}

fn active_op_display(ops: &HashMap<String, String>) -> String {
    if ops.is_empty() {
        return "-".to_string();
    }
    let mut keys = ops.keys().cloned().collect::<Vec<_>>();
    keys.sort();
    keys.into_iter().take(3).collect::<Vec<_>>().join(",")
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if h > 0 {
        format!("{:02}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

fn format_eta(eta: Option<Duration>) -> String {
    eta.map(format_duration)
        .unwrap_or_else(|| "--:--".to_string())
}

/// Linear extrapolation from the mean time per completed step.
fn compute_eta(total_steps: u64, done_steps: u64, elapsed: Duration) -> Option<Duration> {
    if done_steps == 0 || done_steps >= total_steps {
        return None;
    }
    let per_step = elapsed.as_secs_f64() / done_steps as f64;
    let remaining = (total_steps - done_steps) as f64;
    Some(Duration::from_secs_f64((per_step * remaining).max(0.0)))
}

fn idle_warning_due(
    now: Instant,
    last_progress: Instant,
    last_idle_warn: Option<Instant>,
    idle_threshold: Duration,
    done_steps: u64,
    total_steps: u64,
) -> bool {
    if done_steps >= total_steps && total_steps > 0 {
        return false;
    }
    if now.duration_since(last_progress) < idle_threshold {
        return false;
    }
    match last_idle_warn {
        Some(last_warn) => now.duration_since(last_warn) >= idle_threshold,
        None => true,
    }
}
