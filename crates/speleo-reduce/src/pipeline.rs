//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::process`] which runs the entire reduction in one call,
//! [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use speleo_reduce::{Pipeline, ReduceConfig, ReduceError, Region};
//! # use speleo_reduce::cancel::NeverCancel;
//! # fn run(region: Region) -> Result<(), ReduceError> {
//! let pipeline = Pipeline::new(region, ReduceConfig::default())
//!     .prepare(&NeverCancel)?
//!     .decompose(&NeverCancel)?
//!     .classify(&NeverCancel)?
//!     .resolve(&NeverCancel)?;
//!
//! let result = pipeline.into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self`, polls the given
//! [`Cancellation`] at safe points, and returns the next pipeline state.
//! A cancelled stage returns [`ReduceError::Cancelled`] and everything
//! computed so far is dropped; nothing partial is ever handed out.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::cancel::Cancellation;
use crate::diagnostics::StageMetrics;
use crate::edge::{EdgeSet, ReducedChunk, decompose};
use crate::loops::{EdgeClassification, LoopClassifier};
use crate::position::PositionResolver;
use crate::shot::ShotReducer;
use crate::survey::{Cave, Region};
use crate::types::{CavePlot, LinePlotResult, Point3, ReduceConfig, ReduceError, StationName};

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// Call [`prepare`](Self::prepare) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing -- call .prepare() to continue"]
pub struct Pending {
    config: ReduceConfig,
    region: Region,
}

impl Pending {
    /// The input region.
    #[must_use]
    pub const fn region(&self) -> &Region {
        &self.region
    }

    /// Filter chunks and reduce every shot.
    ///
    /// Structurally invalid chunks and placeholder chunks are dropped, a
    /// trailing unnamed station whose shot is invalid is trimmed, and
    /// shots that cannot be reduced become gaps. Any other unnamed
    /// station cuts its chunk, so it never joins two runs together.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError::InvalidConfig`] if the configuration is
    /// invalid, or [`ReduceError::Cancelled`].
    pub fn prepare(self, cancel: &dyn Cancellation) -> Result<Prepared, ReduceError> {
        self.config.validate()?;
        let caves = self
            .region
            .caves
            .iter()
            .map(|cave| prepare_cave(cave, &self.config, cancel))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Prepared {
            config: self.config,
            caves,
        })
    }
}

/// Bookkeeping from the prepare stage for one cave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrepareStats {
    pub trip_count: usize,
    /// Runs kept for decomposition, after cutting at unnamed stations.
    pub chunk_count: usize,
    /// Chunks dropped for having too few stations or mismatched shots.
    pub malformed_chunks: usize,
    /// Empty two-station rows dropped.
    pub placeholder_chunks: usize,
    /// Trailing unnamed stations trimmed off kept chunks.
    pub trimmed_stations: usize,
    /// Other unnamed stations, each of which cuts its chunk in two.
    pub unnamed_stations: usize,
    /// Shots in kept chunks.
    pub shot_count: usize,
    /// Shots that could not be reduced or touch an unnamed station.
    pub invalid_shots: usize,
}

impl PrepareStats {
    fn accumulate(&mut self, other: &Self) {
        self.trip_count += other.trip_count;
        self.chunk_count += other.chunk_count;
        self.malformed_chunks += other.malformed_chunks;
        self.placeholder_chunks += other.placeholder_chunks;
        self.trimmed_stations += other.trimmed_stations;
        self.unnamed_stations += other.unnamed_stations;
        self.shot_count += other.shot_count;
        self.invalid_shots += other.invalid_shots;
    }
}

/// One cave after the prepare stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCave {
    pub name: String,
    pub chunks: Vec<ReducedChunk>,
    pub stats: PrepareStats,
}

fn prepare_cave(
    cave: &Cave,
    config: &ReduceConfig,
    cancel: &dyn Cancellation,
) -> Result<PreparedCave, ReduceError> {
    let mut stats = PrepareStats {
        trip_count: cave.trips.len(),
        ..PrepareStats::default()
    };
    let mut chunks = Vec::new();

    for (trip_index, trip) in cave.trips.iter().enumerate() {
        let reducer = ShotReducer::new(&trip.corrections, config);
        for chunk in &trip.chunks {
            cancel.check()?;
            if !chunk.is_structurally_valid() {
                debug!(
                    "{}/{}: dropping malformed chunk ({} stations, {} shots)",
                    cave.name,
                    trip.name,
                    chunk.stations.len(),
                    chunk.shots.len()
                );
                stats.malformed_chunks += 1;
                continue;
            }
            if chunk.is_placeholder() {
                stats.placeholder_chunks += 1;
                continue;
            }

            let mut stations = chunk.stations.clone();
            let mut shots = chunk.shots.as_slice();
            let trailing_gap = stations.last().is_some_and(StationName::is_empty)
                && shots.last().is_some_and(|shot| !shot.is_valid());
            if trailing_gap && let Some((_, rest)) = shots.split_last() {
                stations.pop();
                shots = rest;
                stats.trimmed_stations += 1;
            }
            if stations.len() < 2 {
                continue;
            }

            let legs = shots
                .iter()
                .zip(stations.windows(2))
                .map(|(shot, pair)| {
                    if pair[0].is_empty() || pair[1].is_empty() {
                        stats.invalid_shots += 1;
                        return None;
                    }
                    match reducer.reduce(shot) {
                        Ok(reduced) => Some(reduced.displacement()),
                        Err(err @ ReduceError::InvalidShot(_)) => {
                            debug!("{}/{}: skipping shot {} -> {}: {err}", cave.name, trip.name, pair[0], pair[1]);
                            stats.invalid_shots += 1;
                            None
                        }
                        Err(err) => {
                            warn!("{}/{}: skipping shot {} -> {}: {err}", cave.name, trip.name, pair[0], pair[1]);
                            stats.invalid_shots += 1;
                            None
                        }
                    }
                })
                .collect::<Vec<_>>();
            stats.shot_count += legs.len();

            let runs = split_at_unnamed(trip_index, stations, legs);
            if runs.unnamed > 0 {
                debug!(
                    "{}/{}: cut chunk at {} unnamed station(s) into {} run(s)",
                    cave.name,
                    trip.name,
                    runs.unnamed,
                    runs.chunks.len()
                );
            }
            stats.unnamed_stations += runs.unnamed;
            stats.chunk_count += runs.chunks.len();
            chunks.extend(runs.chunks);
        }
    }

    debug!(
        "{}: prepared {} chunks, {} shots ({} invalid)",
        cave.name, stats.chunk_count, stats.shot_count, stats.invalid_shots
    );
    Ok(PreparedCave {
        name: cave.name.clone(),
        chunks,
        stats,
    })
}

/// A chunk cut at its unnamed stations.
struct Runs {
    chunks: Vec<ReducedChunk>,
    unnamed: usize,
}

/// Cut a chunk at every unnamed station.
///
/// Unnamed stations cannot be matched across chunks, so each one ends the
/// current run and its shots are left out. Runs shorter than one shot
/// are dropped.
fn split_at_unnamed(trip: usize, stations: Vec<StationName>, legs: Vec<Option<Point3>>) -> Runs {
    let mut runs = Runs {
        chunks: Vec::new(),
        unnamed: 0,
    };
    let mut run_stations = Vec::new();
    let mut run_legs = Vec::new();
    let mut legs = legs.into_iter();

    for (i, station) in stations.into_iter().enumerate() {
        let leg = if i == 0 { None } else { legs.next().flatten() };
        if station.is_empty() {
            runs.unnamed += 1;
            push_run(&mut runs.chunks, trip, &mut run_stations, &mut run_legs);
            continue;
        }
        if !run_stations.is_empty() {
            run_legs.push(leg);
        }
        run_stations.push(station);
    }
    push_run(&mut runs.chunks, trip, &mut run_stations, &mut run_legs);
    runs
}

fn push_run(
    chunks: &mut Vec<ReducedChunk>,
    trip: usize,
    stations: &mut Vec<StationName>,
    legs: &mut Vec<Option<Point3>>,
) {
    let stations = std::mem::take(stations);
    let legs = std::mem::take(legs);
    if stations.len() >= 2 {
        chunks.push(ReducedChunk {
            trip,
            stations,
            legs,
        });
    }
}

// ───────────────────────── Stage 1: Prepared ─────────────────────────

/// Pipeline state after filtering chunks and reducing shots.
///
/// Call [`decompose`](Self::decompose) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing -- call .decompose() to continue"]
pub struct Prepared {
    config: ReduceConfig,
    caves: Vec<PreparedCave>,
}

impl Prepared {
    /// Reduced chunks of every cave, in input order.
    #[must_use]
    pub fn prepared_caves(&self) -> &[PreparedCave] {
        &self.caves
    }

    /// Split every cave's chunks into junction-free edges.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError::Cancelled`], or
    /// [`ReduceError::UnsplittableStation`] on an internal inconsistency.
    pub fn decompose(self, cancel: &dyn Cancellation) -> Result<Decomposed, ReduceError> {
        let caves = self
            .caves
            .into_iter()
            .map(|cave| {
                let edges = decompose(cave.chunks, cancel)?;
                let violations = edges.interior_violations();
                if !violations.is_empty() {
                    warn!(
                        "{}: stations interior to more than one edge: {}",
                        cave.name,
                        violations
                            .iter()
                            .map(StationName::as_str)
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                }
                Ok(CaveEdges {
                    name: cave.name,
                    prepare: cave.stats,
                    edges,
                })
            })
            .collect::<Result<Vec<_>, ReduceError>>()?;
        Ok(Decomposed {
            config: self.config,
            caves,
        })
    }
}

/// One cave's edges, with the prepare-stage bookkeeping carried along.
#[derive(Debug, Clone, PartialEq)]
pub struct CaveEdges {
    pub name: String,
    pub prepare: PrepareStats,
    pub edges: EdgeSet,
}

// ───────────────────────── Stage 2: Decomposed ───────────────────────

/// Pipeline state after edge decomposition.
///
/// Call [`classify`](Self::classify) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing -- call .classify() to continue"]
pub struct Decomposed {
    config: ReduceConfig,
    caves: Vec<CaveEdges>,
}

impl Decomposed {
    /// Edges of every cave, in input order.
    #[must_use]
    pub fn edge_sets(&self) -> &[CaveEdges] {
        &self.caves
    }

    /// Label every edge as a loop member or a leg.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError::Cancelled`].
    pub fn classify(self, cancel: &dyn Cancellation) -> Result<Classified, ReduceError> {
        let mut classifications = Vec::with_capacity(self.caves.len());
        for cave in &self.caves {
            cancel.check()?;
            classifications.push(self.config.loop_classifier.classify(&cave.edges));
        }
        Ok(Classified {
            config: self.config,
            caves: self.caves,
            classifications,
        })
    }
}

// ───────────────────────── Stage 3: Classified ───────────────────────

/// Pipeline state after loop classification.
///
/// Call [`resolve`](Self::resolve) to advance to the final stage.
#[must_use = "pipeline stages are consumed by advancing -- call .resolve() to continue"]
pub struct Classified {
    config: ReduceConfig,
    caves: Vec<CaveEdges>,
    classifications: Vec<EdgeClassification>,
}

impl Classified {
    /// Edges of every cave, in input order.
    #[must_use]
    pub fn edge_sets(&self) -> &[CaveEdges] {
        &self.caves
    }

    /// Per-cave edge labels, parallel to [`edge_sets`](Self::edge_sets).
    #[must_use]
    pub fn classifications(&self) -> &[EdgeClassification] {
        &self.classifications
    }

    /// Position every station and build the line plot.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError::Cancelled`], or
    /// [`ReduceError::InvalidConfig`] if the point buffer outgrows `u32`
    /// indices.
    pub fn resolve(self, cancel: &dyn Cancellation) -> Result<Resolved, ReduceError> {
        let mut result = LinePlotResult::default();

        for (cave, classification) in self.caves.iter().zip(&self.classifications) {
            cancel.check()?;
            let resolved = PositionResolver::new(&cave.edges, result.points.len()).resolve(cancel)?;

            let mut stats = resolved.stats;
            stats.loop_edge_count = classification.loop_count();
            stats.leg_edge_count = classification.leg_count();

            let station_trips = cave
                .edges
                .memberships()
                .into_iter()
                .map(|(station, memberships)| {
                    let mut trips: Vec<usize> = memberships.iter().map(|&(trip, _)| trip).collect();
                    trips.sort_unstable();
                    trips.dedup();
                    (station, trips)
                })
                .collect::<BTreeMap<_, _>>();

            debug!(
                "{}: {} stations, {} segments, length {:.2} m, depth {:.2} m",
                cave.name, stats.station_count, stats.segment_count, stats.length, stats.depth
            );

            result.points.extend(resolved.points);
            result.indices.extend(resolved.indices);
            result.caves.push(CavePlot {
                name: cave.name.clone(),
                stats,
                station_indices: resolved.station_indices,
                station_trips,
            });
        }

        Ok(Resolved {
            config: self.config,
            caves: self.caves,
            classifications: self.classifications,
            result,
        })
    }
}

// ───────────────────────── Stage 4: Resolved ─────────────────────────

/// Pipeline state after position resolution -- the final stage.
///
/// Call [`into_result`](Self::into_result) to extract the
/// [`LinePlotResult`].
#[must_use = "call .into_result() to extract the LinePlotResult"]
pub struct Resolved {
    config: ReduceConfig,
    caves: Vec<CaveEdges>,
    classifications: Vec<EdgeClassification>,
    result: LinePlotResult,
}

impl Resolved {
    /// The line plot.
    #[must_use]
    pub const fn result(&self) -> &LinePlotResult {
        &self.result
    }

    /// Edges of every cave, in input order.
    #[must_use]
    pub fn edge_sets(&self) -> &[CaveEdges] {
        &self.caves
    }

    /// Per-cave edge labels.
    #[must_use]
    pub fn classifications(&self) -> &[EdgeClassification] {
        &self.classifications
    }

    /// The configuration this run used.
    #[must_use]
    pub const fn config(&self) -> &ReduceConfig {
        &self.config
    }

    /// Consume the pipeline and return the [`LinePlotResult`].
    #[must_use]
    pub fn into_result(self) -> LinePlotResult {
        self.result
    }
}

// ──────────────────── PipelineStage trait + Stage enum ────────────────

/// Total number of stages in the pipeline.
pub const STAGE_COUNT: usize = 5;

/// Trait implemented by every pipeline stage, enabling uniform iteration.
///
/// Each stage struct implements it, and [`Stage`] delegates to whichever
/// variant it holds.
pub trait PipelineStage: Sized {
    /// Human-readable name of this stage (e.g. `"prepare"`).
    const NAME: &str;

    /// Zero-based index of this stage (`0` for Pending through `4` for
    /// Resolved).
    const INDEX: usize;

    /// Stage-specific metrics for diagnostics.
    ///
    /// Returns `None` for the initial [`Pending`] stage which has not
    /// yet performed any processing.
    fn metrics(&self) -> Option<StageMetrics>;

    /// Advance to the next stage.
    ///
    /// Returns `Ok(Some(stage))` on success or `Ok(None)` if already at
    /// the final stage.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError`] if the stage transition fails or is
    /// cancelled.
    fn next(self, cancel: &dyn Cancellation) -> Result<Option<Stage>, ReduceError>;

    /// Run all remaining stages to completion.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError`] if any remaining stage fails or is
    /// cancelled.
    fn complete(self, cancel: &dyn Cancellation) -> Result<LinePlotResult, ReduceError>;
}

impl PipelineStage for Pending {
    const NAME: &str = "source";
    const INDEX: usize = 0;

    fn metrics(&self) -> Option<StageMetrics> {
        None
    }

    fn next(self, cancel: &dyn Cancellation) -> Result<Option<Stage>, ReduceError> {
        Ok(Some(Stage::Prepared(self.prepare(cancel)?)))
    }

    fn complete(self, cancel: &dyn Cancellation) -> Result<LinePlotResult, ReduceError> {
        self.prepare(cancel)?.complete(cancel)
    }
}

impl Prepared {
    /// Metrics for this stage.
    #[must_use]
    pub fn stage_metrics(&self) -> StageMetrics {
        let mut total = PrepareStats::default();
        for cave in &self.caves {
            total.accumulate(&cave.stats);
        }
        StageMetrics::Prepare {
            cave_count: self.caves.len(),
            trip_count: total.trip_count,
            chunk_count: total.chunk_count,
            malformed_chunks: total.malformed_chunks,
            placeholder_chunks: total.placeholder_chunks,
            trimmed_stations: total.trimmed_stations,
            unnamed_stations: total.unnamed_stations,
            shot_count: total.shot_count,
            invalid_shots: total.invalid_shots,
        }
    }
}

impl PipelineStage for Prepared {
    const NAME: &str = "prepare";
    const INDEX: usize = 1;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(self.stage_metrics())
    }

    fn next(self, cancel: &dyn Cancellation) -> Result<Option<Stage>, ReduceError> {
        Ok(Some(Stage::Decomposed(self.decompose(cancel)?)))
    }

    fn complete(self, cancel: &dyn Cancellation) -> Result<LinePlotResult, ReduceError> {
        self.decompose(cancel)?.complete(cancel)
    }
}

impl Decomposed {
    /// Metrics for this stage.
    #[must_use]
    pub fn stage_metrics(&self) -> StageMetrics {
        StageMetrics::Decompose {
            edge_count: self.caves.iter().map(|c| c.edges.len()).sum(),
            leg_count: self.caves.iter().map(|c| c.edges.leg_count()).sum(),
            longest_edge: self
                .caves
                .iter()
                .flat_map(|c| c.edges.edges().iter().map(|e| e.legs().len()))
                .max()
                .unwrap_or(0),
        }
    }
}

impl PipelineStage for Decomposed {
    const NAME: &str = "decompose";
    const INDEX: usize = 2;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(self.stage_metrics())
    }

    fn next(self, cancel: &dyn Cancellation) -> Result<Option<Stage>, ReduceError> {
        Ok(Some(Stage::Classified(self.classify(cancel)?)))
    }

    fn complete(self, cancel: &dyn Cancellation) -> Result<LinePlotResult, ReduceError> {
        self.classify(cancel)?.complete(cancel)
    }
}

impl Classified {
    /// Metrics for this stage.
    #[must_use]
    pub fn stage_metrics(&self) -> StageMetrics {
        StageMetrics::Classify {
            strategy: self.config.loop_classifier.to_string(),
            loop_edges: self.classifications.iter().map(EdgeClassification::loop_count).sum(),
            leg_edges: self.classifications.iter().map(EdgeClassification::leg_count).sum(),
        }
    }
}

impl PipelineStage for Classified {
    const NAME: &str = "classify";
    const INDEX: usize = 3;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(self.stage_metrics())
    }

    fn next(self, cancel: &dyn Cancellation) -> Result<Option<Stage>, ReduceError> {
        Ok(Some(Stage::Resolved(self.resolve(cancel)?)))
    }

    fn complete(self, cancel: &dyn Cancellation) -> Result<LinePlotResult, ReduceError> {
        Ok(self.resolve(cancel)?.into_result())
    }
}

impl Resolved {
    /// Metrics for this stage.
    #[must_use]
    pub fn stage_metrics(&self) -> StageMetrics {
        let caves = &self.result.caves;
        StageMetrics::Resolve {
            station_count: caves.iter().map(|c| c.stats.station_count).sum(),
            segment_count: self.result.segment_count(),
            unreachable_stations: caves.iter().map(|c| c.stats.unreachable_stations.len()).sum(),
            total_length: caves.iter().map(|c| c.stats.length).sum(),
            max_depth: caves.iter().map(|c| c.stats.depth).fold(0.0, f64::max),
            max_misclosure: caves.iter().map(|c| c.stats.max_misclosure).fold(0.0, f64::max),
        }
    }
}

impl PipelineStage for Resolved {
    const NAME: &str = "resolve";
    const INDEX: usize = 4;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(self.stage_metrics())
    }

    fn next(self, _cancel: &dyn Cancellation) -> Result<Option<Stage>, ReduceError> {
        Ok(None)
    }

    fn complete(self, _cancel: &dyn Cancellation) -> Result<LinePlotResult, ReduceError> {
        Ok(self.into_result())
    }
}

/// Enum wrapping all pipeline stages for uniform, loopable access.
///
/// ```rust
/// # use speleo_reduce::{Pipeline, ReduceConfig, ReduceError, Region};
/// # use speleo_reduce::cancel::NeverCancel;
/// # use speleo_reduce::pipeline::{Advance, Stage};
/// # fn run(region: Region) -> Result<(), ReduceError> {
/// let mut stage: Stage = Pipeline::new(region, ReduceConfig::default()).into();
/// loop {
///     match stage.advance(&NeverCancel)? {
///         Advance::Next(next) => stage = next,
///         Advance::Complete(done) => { stage = done; break; }
///     }
/// }
/// let result = stage.complete(&NeverCancel)?;
/// # Ok(())
/// # }
/// ```
#[must_use]
pub enum Stage {
    /// See [`Pending`].
    Pending(Pending),
    /// See [`Prepared`].
    Prepared(Prepared),
    /// See [`Decomposed`].
    Decomposed(Decomposed),
    /// See [`Classified`].
    Classified(Classified),
    /// See [`Resolved`].
    Resolved(Resolved),
}

/// Compile-time guard: adding a [`Stage`] variant makes this match
/// non-exhaustive, a reminder to bump [`STAGE_COUNT`].
#[allow(dead_code, clippy::match_same_arms)]
const fn _stage_count_guard(s: &Stage) {
    match s {
        Stage::Pending(_)
        | Stage::Prepared(_)
        | Stage::Decomposed(_)
        | Stage::Classified(_)
        | Stage::Resolved(_) => {}
    }
}

/// Result of [`Stage::advance`]: either the next stage or the
/// completed final stage returned unchanged.
#[must_use]
pub enum Advance {
    /// The pipeline advanced to this next stage.
    Next(Stage),
    /// The pipeline was already at the final stage.
    Complete(Stage),
}

/// Delegate a method call to whichever `Stage` variant is active.
macro_rules! delegate {
    ($self:ident, $method:ident $(, $arg:expr)*) => {
        match $self {
            Self::Pending(s) => s.$method($($arg),*),
            Self::Prepared(s) => s.$method($($arg),*),
            Self::Decomposed(s) => s.$method($($arg),*),
            Self::Classified(s) => s.$method($($arg),*),
            Self::Resolved(s) => s.$method($($arg),*),
        }
    };
}

impl Stage {
    /// Human-readable name of the current stage.
    #[must_use]
    pub fn name(&self) -> &'static str {
        delegate!(self, name)
    }

    /// Zero-based index of the current stage.
    #[must_use]
    pub fn index(&self) -> usize {
        delegate!(self, index)
    }

    /// Stage-specific metrics for diagnostics.
    #[must_use]
    pub fn metrics(&self) -> Option<StageMetrics> {
        delegate!(self, metrics)
    }

    /// Whether the pipeline is at the final stage.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// Advance to the next stage.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError`] if the stage transition fails or is
    /// cancelled.
    pub fn next(self, cancel: &dyn Cancellation) -> Result<Option<Self>, ReduceError> {
        delegate!(self, next, cancel)
    }

    /// Advance to the next stage, returning `self` unchanged if already
    /// complete.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError`] if the stage transition fails or is
    /// cancelled.
    pub fn advance(self, cancel: &dyn Cancellation) -> Result<Advance, ReduceError> {
        if self.is_complete() {
            return Ok(Advance::Complete(self));
        }
        // Non-complete stages always return Ok(Some(_)) from next().
        #[allow(clippy::unreachable)]
        let next = self
            .next(cancel)?
            .unwrap_or_else(|| unreachable!("non-complete stage returned None from next()"));
        Ok(Advance::Next(next))
    }

    /// Run all remaining stages to completion.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError`] if any remaining stage fails or is
    /// cancelled.
    pub fn complete(self, cancel: &dyn Cancellation) -> Result<LinePlotResult, ReduceError> {
        delegate!(self, complete, cancel)
    }
}

// `PipelineStage`'s associated constants aren't callable via `self.NAME`,
// so the macro goes through this helper.
trait StageMetadata {
    fn name(&self) -> &'static str;
    fn index(&self) -> usize;
}

impl<T: PipelineStage> StageMetadata for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn index(&self) -> usize {
        T::INDEX
    }
}

impl From<Pending> for Stage {
    fn from(s: Pending) -> Self {
        Self::Pending(s)
    }
}

impl From<Prepared> for Stage {
    fn from(s: Prepared) -> Self {
        Self::Prepared(s)
    }
}

impl From<Decomposed> for Stage {
    fn from(s: Decomposed) -> Self {
        Self::Decomposed(s)
    }
}

impl From<Classified> for Stage {
    fn from(s: Classified) -> Self {
        Self::Classified(s)
    }
}

impl From<Resolved> for Stage {
    fn from(s: Resolved) -> Self {
        Self::Resolved(s)
    }
}

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental survey reduction pipeline.
///
/// Created via [`Pipeline::new`], which stores the region and config
/// without doing any processing.
pub struct Pipeline;

impl Pipeline {
    /// Create a new pipeline in the [`Pending`] state.
    ///
    /// No processing is performed. Call [`.prepare()`](Pending::prepare)
    /// (or convert to a [`Stage`] and loop) to begin.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(region: Region, config: ReduceConfig) -> Pending {
        Pending { config, region }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::cancel::NeverCancel;
    use crate::loops::LoopClassifierKind;
    use crate::survey::{Shot, SurveyChunk, Trip};

    fn line_region() -> Region {
        let trip = Trip::new("t1").with_chunk(SurveyChunk::from_legs(
            "A",
            [
                (Shot::foresight(10.0, 90.0, 0.0), "B"),
                (Shot::foresight(10.0, 90.0, 0.0), "C"),
            ],
        ));
        Region {
            caves: vec![Cave::new("Line").with_trip(trip)],
        }
    }

    #[test]
    fn stages_chain_to_a_result() {
        let resolved = Pipeline::new(line_region(), ReduceConfig::default())
            .prepare(&NeverCancel)
            .unwrap()
            .decompose(&NeverCancel)
            .unwrap()
            .classify(&NeverCancel)
            .unwrap()
            .resolve(&NeverCancel)
            .unwrap();
        assert_eq!(resolved.edge_sets().len(), 1);
        assert_eq!(resolved.classifications()[0].leg_count(), 1);
        let result = resolved.into_result();
        assert_eq!(result.points.len(), 3);
        assert_eq!(result.indices, vec![0, 1, 1, 2]);
        assert_eq!(result.caves[0].stats.leg_edge_count, 1);
    }

    #[test]
    fn prepare_drops_malformed_and_placeholder_chunks() {
        let mut region = line_region();
        let trip = &mut region.caves[0].trips[0];
        trip.chunks.push(SurveyChunk::new(vec!["X".into()], Vec::new()));
        trip.chunks
            .push(SurveyChunk::new(vec!["".into(), "".into()], vec![Shot::default()]));

        let prepared = Pipeline::new(region, ReduceConfig::default())
            .prepare(&NeverCancel)
            .unwrap();
        let stats = prepared.prepared_caves()[0].stats;
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(stats.malformed_chunks, 1);
        assert_eq!(stats.placeholder_chunks, 1);
        assert_eq!(stats.shot_count, 2);
    }

    #[test]
    fn prepare_trims_trailing_unnamed_station() {
        let mut region = line_region();
        let chunk = &mut region.caves[0].trips[0].chunks[0];
        chunk.stations.push("".into());
        chunk.shots.push(Shot::default());

        let prepared = Pipeline::new(region, ReduceConfig::default())
            .prepare(&NeverCancel)
            .unwrap();
        let cave = &prepared.prepared_caves()[0];
        assert_eq!(cave.stats.trimmed_stations, 1);
        assert_eq!(cave.stats.invalid_shots, 0);
        assert_eq!(cave.chunks[0].stations.len(), 3);
    }

    #[test]
    fn prepare_cuts_chunks_at_unnamed_stations() {
        let mut region = line_region();
        let chunk = &mut region.caves[0].trips[0].chunks[0];
        chunk.stations.insert(1, "".into());
        chunk.shots.insert(1, Shot::foresight(10.0, 90.0, 0.0));
        chunk.stations.push("".into());
        chunk.shots.push(Shot::foresight(10.0, 90.0, 0.0));

        let prepared = Pipeline::new(region, ReduceConfig::default())
            .prepare(&NeverCancel)
            .unwrap();
        let cave = &prepared.prepared_caves()[0];
        assert_eq!(cave.stats.unnamed_stations, 2);
        assert_eq!(cave.stats.trimmed_stations, 0);
        assert_eq!(cave.stats.shot_count, 4);
        assert_eq!(cave.stats.invalid_shots, 3);
        assert_eq!(cave.stats.chunk_count, 1);
        assert_eq!(
            cave.chunks[0].stations,
            vec![StationName::from("B"), StationName::from("C")]
        );
        assert!(cave.chunks[0].legs[0].is_some());
        assert!(cave.chunks.iter().flat_map(|c| &c.stations).all(|s| !s.is_empty()));
    }

    #[test]
    fn invalid_shots_become_gaps() {
        let mut region = line_region();
        region.caves[0].trips[0].chunks[0].shots[1].front_inclination = None;

        let prepared = Pipeline::new(region, ReduceConfig::default())
            .prepare(&NeverCancel)
            .unwrap();
        let cave = &prepared.prepared_caves()[0];
        assert_eq!(cave.stats.invalid_shots, 1);
        assert!(cave.chunks[0].legs[0].is_some());
        assert!(cave.chunks[0].legs[1].is_none());
    }

    #[test]
    fn invalid_config_is_rejected_before_work() {
        let config = ReduceConfig {
            vertical_tolerance: -1.0,
            ..ReduceConfig::default()
        };
        let result = Pipeline::new(line_region(), config).prepare(&NeverCancel);
        assert!(matches!(result, Err(ReduceError::InvalidConfig(_))));
    }

    #[test]
    fn cancelled_stage_produces_nothing() {
        let cancel = AtomicBool::new(true);
        let result = Pipeline::new(line_region(), ReduceConfig::default()).prepare(&cancel);
        assert!(matches!(result, Err(ReduceError::Cancelled)));
    }

    #[test]
    fn stage_enum_walks_every_stage() {
        let mut stage: Stage = Pipeline::new(line_region(), ReduceConfig::default()).into();
        let mut names = vec![stage.name()];
        loop {
            match stage.advance(&NeverCancel).unwrap() {
                Advance::Next(next) => {
                    assert_eq!(next.index(), names.len());
                    assert!(next.metrics().is_some());
                    names.push(next.name());
                    stage = next;
                }
                Advance::Complete(done) => {
                    stage = done;
                    break;
                }
            }
        }
        assert_eq!(names, vec!["source", "prepare", "decompose", "classify", "resolve"]);
        assert_eq!(names.len(), STAGE_COUNT);
        let result = stage.complete(&NeverCancel).unwrap();
        assert_eq!(result.segment_count(), 2);
    }

    #[test]
    fn classify_metrics_name_the_strategy() {
        let config = ReduceConfig {
            loop_classifier: LoopClassifierKind::UnionFind,
            ..ReduceConfig::default()
        };
        let classified = Pipeline::new(line_region(), config)
            .prepare(&NeverCancel)
            .unwrap()
            .decompose(&NeverCancel)
            .unwrap()
            .classify(&NeverCancel)
            .unwrap();
        assert!(matches!(
            classified.metrics(),
            Some(StageMetrics::Classify {
                ref strategy,
                loop_edges: 0,
                leg_edges: 1,
            }) if strategy == "union-find"
        ));
    }

    #[test]
    fn station_trips_collect_every_trip() {
        let mut region = line_region();
        region.caves[0].trips.push(Trip::new("t2").with_chunk(SurveyChunk::from_legs(
            "B",
            [(Shot::foresight(3.0, 0.0, 0.0), "Z")],
        )));
        let result = crate::process(&region, &ReduceConfig::default()).unwrap();
        let trips = &result.caves[0].station_trips;
        assert_eq!(trips[&StationName::from("B")], vec![0, 1]);
        assert_eq!(trips[&StationName::from("Z")], vec![1]);
        assert_eq!(trips[&StationName::from("A")], vec![0]);
    }
}
