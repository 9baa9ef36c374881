//! Reduction diagnostics: timing, counts, and other metrics for each stage.
//!
//! Every call to [`process_with_diagnostics`] collects diagnostics
//! alongside the line plot. Time is read through the [`Clock`] trait so
//! the core stays free of platform time APIs; callers supply a
//! monotonic clock (the bench CLI wraps `std::time::Instant`).
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::Cancellation;
use crate::pipeline::Pipeline;
use crate::survey::Region;
use crate::types::{LinePlotResult, ReduceConfig, ReduceError};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// A monotonic time source.
pub trait Clock {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// Diagnostics collected from a single reduction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceDiagnostics {
    /// Stage 1: chunk filtering and shot reduction.
    pub prepare: StageDiagnostics,
    /// Stage 2: edge decomposition.
    pub decompose: StageDiagnostics,
    /// Stage 3: loop classification.
    pub classify: StageDiagnostics,
    /// Stage 4: position resolution.
    pub resolve: StageDiagnostics,
    /// Total wall-clock duration of the entire run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: ReduceSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Chunk filtering and shot reduction.
    Prepare {
        cave_count: usize,
        trip_count: usize,
        /// Chunks kept for decomposition.
        chunk_count: usize,
        malformed_chunks: usize,
        placeholder_chunks: usize,
        trimmed_stations: usize,
        /// Unnamed stations that cut their chunk.
        unnamed_stations: usize,
        /// Shots in kept chunks.
        shot_count: usize,
        /// Shots that could not be reduced.
        invalid_shots: usize,
    },
    /// Edge decomposition.
    Decompose {
        edge_count: usize,
        /// Total shots across all edges.
        leg_count: usize,
        /// Most shots on a single edge.
        longest_edge: usize,
    },
    /// Loop classification.
    Classify {
        /// Which classifier strategy was used.
        strategy: String,
        loop_edges: usize,
        leg_edges: usize,
    },
    /// Position resolution.
    Resolve {
        station_count: usize,
        segment_count: usize,
        unreachable_stations: usize,
        /// Sum of cave lengths, in meters.
        total_length: f64,
        /// Deepest cave, in meters.
        max_depth: f64,
        /// Largest loop misclosure, in meters.
        max_misclosure: f64,
    },
}

/// High-level summary counts for the entire run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceSummary {
    pub cave_count: usize,
    pub station_count: usize,
    pub segment_count: usize,
    /// Sum of cave lengths, in meters.
    pub total_length: f64,
}

impl ReduceDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Reduction Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Caves: {}  Stations: {}  Segments: {}  Length: {:.2} m",
            self.summary.cave_count,
            self.summary.station_count,
            self.summary.segment_count,
            self.summary.total_length,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let stages = [
            ("Prepare", &self.prepare),
            ("Decompose", &self.decompose),
            ("Classify", &self.classify),
            ("Resolve", &self.resolve),
        ];
        for (name, diag) in stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Prepare {
            cave_count,
            trip_count,
            chunk_count,
            malformed_chunks,
            placeholder_chunks,
            trimmed_stations,
            unnamed_stations,
            shot_count,
            invalid_shots,
        } => format!(
            "{cave_count} caves, {trip_count} trips, {chunk_count} chunks (-{malformed_chunks} malformed -{placeholder_chunks} empty, {trimmed_stations} trimmed, {unnamed_stations} cut), {shot_count} shots ({invalid_shots} invalid)",
        ),
        StageMetrics::Decompose {
            edge_count,
            leg_count,
            longest_edge,
        } => format!("{edge_count} edges, {leg_count} shots (longest {longest_edge})"),
        StageMetrics::Classify {
            strategy,
            loop_edges,
            leg_edges,
        } => format!("{strategy} {loop_edges} loop / {leg_edges} leg"),
        StageMetrics::Resolve {
            station_count,
            segment_count,
            unreachable_stations,
            total_length,
            max_depth,
            max_misclosure,
        } => format!(
            "{station_count} stations, {segment_count} segments, {unreachable_stations} unreachable, length={total_length:.2}m depth={max_depth:.2}m misclosure={max_misclosure:.3}m",
        ),
    }
}

/// Run the full pipeline, timing every stage with `clock`.
///
/// # Errors
///
/// Returns [`ReduceError::InvalidConfig`] for an invalid configuration,
/// or [`ReduceError::Cancelled`].
pub fn process_with_diagnostics(
    region: Region,
    config: ReduceConfig,
    clock: &dyn Clock,
    cancel: &dyn Cancellation,
) -> Result<(LinePlotResult, ReduceDiagnostics), ReduceError> {
    let start = clock.now();

    let mut mark = start;
    let mut lap = |metrics: StageMetrics| {
        let now = clock.now();
        let duration = now.saturating_sub(mark);
        mark = now;
        StageDiagnostics { duration, metrics }
    };

    let prepared = Pipeline::new(region, config).prepare(cancel)?;
    let prepare = lap(prepared.stage_metrics());
    let decomposed = prepared.decompose(cancel)?;
    let decompose = lap(decomposed.stage_metrics());
    let classified = decomposed.classify(cancel)?;
    let classify = lap(classified.stage_metrics());
    let resolved = classified.resolve(cancel)?;
    let resolve = lap(resolved.stage_metrics());
    let total_duration = clock.now().saturating_sub(start);

    let result = resolved.into_result();
    let summary = ReduceSummary {
        cave_count: result.caves.len(),
        station_count: result.points.len(),
        segment_count: result.segment_count(),
        total_length: result.caves.iter().map(|c| c.stats.length).sum(),
    };

    Ok((
        result,
        ReduceDiagnostics {
            prepare,
            decompose,
            classify,
            resolve,
            total_duration,
            summary,
        },
    ))
}
