//! speleo-reduce: Cave survey reduction (sans-IO).
//!
//! Turns recorded survey shots into render-ready line geometry through:
//! prepare (filter chunks, reduce shots) -> decompose (edges) ->
//! classify (loop or leg) -> resolve (positions, index buffer).
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! [`Region`] values and returns structured data. File handling and
//! rendering live in `speleo-bench` and `speleo-export`.

pub mod cancel;
pub mod changes;
pub mod diagnostics;
pub mod edge;
pub mod fingerprint;
pub mod line_plot_task;
pub mod loops;
pub mod pipeline;
pub mod position;
pub mod shot;
pub mod survey;
pub mod task;
pub mod types;
pub mod units;

pub use loops::{EdgeRole, LoopClassifier, LoopClassifierKind};
pub use pipeline::{Advance, Pipeline, PipelineStage, STAGE_COUNT, Stage};
pub use survey::{Cave, Region, Shot, SurveyChunk, Trip, TripCorrections};
pub use types::{
    CavePlot, CaveStats, LinePlotResult, Point3, ReduceConfig, ReduceError, StationName,
};
pub use units::{AngleUnit, LengthUnit, Unit, UnitValue};

/// Run the full reduction without cancellation.
///
/// Produces a [`LinePlotResult`] with every resolved station position,
/// one index pair per drawable shot, and per-cave statistics.
///
/// # Pipeline steps
///
/// 1. Drop malformed and placeholder chunks, reduce every shot
/// 2. Decompose chunks into edges (each station interior to at most one)
/// 3. Classify edges as loop members or legs (pluggable strategy)
/// 4. Resolve positions from the first station of each cave
///
/// # Errors
///
/// Returns [`ReduceError::InvalidConfig`] if `config` fails validation.
pub fn process(region: &Region, config: &ReduceConfig) -> Result<LinePlotResult, ReduceError> {
    Pipeline::new(region.clone(), *config)
        .prepare(&cancel::NeverCancel)?
        .decompose(&cancel::NeverCancel)?
        .classify(&cancel::NeverCancel)?
        .resolve(&cancel::NeverCancel)
        .map(pipeline::Resolved::into_result)
}
