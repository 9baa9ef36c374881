//! speleo-export: Pure format serializers (sans-IO)
//!
//! Converts reduced line plots into output formats. Currently supports
//! SVG in plan and profile projections.

pub mod svg;

pub use svg::{Projection, SvgMetadata, build_path_data, to_svg};
