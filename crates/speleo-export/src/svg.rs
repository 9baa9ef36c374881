//! SVG export serializer.
//!
//! Converts a [`LinePlotResult`] into an SVG string using the [`svg`]
//! crate for document construction, XML escaping, and path data
//! formatting.
//!
//! Each cave becomes one `<path>` element. Consecutive shots that share a
//! station continue the current subpath with `L`; every break starts a new
//! one with `M`. Survey coordinates are in meters with north (or up)
//! positive, so the vertical axis is flipped for SVG's downward `y`.
//!
//! Optional [`SvgMetadata`] embeds `<title>` and `<desc>` elements for
//! accessibility and to help file managers identify exported files.
//!
//! This is a pure function with no I/O -- it returns a `String`.

use std::fmt;
use std::str::FromStr;

use svg::Document;
use svg::node::element::path::Data;
use svg::node::element::{Description, Element, Path, Title};
use svg::node::{Node, Text, Value};

use speleo_reduce::{LinePlotResult, Point3};

/// Blank space around the drawing, as a fraction of its larger extent.
const MARGIN_FRACTION: f64 = 0.05;

/// Smallest extent of the `viewBox`, in meters, so a single station or a
/// perfectly straight passage still yields a drawable document.
const MIN_EXTENT: f64 = 1.0;

/// How 3-D station positions are flattened onto the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    /// Looking down: east to the right, north up.
    #[default]
    Plan,
    /// Extended section looking north: east to the right, up up.
    ProfileEast,
    /// Section looking west: north to the right, up up.
    ProfileNorth,
}

impl Projection {
    /// Every projection, in menu order.
    pub const ALL: [Self; 3] = [Self::Plan, Self::ProfileEast, Self::ProfileNorth];

    /// Stable identifier, used by the CLI.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::ProfileEast => "profile-east",
            Self::ProfileNorth => "profile-north",
        }
    }

    /// Project `p` to page coordinates with `y` pointing up.
    #[must_use]
    pub const fn project(self, p: Point3) -> (f64, f64) {
        match self {
            Self::Plan => (p.x, p.y),
            Self::ProfileEast => (p.x, p.z),
            Self::ProfileNorth => (p.y, p.z),
        }
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Projection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|p| p.name()).collect();
                format!("unknown projection {s:?} (expected one of {})", names.join(", "))
            })
    }
}

/// Metadata to embed in the SVG document.
///
/// All fields are optional. Text values are XML-escaped automatically by
/// the `svg` crate.
#[derive(Debug, Clone, Default)]
pub struct SvgMetadata<'a> {
    /// Document title, emitted as `<title>`. Typically the region or
    /// cave name.
    pub title: Option<&'a str>,

    /// Document description, emitted as `<desc>`.
    pub description: Option<&'a str>,

    /// Serialized reduction config, emitted inside `<metadata>` so
    /// exported files carry the settings that produced them.
    pub config_json: Option<&'a str>,
}

/// Build an SVG path `d` attribute from index pairs into `points`.
///
/// Page `y` is negated so north (or up) points toward the top. Pairs
/// referencing a missing point are skipped. Returns an empty string when
/// nothing is drawable.
#[must_use]
pub fn build_path_data(points: &[Point3], indices: &[u32], projection: Projection) -> String {
    let page = |index: u32| {
        points.get(index as usize).map(|&p| {
            let (x, y) = projection.project(p);
            (x, flip(y))
        })
    };

    let mut data = Data::new();
    let mut pen: Option<u32> = None;
    let mut drawn = false;
    for pair in indices.chunks_exact(2) {
        let (from, to) = (pair[0], pair[1]);
        let (Some(start), Some(end)) = (page(from), page(to)) else {
            continue;
        };
        if pen != Some(from) {
            data = data.move_to(start);
        }
        data = data.line_to(end);
        pen = Some(to);
        drawn = true;
    }

    if drawn {
        String::from(Value::from(data))
    } else {
        String::new()
    }
}

/// Negate for SVG's downward `y`, without producing `-0`.
fn flip(y: f64) -> f64 {
    0.0 - y
}

/// Page-space bounds `(min_x, min_y, max_x, max_y)` of every point, with
/// `y` already flipped.
fn bounds(points: &[Point3], projection: Projection) -> Option<(f64, f64, f64, f64)> {
    points.iter().fold(None, |acc, &p| {
        let (x, y) = projection.project(p);
        let y = flip(y);
        Some(match acc {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        })
    })
}

/// Serialize a line plot into an SVG document string.
///
/// The `viewBox` is in survey meters and fits every resolved station,
/// plus a margin. Each cave's segments are drawn as one `<path>` with an
/// `id` of `cave-N`; caves with no drawable segments are skipped.
#[must_use]
pub fn to_svg(
    result: &LinePlotResult,
    projection: Projection,
    metadata: &SvgMetadata<'_>,
) -> String {
    let (min_x, min_y, max_x, max_y) = bounds(&result.points, projection).unwrap_or_default();
    let width = (max_x - min_x).max(MIN_EXTENT);
    let height = (max_y - min_y).max(MIN_EXTENT);
    let margin = width.max(height) * MARGIN_FRACTION;
    let view_box = (
        min_x - margin,
        min_y - margin,
        2.0f64.mul_add(margin, width),
        2.0f64.mul_add(margin, height),
    );
    let stroke_width = width.max(height) / 500.0;

    let mut doc = Document::new()
        .set("viewBox", view_box)
        .set("data-projection", projection.name());

    if let Some(title) = metadata.title {
        doc = doc.add(Title::new(title));
    }

    if let Some(description) = metadata.description {
        doc = doc.add(Description::new().add(Text::new(description)));
    }

    if let Some(config_json) = metadata.config_json {
        let mut config_el = Element::new("speleo:reduce-config");
        config_el.assign("xmlns:speleo", "urn:speleo-reduce:config:1");
        config_el.append(Text::new(config_json));
        let mut metadata_el = Element::new("metadata");
        metadata_el.append(config_el);
        doc = doc.add(metadata_el);
    }

    // Caves own contiguous runs of the index buffer, in order.
    let mut offset = 0;
    for (i, cave) in result.caves.iter().enumerate() {
        let end = (offset + cave.stats.segment_count * 2).min(result.indices.len());
        let indices = result.indices.get(offset..end).unwrap_or_default();
        offset = end;

        let d = build_path_data(&result.points, indices, projection);
        if d.is_empty() {
            continue;
        }

        let mut path = Path::new()
            .set("id", format!("cave-{i}"))
            .set("d", d)
            .set("fill", "none")
            .set("stroke", "black")
            .set("stroke-width", stroke_width)
            .set("stroke-linecap", "round")
            .set("stroke-linejoin", "round");
        if !cave.name.is_empty() {
            path = path.add(Title::new(cave.name.as_str()));
        }
        doc = doc.add(path);
    }

    // The svg crate omits the XML declaration, so we prepend it.
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{doc}\n")
}
