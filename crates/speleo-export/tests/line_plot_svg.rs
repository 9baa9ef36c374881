//! Integration test: reduce a small two-cave region and export it to SVG
//! in every projection.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use speleo_export::{Projection, SvgMetadata, to_svg};
use speleo_reduce::{Cave, ReduceConfig, Region, Shot, SurveyChunk, Trip};

fn region() -> Region {
    let loop_trip = Trip::new("loop")
        .with_chunk(SurveyChunk::from_legs(
            "A1",
            [
                (Shot::foresight(10.0, 90.0, -10.0), "A2"),
                (Shot::foresight(8.0, 0.0, 5.0), "A3"),
            ],
        ))
        .with_chunk(SurveyChunk::from_legs(
            "A3",
            [(Shot::foresight(12.0, 230.0, 0.0), "A1")],
        ));
    let dig = Trip::new("dig").with_chunk(SurveyChunk::from_legs(
        "B1",
        [(Shot::foresight(4.0, 180.0, -45.0), "B2")],
    ));
    Region {
        caves: vec![
            Cave::new("Upper").with_trip(loop_trip),
            Cave::new("Lower").with_trip(dig),
        ],
    }
}

#[test]
fn region_to_svg_in_every_projection() {
    let config = ReduceConfig::default();
    let result = speleo_reduce::process(&region(), &config).expect("reduction should succeed");
    assert_eq!(result.caves.len(), 2);

    let config_json = serde_json::to_string(&config).unwrap();
    for projection in Projection::ALL {
        let description = format!("{projection} view");
        let metadata = SvgMetadata {
            title: Some("Test region"),
            description: Some(&description),
            config_json: Some(&config_json),
        };
        let svg = to_svg(&result, projection, &metadata);

        assert!(svg.contains("<svg"));
        assert!(svg.contains("</svg>"));
        assert_eq!(svg.matches("<path").count(), 2, "{projection}");
        assert!(svg.contains("<title>Upper</title>"));
        assert!(svg.contains("<title>Lower</title>"));
        assert!(svg.contains(&format!("<desc>{projection} view</desc>")));
        assert!(svg.contains("loop_classifier"));
    }
}
