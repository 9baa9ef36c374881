//! Integration test: reduce a JSON region end to end, through both the
//! one-shot entry point and the background task.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use speleo_reduce::cancel::NeverCancel;
use speleo_reduce::diagnostics::{Clock, process_with_diagnostics};
use speleo_reduce::line_plot_task::LinePlotTask;
use speleo_reduce::{Point3, ReduceConfig, Region, StationName};

const REGION_JSON: &str = r#"{
  "caves": [
    {
      "name": "Blue Spring",
      "trips": [
        {
          "name": "Entrance series",
          "corrections": { "distance_unit": "feet" },
          "chunks": [
            {
              "stations": ["E1", "E2", "E3"],
              "shots": [
                {
                  "distance": { "value": 10.0, "unit": "feet" },
                  "front_azimuth": { "value": 90.0, "unit": "degrees" },
                  "back_azimuth": { "value": 270.0, "unit": "degrees" },
                  "front_inclination": { "value": 0.0, "unit": "degrees" },
                  "back_inclination": { "value": 0.0, "unit": "degrees" }
                },
                {
                  "distance": { "value": 20.0, "unit": "feet" },
                  "front_inclination": { "value": -90.0, "unit": "degrees" }
                }
              ]
            }
          ]
        },
        {
          "name": "Side passage",
          "chunks": [
            {
              "stations": ["e2", "S1"],
              "shots": [
                {
                  "distance": { "value": 3.0, "unit": "meters" },
                  "front_azimuth": { "value": 0.0, "unit": "degrees" },
                  "front_inclination": { "value": 0.0, "unit": "degrees" }
                }
              ]
            }
          ]
        }
      ]
    }
  ]
}"#;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn region() -> Region {
    serde_json::from_str(REGION_JSON).expect("region JSON should parse")
}

fn near(actual: Point3, expected: Point3) -> bool {
    actual.distance(expected) < 1e-6
}

#[test]
fn json_region_reduces() {
    init_logging();
    let result = speleo_reduce::process(&region(), &ReduceConfig::default()).unwrap();

    let feet = 0.3048;
    let e2 = result.position(0, &StationName::from("E2")).unwrap();
    let e3 = result.position(0, &StationName::from("E3")).unwrap();
    let s1 = result.position(0, &StationName::from("S1")).unwrap();
    assert!(near(e2, Point3::new(10.0 * feet, 0.0, 0.0)), "{e2:?}");
    assert!(near(e3, Point3::new(10.0 * feet, 0.0, -20.0 * feet)), "{e3:?}");
    assert!(near(s1, Point3::new(10.0 * feet, 3.0, 0.0)), "{s1:?}");

    let stats = &result.caves[0].stats;
    assert_eq!(stats.station_count, 4);
    assert_eq!(result.segment_count(), 3);
    assert!((stats.length - (30.0 * feet + 3.0)).abs() < 1e-6);
    assert!((stats.depth - 20.0 * feet).abs() < 1e-6);
    assert_eq!(result.vertex_data().len(), 12);

    // Station names match case-insensitively across trips.
    assert_eq!(
        result.caves[0].station_trips.get(&StationName::from("E2")),
        Some(&vec![0, 1])
    );
}

#[test]
fn result_serializes() {
    init_logging();
    let result = speleo_reduce::process(&region(), &ReduceConfig::default()).unwrap();
    let json = serde_json::to_string(&result).unwrap();
    let back: speleo_reduce::LinePlotResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back.indices, result.indices);
    assert_eq!(back.caves[0].name, "Blue Spring");
}

#[test]
fn diagnostics_cover_every_stage() {
    struct Fixed;
    impl Clock for Fixed {
        fn now(&self) -> std::time::Duration {
            std::time::Duration::ZERO
        }
    }

    init_logging();
    let (result, diagnostics) =
        process_with_diagnostics(region(), ReduceConfig::default(), &Fixed, &NeverCancel).unwrap();
    assert_eq!(diagnostics.summary.station_count, result.points.len());
    assert_eq!(diagnostics.summary.cave_count, 1);

    let report = diagnostics.report();
    for stage in ["Prepare", "Decompose", "Classify", "Resolve"] {
        assert!(report.contains(stage), "missing {stage} in:\n{report}");
    }
}

#[test]
fn background_task_matches_process() {
    init_logging();
    let expected = speleo_reduce::process(&region(), &ReduceConfig::default()).unwrap();

    let plot = LinePlotTask::default();
    assert!(plot.set_region(region()));
    plot.wait_to_finish();

    let output = plot.output().expect("a completed run publishes output");
    assert_eq!(output.result, expected);

    let mut edited = region();
    output.result.apply_to(&mut edited);
    assert!(!plot.set_region(edited));
}
