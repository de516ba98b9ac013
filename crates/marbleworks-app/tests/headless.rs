use marbleworks_app::run_headless;
use marbleworks_program::build;

const COUNTDOWN: &str = include_str!("../../../demos/countdown.mbl");

#[test]
fn headless_run_stops_when_the_contraption_drains() {
    let mut contraption = build(COUNTDOWN).expect("build").contraption;
    let report = run_headless(&mut contraption, 50);
    assert_eq!(report.output, "4\n3\n2\n1\n0\n");
    assert_eq!(report.marbles, 0);
    assert!(report.cycles < 50, "stopped early at {}", report.cycles);
}

#[test]
fn headless_run_respects_the_cycle_budget() {
    let mut contraption = build(COUNTDOWN).expect("build").contraption;
    let report = run_headless(&mut contraption, 3);
    assert_eq!(report.cycles, 3);
    assert!(report.marbles > 0);
}

#[test]
fn report_serializes_to_json() {
    let mut contraption = build(COUNTDOWN).expect("build").contraption;
    let report = run_headless(&mut contraption, 50);
    let json = serde_json::to_string(&report).expect("json");
    assert!(json.contains("\"cycles\""));
    assert!(json.contains("\"output\""));
}
