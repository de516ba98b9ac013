use marbleworks_program::build;

const COUNTDOWN: &str = include_str!("../../../demos/countdown.mbl");
const ADDER: &str = include_str!("../../../demos/adder.mbl");

#[test]
fn countdown_emits_descending_values_and_drains() {
    // A marble of value 5 parks behind a counter gate over a sieve. Each
    // cycle the gate decrements it and the clone emits a copy of the running
    // value down an output/delete column; when the marble reaches zero the
    // sieve opens and drops it into a delete cell.
    let output = build(COUNTDOWN).expect("build");
    assert!(output.is_clean());
    let mut contraption = output.contraption;

    for _ in 0..12 {
        contraption.step();
    }

    assert_eq!(contraption.output(), "4\n3\n2\n1\n0\n");
    assert_eq!(contraption.marble_count(), 0);
}

#[test]
fn countdown_intermediate_states_stay_exclusive() {
    let mut contraption = build(COUNTDOWN).expect("build").contraption;
    for _ in 0..12 {
        contraption.step();
        let marbles = contraption.marbles();
        for pair in marbles.windows(2) {
            assert_ne!(pair[0].position, pair[1].position);
        }
    }
}

#[test]
fn adder_prints_sum_once_and_keeps_the_left_operand() {
    // 03 and 0a flank a right-facing add: B becomes 13 in the first effect
    // phase, drops through the output column, and is deleted.
    let output = build(ADDER).expect("build");
    assert!(output.is_clean());
    let mut contraption = output.contraption;

    for _ in 0..4 {
        contraption.step();
    }

    assert_eq!(contraption.output(), "13\n");
    assert_eq!(contraption.marble_count(), 1);
    let survivor = contraption.marbles()[0];
    assert_eq!(survivor.value, 3);
}

#[test]
fn rebuilt_program_replays_identically() {
    // Determinism: two independent builds stepped in lockstep agree on
    // every observable at every cycle.
    let mut a = build(COUNTDOWN).expect("build").contraption;
    let mut b = build(COUNTDOWN).expect("build").contraption;
    for _ in 0..12 {
        a.step();
        b.step();
        assert_eq!(a.render(), b.render());
        assert_eq!(a.output(), b.output());
    }
}
