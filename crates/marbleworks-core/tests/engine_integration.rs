use marbleworks_core::{
    ArithOp, CellKind, CellSeed, Contraption, Coord, Facing, MarbleSeed,
};
use std::collections::HashSet;

fn contraption(rows: &[Vec<CellKind>], seeds: &[(u32, u32, u8)]) -> Contraption {
    let height = rows.len() as u32;
    let width = rows[0].len() as u32;
    let cells = rows
        .iter()
        .flat_map(|row| row.iter().copied().map(CellSeed::new))
        .collect();
    let seeds = seeds
        .iter()
        .map(|&(x, y, value)| MarbleSeed {
            position: Coord::new(x, y),
            value,
        })
        .collect();
    Contraption::new(width, height, cells, seeds).expect("contraption")
}

fn positions(contraption: &Contraption) -> Vec<(u32, u32, u8)> {
    contraption
        .marbles()
        .into_iter()
        .map(|marble| (marble.position.x, marble.position.y, marble.value))
        .collect()
}

fn assert_mutual_exclusion(contraption: &Contraption) {
    let mut seen = HashSet::new();
    for marble in contraption.marbles() {
        assert!(
            seen.insert(marble.position),
            "two marbles at {}",
            marble.position
        );
    }
}

#[test]
fn long_conveyor_chain_advances_every_marble_each_cycle() {
    let width = 24usize;
    let row: Vec<CellKind> = vec![CellKind::Conveyor(Facing::Right); width];
    let seeds: Vec<(u32, u32, u8)> = (0..16).map(|x| (x, 0, x as u8)).collect();
    let mut contraption = contraption(&[row], &seeds);

    for cycle in 1..=8 {
        contraption.step();
        assert_mutual_exclusion(&contraption);
        let expected: Vec<(u32, u32, u8)> =
            (0..16).map(|x| (x + cycle, 0, x as u8)).collect();
        assert_eq!(positions(&contraption), expected, "cycle {cycle}");
    }
}

#[test]
fn teleporter_pair_cycles_a_marble_without_losing_it() {
    // A teleporter sends its occupant to the matching label and the marble
    // parks there; it is never duplicated or dropped along the way.
    let rows = vec![
        vec![
            CellKind::Teleporter('a'),
            CellKind::Wall,
            CellKind::Teleporter('b'),
        ],
        vec![
            CellKind::Label('b'),
            CellKind::Wall,
            CellKind::Label('a'),
        ],
        vec![CellKind::Wall, CellKind::Wall, CellKind::Wall],
    ];
    let mut contraption = contraption(&rows, &[(0, 0, 42)]);

    let mut visited = Vec::new();
    for _ in 0..6 {
        contraption.step();
        assert_eq!(contraption.marble_count(), 1);
        assert_mutual_exclusion(&contraption);
        let marble = contraption.marbles()[0];
        visited.push((marble.position.x, marble.position.y));
        assert_eq!(marble.value, 42);
    }
    // (0,0) -@a-> (2,1) falls nowhere (wall), then no teleporter under it:
    // the marble parks on the label. Verify it actually hopped once.
    assert_eq!(visited[0], (2, 1));
    assert_eq!(visited[5], (2, 1));
}

#[test]
fn teleporter_loop_between_two_pads_converges() {
    // A teleporter whose label sits beside a second teleporter keyed back
    // toward the first: the marble hops, falls onto the second pad, hops
    // again, and settles; the move queue converges every cycle.
    let rows = vec![
        vec![CellKind::Teleporter('a'), CellKind::Label('a')],
        vec![CellKind::Label('b'), CellKind::Teleporter('b')],
        vec![CellKind::Wall, CellKind::Wall],
    ];
    let mut contraption = contraption(&rows, &[(0, 0, 7)]);
    for _ in 0..8 {
        contraption.step();
        assert_eq!(contraption.marble_count(), 1);
    }
}

#[test]
fn pipeline_increments_doubles_and_prints() {
    // Marble falls through an increment, is doubled by a multiply operator
    // fed from a parked constant, prints, and is deleted.
    //
    //   03          marble starts at (0, 0)
    //   ++          (0, 1)
    //   .. 02 ..    parked A operand at (1, 2)? -- laid out explicitly below
    let rows = vec![
        vec![CellKind::Air, CellKind::Air, CellKind::Air],
        vec![CellKind::Increment, CellKind::Air, CellKind::Air],
        // A at (1, 2) behind the right-facing multiply at... operator column
        // layout: A sits left of the operator, B (our marble) right of it.
        vec![
            CellKind::Air,
            CellKind::Operator(ArithOp::Mul, Facing::Left),
            CellKind::Air,
        ],
        vec![CellKind::Output, CellKind::Wall, CellKind::Wall],
        vec![CellKind::Delete, CellKind::Wall, CellKind::Wall],
    ];
    // Left-facing multiply at (1, 2): behind = (2, 2), ahead = (0, 2).
    // Park the constant 2 at (2, 2) on air above a wall.
    let mut contraption = contraption(&rows, &[(0, 0, 3), (2, 2, 2)]);

    // Cycle 1: marble falls to (0, 1). Cycle 2: ++ makes 4, falls to (0, 2).
    // Cycle 3: multiply overwrites B with 2 * 4 = 8, falls to (0, 3).
    // Cycle 4: output "8", falls to (0, 4). Cycle 5: deleted.
    for _ in 0..5 {
        contraption.step();
        assert_mutual_exclusion(&contraption);
    }
    assert_eq!(contraption.output(), "8\n");
    // Only the parked constant remains.
    assert_eq!(contraption.marble_count(), 1);
    assert_eq!(positions(&contraption), vec![(2, 2, 2)]);
}

#[test]
fn wraparound_matches_nonnegative_modulus_for_sampled_values() {
    // Underflow by repeated decrement: 0 - k wraps to (256 - k) % 256.
    for k in 1..=4u32 {
        let rows = vec![vec![CellKind::Decrement], vec![CellKind::Wall]];
        let mut contraption = contraption(&rows, &[(0, 0, 0)]);
        for _ in 0..k {
            contraption.step();
        }
        let expected = ((-(k as i32)).rem_euclid(256)) as u8;
        assert_eq!(contraption.marbles()[0].value, expected);
    }
}

#[test]
fn deep_stack_settles_without_compression() {
    let rows: Vec<Vec<CellKind>> = (0..8)
        .map(|y| {
            if y == 7 {
                vec![CellKind::Wall]
            } else {
                vec![CellKind::Air]
            }
        })
        .collect();
    let mut contraption = contraption(&rows, &[(0, 0, 1), (0, 1, 2), (0, 2, 3)]);
    for _ in 0..10 {
        contraption.step();
        assert_mutual_exclusion(&contraption);
    }
    assert_eq!(
        positions(&contraption),
        vec![(0, 4, 1), (0, 5, 2), (0, 6, 3)]
    );
}
