//! Shared host plumbing for the Marbleworks terminal app.

pub mod terminal;

use marbleworks_core::Contraption;
use serde::Serialize;

/// Machine-readable summary of a headless run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Cycles actually simulated.
    pub cycles: u64,
    /// Marbles still live when the run stopped.
    pub marbles: usize,
    /// The accumulated output buffer.
    pub output: String,
    /// Final textual render of the grid.
    pub render: String,
}

/// Step the contraption until it drains or the cycle budget is spent.
pub fn run_headless(contraption: &mut Contraption, max_cycles: u64) -> RunReport {
    let mut remaining = max_cycles;
    while remaining > 0 && contraption.marble_count() > 0 {
        contraption.step();
        remaining -= 1;
    }
    RunReport {
        cycles: contraption.cycles(),
        marbles: contraption.marble_count(),
        output: contraption.output().to_string(),
        render: contraption.render(),
    }
}
