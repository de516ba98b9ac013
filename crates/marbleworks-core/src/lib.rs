//! Core types for the Marbleworks contraption engine.
//!
//! A contraption is a fixed rectangular grid of behavior cells plus a set of
//! mobile integer tokens ("marbles"). One simulation cycle runs in two phases:
//! [`Contraption::tick`] applies every cell's effect against a stable
//! occupancy snapshot and only enqueues spawn/move/deletion requests, and
//! [`Contraption::move_marbles`] drains those journals, settles gravity, and
//! leaves the grid ready for the next cycle.

use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use thiserror::Error;

new_key_type! {
    /// Stable handle for marbles backed by a generational slot map.
    ///
    /// Movement bookkeeping tracks identity, not value: two marbles holding
    /// the same byte are still distinct.
    pub struct MarbleId;
}

/// Marble values are folded into `0..VALUE_MODULUS` at the end of every
/// effect phase.
pub const VALUE_MODULUS: i32 = 256;

/// A 0-indexed grid coordinate, bounded by the contraption's dimensions.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct Coord {
    pub x: u32,
    pub y: u32,
}

impl Coord {
    /// Construct a new coordinate.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Cardinal direction encoded by a directional cell's two-glyph symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Facing {
    Up,
    Down,
    Left,
    Right,
}

impl Facing {
    /// Unit offset of this facing in grid space (y grows downward).
    #[must_use]
    pub const fn delta(self) -> (i64, i64) {
        match self {
            Self::Up => (0, -1),
            Self::Down => (0, 1),
            Self::Left => (-1, 0),
            Self::Right => (1, 0),
        }
    }

    /// The mirrored facing; "behind" a directional cell is one step this way.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

/// Arithmetic applied by binary operator cells.
///
/// Operand roles are fixed: `a` is the marble behind the facing (the
/// divisor-role operand), `b` the marble ahead, and the result always
/// overwrites `b`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl ArithOp {
    /// Apply the operation, or `None` for a zero divisor.
    ///
    /// Division and modulo with a zero-valued `a` skip the step entirely,
    /// the same no-op rule used for absent operands. Wrapping add/sub/mul
    /// keep the low byte exact even when mid-phase values have left the
    /// 0..=255 range.
    #[must_use]
    pub fn apply(self, a: i32, b: i32) -> Option<i32> {
        match self {
            Self::Add => Some(a.wrapping_add(b)),
            Self::Sub => Some(b.wrapping_sub(a)),
            Self::Mul => Some(a.wrapping_mul(b)),
            Self::Div => (a != 0).then(|| b.div_euclid(a)),
            Self::Rem => (a != 0).then(|| b.rem_euclid(a)),
        }
    }

    /// The glyph character naming this operation.
    #[must_use]
    pub const fn symbol(self) -> char {
        match self {
            Self::Add => '+',
            Self::Sub => '-',
            Self::Mul => '*',
            Self::Div => '/',
            Self::Rem => '%',
        }
    }
}

/// Behavior selector for a grid cell.
///
/// The catalogue is the fixed glyph table implemented by
/// [`CellKind::from_glyph`] and [`CellKind::glyph`]; kinds never change after
/// construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CellKind {
    /// Inert passable terrain.
    Air,
    /// Inert solid terrain.
    Wall,
    /// Placeholder substituted for an unrecognized glyph at build time.
    Error,
    /// Adds 1 to an occupying marble.
    Increment,
    /// Subtracts 1 from an occupying marble.
    Decrement,
    /// Appends the occupant's decimal value to the output buffer.
    Output,
    /// Queues deletion of an occupying marble.
    Delete,
    /// Queues a move of the occupant one cell along the facing.
    Conveyor(Facing),
    /// Combines the marbles behind and ahead, overwriting the one ahead.
    Operator(ArithOp, Facing),
    /// Spawns a copy of the marble behind into the cell ahead.
    Clone(Facing),
    /// Holds the marble ahead against gravity while nothing sits behind.
    ObserverGate(Facing),
    /// As the observer gate, and independently decrements a marble behind.
    CounterGate(Facing),
    /// Solid unless the cell directly above holds a zero-valued marble.
    Sieve,
    /// Inert teleport destination keyed by one base-36 character.
    Label(char),
    /// Queues a move of the occupant to the matching label.
    Teleporter(char),
}

/// Base-36 key characters accepted by labels and teleporters.
#[must_use]
pub const fn is_key_char(c: char) -> bool {
    c.is_ascii_digit() || c.is_ascii_lowercase()
}

const fn directional_kind(kind: char, facing: Facing) -> Option<CellKind> {
    match kind {
        '+' => Some(CellKind::Operator(ArithOp::Add, facing)),
        '-' => Some(CellKind::Operator(ArithOp::Sub, facing)),
        '*' => Some(CellKind::Operator(ArithOp::Mul, facing)),
        '/' => Some(CellKind::Operator(ArithOp::Div, facing)),
        '%' => Some(CellKind::Operator(ArithOp::Rem, facing)),
        '&' => Some(CellKind::Clone(facing)),
        '?' => Some(CellKind::ObserverGate(facing)),
        '$' => Some(CellKind::CounterGate(facing)),
        _ => None,
    }
}

impl CellKind {
    /// Look a two-character program glyph up in the catalogue.
    ///
    /// Directional kinds pair a kind character with an arrow marker; the side
    /// carrying the marker mirrors the facing (`<+` is the left-facing mirror
    /// of `+>`), and `^`/`v` markers select the vertical facings. Returns
    /// `None` for unrecognized glyphs, which the program builder substitutes
    /// with [`CellKind::Error`].
    #[must_use]
    pub const fn from_glyph(symbol: [char; 2]) -> Option<Self> {
        match symbol {
            ['.', '.'] | [' ', ' '] => Some(Self::Air),
            ['#', '#'] => Some(Self::Wall),
            ['+', '+'] => Some(Self::Increment),
            ['-', '-'] => Some(Self::Decrement),
            ['!', '!'] => Some(Self::Output),
            ['x', 'x'] => Some(Self::Delete),
            ['~', '~'] => Some(Self::Sieve),
            ['>', '>'] => Some(Self::Conveyor(Facing::Right)),
            ['<', '<'] => Some(Self::Conveyor(Facing::Left)),
            ['^', '^'] => Some(Self::Conveyor(Facing::Up)),
            ['v', 'v'] => Some(Self::Conveyor(Facing::Down)),
            [':', key] if is_key_char(key) => Some(Self::Label(key)),
            ['@', key] if is_key_char(key) => Some(Self::Teleporter(key)),
            ['<', kind] => directional_kind(kind, Facing::Left),
            [kind, '>'] => directional_kind(kind, Facing::Right),
            [kind, '^'] => directional_kind(kind, Facing::Up),
            [kind, 'v'] => directional_kind(kind, Facing::Down),
            _ => None,
        }
    }

    /// Canonical two-character spelling of this kind.
    #[must_use]
    pub const fn glyph(self) -> [char; 2] {
        match self {
            Self::Air => ['.', '.'],
            Self::Wall => ['#', '#'],
            Self::Error => ['*', '*'],
            Self::Increment => ['+', '+'],
            Self::Decrement => ['-', '-'],
            Self::Output => ['!', '!'],
            Self::Delete => ['x', 'x'],
            Self::Sieve => ['~', '~'],
            Self::Conveyor(Facing::Right) => ['>', '>'],
            Self::Conveyor(Facing::Left) => ['<', '<'],
            Self::Conveyor(Facing::Up) => ['^', '^'],
            Self::Conveyor(Facing::Down) => ['v', 'v'],
            Self::Operator(op, facing) => directional_glyph(op.symbol(), facing),
            Self::Clone(facing) => directional_glyph('&', facing),
            Self::ObserverGate(facing) => directional_glyph('?', facing),
            Self::CounterGate(facing) => directional_glyph('$', facing),
            Self::Label(key) => [':', key],
            Self::Teleporter(key) => ['@', key],
        }
    }

    /// Facing of a directional kind, `None` otherwise.
    #[must_use]
    pub const fn facing(self) -> Option<Facing> {
        match self {
            Self::Conveyor(facing)
            | Self::Operator(_, facing)
            | Self::Clone(facing)
            | Self::ObserverGate(facing)
            | Self::CounterGate(facing) => Some(facing),
            _ => None,
        }
    }
}

const fn directional_glyph(kind: char, facing: Facing) -> [char; 2] {
    match facing {
        Facing::Left => ['<', kind],
        Facing::Right => [kind, '>'],
        Facing::Up => [kind, '^'],
        Facing::Down => [kind, 'v'],
    }
}

/// A 1-based source location range used for diagnostics and highlighting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Span {
    pub line: u32,
    pub column_start: u32,
    pub column_end: u32,
}

impl Span {
    /// Source span of the two-character chunk backing the cell at `position`.
    #[must_use]
    pub const fn of_cell(position: Coord) -> Self {
        Self {
            line: position.y + 1,
            column_start: 2 * position.x + 1,
            column_end: 2 * position.x + 2,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}",
            self.line, self.column_start, self.column_end
        )
    }
}

/// One immutable grid slot plus its transient activation flag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cell {
    kind: CellKind,
    symbol: [char; 2],
    position: Coord,
    activated: bool,
}

impl Cell {
    /// Behavior kind of this cell.
    #[must_use]
    pub const fn kind(&self) -> CellKind {
        self.kind
    }

    /// The source glyph this cell renders as (Error cells keep the
    /// offending text).
    #[must_use]
    pub const fn symbol(&self) -> [char; 2] {
        self.symbol
    }

    /// Grid position of this cell.
    #[must_use]
    pub const fn position(&self) -> Coord {
        self.position
    }

    /// Whether this cell acted during the current phase.
    #[must_use]
    pub const fn activated(&self) -> bool {
        self.activated
    }

    /// Source span covered by this cell's glyph.
    #[must_use]
    pub const fn span(&self) -> Span {
        Span::of_cell(self.position)
    }
}

/// One grid slot as produced by the program builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellSeed {
    pub kind: CellKind,
    pub symbol: [char; 2],
}

impl CellSeed {
    /// Seed a cell with its canonical glyph.
    #[must_use]
    pub const fn new(kind: CellKind) -> Self {
        Self {
            kind,
            symbol: kind.glyph(),
        }
    }

    /// Seed a cell keeping the original source glyph (Error cells).
    #[must_use]
    pub const fn with_symbol(kind: CellKind, symbol: [char; 2]) -> Self {
        Self { kind, symbol }
    }
}

/// Initial marble placement as produced by the program builder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarbleSeed {
    pub position: Coord,
    pub value: u8,
}

/// The mobile integer token moved and transformed by cells.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
struct Marble {
    value: i32,
    position: Coord,
    moved: bool,
    activated: bool,
}

/// Read-only view of one live marble.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MarbleSnapshot {
    pub id: MarbleId,
    pub position: Coord,
    pub value: u8,
    pub moved: bool,
    pub activated: bool,
}

/// Pending spawn queued by a clone cell, applied at the end of the
/// movement phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SpawnRequest {
    value: u8,
    target: Coord,
}

/// Pending relocation queued by a conveyor or teleporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MoveRequest {
    marble: MarbleId,
    target: Coord,
}

/// Errors raised when validating a contraption's construction inputs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContraptionError {
    #[error("grid dimensions must be non-zero")]
    ZeroDimensions,
    #[error("cell count {actual} does not match the {width}x{height} grid")]
    CellCountMismatch {
        width: u32,
        height: u32,
        actual: usize,
    },
    #[error("marble seed at {position} is outside the grid")]
    SeedOutOfBounds { position: Coord },
    #[error("marble seeds overlap at {position}")]
    SeedOverlap { position: Coord },
}

/// The complete simulation snapshot: grid, marbles, pending journals, and
/// the accumulated output buffer.
pub struct Contraption {
    width: u32,
    height: u32,
    cells: Vec<Cell>,
    marbles: SlotMap<MarbleId, Marble>,
    output: String,
    cycle: u64,
    pending_spawns: Vec<SpawnRequest>,
    pending_moves: VecDeque<MoveRequest>,
    pending_deletions: Vec<MarbleId>,
}

impl fmt::Debug for Contraption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contraption")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("cycle", &self.cycle)
            .field("marble_count", &self.marbles.len())
            .finish()
    }
}

impl Contraption {
    /// Build the initial engine state from a row-major cell list and marble
    /// seeds, as produced by the program builder.
    pub fn new(
        width: u32,
        height: u32,
        cells: Vec<CellSeed>,
        seeds: Vec<MarbleSeed>,
    ) -> Result<Self, ContraptionError> {
        if width == 0 || height == 0 {
            return Err(ContraptionError::ZeroDimensions);
        }
        let expected = (width as usize) * (height as usize);
        if cells.len() != expected {
            return Err(ContraptionError::CellCountMismatch {
                width,
                height,
                actual: cells.len(),
            });
        }

        let cells = cells
            .into_iter()
            .enumerate()
            .map(|(index, seed)| Cell {
                kind: seed.kind,
                symbol: seed.symbol,
                position: Coord::new((index as u32) % width, (index as u32) / width),
                activated: false,
            })
            .collect();

        let mut marbles = SlotMap::with_key();
        let mut occupied = HashSet::new();
        for seed in seeds {
            if seed.position.x >= width || seed.position.y >= height {
                return Err(ContraptionError::SeedOutOfBounds {
                    position: seed.position,
                });
            }
            if !occupied.insert(seed.position) {
                return Err(ContraptionError::SeedOverlap {
                    position: seed.position,
                });
            }
            marbles.insert(Marble {
                value: i32::from(seed.value),
                position: seed.position,
                moved: false,
                activated: false,
            });
        }

        Ok(Self {
            width,
            height,
            cells,
            marbles,
            output: String::new(),
            cycle: 0,
            pending_spawns: Vec::new(),
            pending_moves: VecDeque::new(),
            pending_deletions: Vec::new(),
        })
    }

    /// Grid width in cells.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Grid height in cells.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Completed simulation cycles.
    #[must_use]
    pub const fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Number of live marbles.
    #[must_use]
    pub fn marble_count(&self) -> usize {
        self.marbles.len()
    }

    /// The accumulated output buffer (newline-terminated decimal lines).
    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Cell at `(x, y)`, or `None` outside the grid.
    #[must_use]
    pub fn cell(&self, x: u32, y: u32) -> Option<&Cell> {
        if x < self.width && y < self.height {
            self.cells
                .get((y as usize) * (self.width as usize) + (x as usize))
        } else {
            None
        }
    }

    /// Identity of the marble occupying `position`, if any.
    #[must_use]
    pub fn marble_at(&self, position: Coord) -> Option<MarbleId> {
        self.marbles
            .iter()
            .find(|(_, marble)| marble.position == position)
            .map(|(id, _)| id)
    }

    /// Read-only view of one marble.
    #[must_use]
    pub fn marble(&self, id: MarbleId) -> Option<MarbleSnapshot> {
        self.marbles.get(id).map(|marble| snapshot(id, marble))
    }

    /// Snapshots of every live marble in row-major position order.
    #[must_use]
    pub fn marbles(&self) -> Vec<MarbleSnapshot> {
        let mut out: Vec<MarbleSnapshot> = self
            .marbles
            .iter()
            .map(|(id, marble)| snapshot(id, marble))
            .collect();
        out.sort_by_key(|snapshot| (snapshot.position.y, snapshot.position.x));
        out
    }

    /// Snapshots of every marble acted on during the current phase, in
    /// row-major position order.
    #[must_use]
    pub fn activated_marbles(&self) -> Vec<MarbleSnapshot> {
        let mut out: Vec<MarbleSnapshot> = self
            .marbles
            .iter()
            .filter(|(_, marble)| marble.activated)
            .map(|(id, marble)| snapshot(id, marble))
            .collect();
        out.sort_by_key(|snapshot| (snapshot.position.y, snapshot.position.x));
        out
    }

    /// Source spans of every cell activated during the current phase, for
    /// editor highlighting.
    #[must_use]
    pub fn activated_cells(&self) -> Vec<Span> {
        self.cells
            .iter()
            .filter(|cell| cell.activated)
            .map(Cell::span)
            .collect()
    }

    /// Whether `position` blocks marble occupancy right now.
    ///
    /// Out-of-grid coordinates block. Sieve solidity is state-dependent: a
    /// sieve opens exactly while the cell directly above it holds a
    /// zero-valued marble.
    #[must_use]
    pub fn is_solid_at(&self, position: Coord) -> bool {
        let Some(cell) = self.cell(position.x, position.y) else {
            return true;
        };
        match cell.kind {
            CellKind::Wall
            | CellKind::Error
            | CellKind::Operator(..)
            | CellKind::Clone(_)
            | CellKind::ObserverGate(_)
            | CellKind::CounterGate(_) => true,
            CellKind::Sieve => {
                let above_value = position
                    .y
                    .checked_sub(1)
                    .and_then(|y| self.marble_at(Coord::new(position.x, y)))
                    .map(|id| self.marbles[id].value.rem_euclid(VALUE_MODULUS));
                above_value != Some(0)
            }
            _ => false,
        }
    }

    /// Full-grid textual render: each cell's glyph, overlaid with the
    /// two-hex-digit value of any occupying marble.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out =
            String::with_capacity((self.width as usize * 2 + 1) * self.height as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                let position = Coord::new(x, y);
                if let Some(id) = self.marble_at(position) {
                    let value = self.marbles[id].value.rem_euclid(VALUE_MODULUS);
                    out.push_str(&format!("{value:02x}"));
                } else {
                    let symbol = self.cells
                        [(y as usize) * (self.width as usize) + (x as usize)]
                        .symbol;
                    out.push(symbol[0]);
                    out.push(symbol[1]);
                }
            }
            out.push('\n');
        }
        out
    }

    /// Run one full cycle: the effect phase followed by the movement phase.
    pub fn step(&mut self) {
        self.tick();
        self.move_marbles();
    }

    /// Effect phase: clear transient flags, invoke every cell's effect once
    /// in row-major order, then fold marble values back into `0..=255`.
    ///
    /// Effects never change positions or the live marble set; they mutate
    /// marble values and activation flags in place and enqueue
    /// spawn/move/deletion requests for the movement phase.
    pub fn tick(&mut self) {
        for cell in &mut self.cells {
            cell.activated = false;
        }
        for marble in self.marbles.values_mut() {
            marble.moved = false;
            marble.activated = false;
        }
        for index in 0..self.cells.len() {
            let cell = self.cells[index];
            self.apply_effect(index, cell);
        }
        for marble in self.marbles.values_mut() {
            marble.value = marble.value.rem_euclid(VALUE_MODULUS);
        }
    }

    /// Movement phase: apply deletions, resolve queued moves, settle
    /// gravity, then materialize spawns. All journals are empty on return.
    pub fn move_marbles(&mut self) {
        for cell in &mut self.cells {
            cell.activated = false;
        }
        for marble in self.marbles.values_mut() {
            marble.activated = false;
        }
        self.stage_deletions();
        self.stage_moves();
        self.stage_gravity();
        self.stage_spawns();
        self.cycle += 1;
    }

    fn apply_effect(&mut self, index: usize, cell: Cell) {
        match cell.kind {
            CellKind::Air
            | CellKind::Wall
            | CellKind::Error
            | CellKind::Sieve
            | CellKind::Label(_) => {}
            CellKind::Increment | CellKind::Decrement => {
                if let Some(id) = self.marble_at(cell.position) {
                    let marble = &mut self.marbles[id];
                    marble.value = if matches!(cell.kind, CellKind::Increment) {
                        marble.value.wrapping_add(1)
                    } else {
                        marble.value.wrapping_sub(1)
                    };
                    marble.activated = true;
                    self.cells[index].activated = true;
                }
            }
            CellKind::Output => {
                if let Some(id) = self.marble_at(cell.position) {
                    let value = self.marbles[id].value.rem_euclid(VALUE_MODULUS);
                    self.output.push_str(&value.to_string());
                    self.output.push('\n');
                    self.marbles[id].activated = true;
                    self.cells[index].activated = true;
                }
            }
            CellKind::Delete => {
                if let Some(id) = self.marble_at(cell.position) {
                    self.pending_deletions.push(id);
                    self.marbles[id].activated = true;
                    self.cells[index].activated = true;
                }
            }
            CellKind::Conveyor(facing) => {
                if let Some(id) = self.marble_at(cell.position) {
                    // An off-grid push still counts as acting; the impossible
                    // move is simply never enqueued.
                    if let Some(target) = self.neighbor(cell.position, facing) {
                        self.pending_moves.push_back(MoveRequest { marble: id, target });
                    }
                    self.marbles[id].activated = true;
                    self.cells[index].activated = true;
                }
            }
            CellKind::Operator(op, facing) => {
                let behind = self.occupant_toward(cell.position, facing.opposite());
                let ahead = self.occupant_toward(cell.position, facing);
                if let (Some(a), Some(b)) = (behind, ahead)
                    && let Some(result) = op.apply(self.marbles[a].value, self.marbles[b].value)
                {
                    let marble = &mut self.marbles[b];
                    marble.value = result;
                    marble.activated = true;
                    self.cells[index].activated = true;
                }
            }
            CellKind::Clone(facing) => {
                let source = self.occupant_toward(cell.position, facing.opposite());
                let target = self.neighbor(cell.position, facing);
                if let (Some(source), Some(target)) = (source, target)
                    && !self.is_solid_at(target)
                {
                    let value = self.marbles[source].value.rem_euclid(VALUE_MODULUS) as u8;
                    self.pending_spawns.push(SpawnRequest { value, target });
                    self.marbles[source].activated = true;
                    self.cells[index].activated = true;
                }
            }
            CellKind::ObserverGate(facing) => {
                let behind = self.occupant_toward(cell.position, facing.opposite());
                let ahead = self.occupant_toward(cell.position, facing);
                if behind.is_none()
                    && let Some(ahead) = ahead
                {
                    self.marbles[ahead].moved = true;
                }
            }
            CellKind::CounterGate(facing) => {
                let behind = self.occupant_toward(cell.position, facing.opposite());
                let ahead = self.occupant_toward(cell.position, facing);
                if behind.is_none()
                    && let Some(ahead) = ahead
                {
                    self.marbles[ahead].moved = true;
                }
                if let Some(behind) = behind {
                    let marble = &mut self.marbles[behind];
                    marble.value = marble.value.wrapping_sub(1);
                    marble.activated = true;
                }
            }
            CellKind::Teleporter(key) => {
                if let Some(id) = self.marble_at(cell.position)
                    && let Some(target) = self.label_position(key)
                {
                    self.pending_moves.push_back(MoveRequest { marble: id, target });
                }
            }
        }
    }

    /// Position of the first label in row-major order carrying `key`.
    #[must_use]
    pub fn label_position(&self, key: char) -> Option<Coord> {
        self.cells
            .iter()
            .find(|cell| cell.kind == CellKind::Label(key))
            .map(Cell::position)
    }

    fn neighbor(&self, position: Coord, facing: Facing) -> Option<Coord> {
        let (dx, dy) = facing.delta();
        let x = i64::from(position.x) + dx;
        let y = i64::from(position.y) + dy;
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            None
        } else {
            Some(Coord::new(x as u32, y as u32))
        }
    }

    fn occupant_toward(&self, position: Coord, facing: Facing) -> Option<MarbleId> {
        self.neighbor(position, facing)
            .and_then(|coord| self.marble_at(coord))
    }

    fn stage_deletions(&mut self) {
        for id in std::mem::take(&mut self.pending_deletions) {
            self.marbles.remove(id);
        }
    }

    /// FIFO move resolution with deferred retry: a request blocked by an
    /// occupant that still has its own pending move is re-enqueued so chains
    /// advance in one cycle. A full pass of retries with no commit or drop
    /// means every remaining request is cyclically blocked, and the head is
    /// dropped to break the cycle.
    fn stage_moves(&mut self) {
        let mut queue = std::mem::take(&mut self.pending_moves);
        let mut pending: HashSet<MarbleId> = queue.iter().map(|request| request.marble).collect();
        let mut stalled = 0usize;
        while let Some(request) = queue.pop_front() {
            if !self.marbles.contains_key(request.marble) {
                pending.remove(&request.marble);
                stalled = 0;
                continue;
            }
            let occupant = self
                .marble_at(request.target)
                .filter(|id| *id != request.marble);
            if let Some(occupant) = occupant {
                if pending.contains(&occupant) && stalled <= queue.len() {
                    stalled += 1;
                    queue.push_back(request);
                } else {
                    pending.remove(&request.marble);
                    stalled = 0;
                }
                continue;
            }
            pending.remove(&request.marble);
            stalled = 0;
            if !self.is_solid_at(request.target) {
                let marble = &mut self.marbles[request.marble];
                marble.position = request.target;
                marble.moved = true;
            }
        }
    }

    /// Gravity pass: every marble that has not moved this cycle falls at
    /// most one row. A marble above an unsettled marble waits for it via
    /// re-enqueue, so stacks descend in lockstep without compression.
    fn stage_gravity(&mut self) {
        let mut order: Vec<(Coord, MarbleId)> = self
            .marbles
            .iter()
            .filter(|(_, marble)| !marble.moved)
            .map(|(id, marble)| (marble.position, id))
            .collect();
        order.sort_by(|a, b| b.0.y.cmp(&a.0.y).then(a.0.x.cmp(&b.0.x)));

        let mut settled: HashSet<MarbleId> = self
            .marbles
            .iter()
            .filter(|(_, marble)| marble.moved)
            .map(|(id, _)| id)
            .collect();
        let mut queue: VecDeque<MarbleId> = order.into_iter().map(|(_, id)| id).collect();

        while let Some(id) = queue.pop_front() {
            let position = self.marbles[id].position;
            let below = Coord::new(position.x, position.y + 1);
            if below.y >= self.height || self.is_solid_at(below) {
                settled.insert(id);
                continue;
            }
            match self.marble_at(below) {
                Some(occupant) => {
                    if settled.contains(&occupant) {
                        settled.insert(id);
                    } else {
                        queue.push_back(id);
                    }
                }
                None => {
                    let marble = &mut self.marbles[id];
                    marble.position = below;
                    marble.moved = true;
                    settled.insert(id);
                }
            }
        }
    }

    fn stage_spawns(&mut self) {
        for request in std::mem::take(&mut self.pending_spawns) {
            if self.marble_at(request.target).is_some() {
                continue;
            }
            self.marbles.insert(Marble {
                value: i32::from(request.value),
                position: request.target,
                moved: true,
                activated: false,
            });
        }
    }
}

fn snapshot(id: MarbleId, marble: &Marble) -> MarbleSnapshot {
    MarbleSnapshot {
        id,
        position: marble.position,
        value: marble.value.rem_euclid(VALUE_MODULUS) as u8,
        moved: marble.moved,
        activated: marble.activated,
    }
}
