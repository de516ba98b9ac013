//! Program builder for the Marbleworks language.
//!
//! Source text is a sequence of lines, each partitioned into consecutive
//! two-character chunks (a trailing odd character is ignored). Short rows are
//! right-padded with Air to the widest row. A chunk of two case-insensitive
//! hex digits seeds a marble of that byte value on an Air cell; every other
//! chunk is looked up in the cell catalogue, and unmatched chunks become
//! solid Error cells with a diagnostic instead of failing the build.

use marbleworks_core::{
    CellKind, CellSeed, Contraption, ContraptionError, Coord, MarbleSeed, Span,
};
use serde::Serialize;
use thiserror::Error;

/// One build-time problem, tied to a 1-based source span.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub span: Span,
}

/// The builder's product: the initial engine state plus ordered diagnostics.
///
/// A non-empty diagnostic list must be surfaced to the host before the
/// contraption is treated as runnable.
#[derive(Debug)]
pub struct BuildOutput {
    pub contraption: Contraption,
    pub diagnostics: Vec<Diagnostic>,
}

impl BuildOutput {
    /// Whether the program compiled without diagnostics.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Errors that prevent producing a grid at all.
#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("program source contains no cells")]
    EmptySource,
    #[error(transparent)]
    Contraption(#[from] ContraptionError),
}

/// Build the initial contraption state from program source text.
pub fn build(source: &str) -> Result<BuildOutput, ProgramError> {
    let rows: Vec<Vec<[char; 2]>> = source.lines().map(chunk_line).collect();
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return Err(ProgramError::EmptySource);
    }
    let height = rows.len();

    let mut cells = Vec::with_capacity(width * height);
    let mut seeds = Vec::new();
    let mut diagnostics = Vec::new();

    for (y, row) in rows.iter().enumerate() {
        for x in 0..width {
            let position = Coord::new(x as u32, y as u32);
            let Some(&symbol) = row.get(x) else {
                // Short rows pad with inert terrain so every row has equal
                // width.
                cells.push(CellSeed::new(CellKind::Air));
                continue;
            };
            if let Some(value) = hex_pair(symbol) {
                seeds.push(MarbleSeed { position, value });
                cells.push(CellSeed::new(CellKind::Air));
            } else if let Some(kind) = CellKind::from_glyph(symbol) {
                let seed = if kind == CellKind::Air {
                    CellSeed::new(kind)
                } else {
                    CellSeed::with_symbol(kind, symbol)
                };
                cells.push(seed);
            } else {
                diagnostics.push(Diagnostic {
                    message: format!(
                        "unrecognized glyph \"{}{}\"",
                        symbol[0], symbol[1]
                    ),
                    span: Span::of_cell(position),
                });
                cells.push(CellSeed::with_symbol(CellKind::Error, symbol));
            }
        }
    }

    let contraption = Contraption::new(width as u32, height as u32, cells, seeds)?;
    Ok(BuildOutput {
        contraption,
        diagnostics,
    })
}

/// Partition one line into two-character chunks, dropping a trailing odd
/// character.
fn chunk_line(line: &str) -> Vec<[char; 2]> {
    let chars: Vec<char> = line.chars().collect();
    chars
        .chunks_exact(2)
        .map(|pair| [pair[0], pair[1]])
        .collect()
}

/// Byte value of a chunk made of two case-insensitive hex digits.
fn hex_pair(symbol: [char; 2]) -> Option<u8> {
    let high = symbol[0].to_digit(16)?;
    let low = symbol[1].to_digit(16)?;
    Some((high * 16 + low) as u8)
}
