//! Micro-ID codec: a 20-bit serial packed into a 5x5 dot matrix.
//!
//! # Layout (row-major)
//!
//! ```text
//! Row 0: [ANCHOR] [Bit19] [Bit18] [Bit17]  [ANCHOR]
//! Row 1: [Bit16]  [Bit15] [Bit14] [Bit13]  [Bit12]
//! Row 2: [Bit11]  [Bit10] [Bit9]  [Bit8]   [Bit7]
//! Row 3: [Bit6]   [Bit5]  [Bit4]  [Bit3]   [Bit2]
//! Row 4: [ANCHOR] [Bit1]  [Bit0]  [PARITY] [ANCHOR]
//! ```
//!
//! Anchors are always set. The parity cell makes the number of set data bits
//! plus parity even. This table is the published reading order used by the
//! decoders in the field; it must not change.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{LayoutError, Serial};

/// Grid edge length.
pub const GRID_SIZE: usize = 5;

/// Number of data bits carried by a grid.
pub const DATA_BITS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cell {
    Anchor,
    Data(u32),
    Parity,
}

use Cell::{Anchor, Data, Parity};

const LAYOUT: [[Cell; GRID_SIZE]; GRID_SIZE] = [
    [Anchor, Data(19), Data(18), Data(17), Anchor],
    [Data(16), Data(15), Data(14), Data(13), Data(12)],
    [Data(11), Data(10), Data(9), Data(8), Data(7)],
    [Data(6), Data(5), Data(4), Data(3), Data(2)],
    [Anchor, Data(1), Data(0), Parity, Anchor],
];

/// A 5x5 boolean dot matrix; `true` is a dot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MicroIdGrid {
    cells: [[bool; GRID_SIZE]; GRID_SIZE],
}

impl MicroIdGrid {
    #[must_use]
    pub const fn from_cells(cells: [[bool; GRID_SIZE]; GRID_SIZE]) -> Self {
        Self { cells }
    }

    #[must_use]
    pub const fn cells(&self) -> &[[bool; GRID_SIZE]; GRID_SIZE] {
        &self.cells
    }

    /// Cell at `(row, col)`; `None` outside the grid.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<bool> {
        self.cells.get(row).and_then(|r| r.get(col)).copied()
    }

    /// Copy of this grid with one cell inverted.
    ///
    /// # Panics
    ///
    /// Panics if `row` or `col` is outside the grid.
    #[must_use]
    pub const fn toggled(mut self, row: usize, col: usize) -> Self {
        self.cells[row][col] = !self.cells[row][col];
        self
    }

    /// Parse a 25-character reading, row-major.
    ///
    /// Characters other than `0` and `1` (separators, whitespace, row labels
    /// stripped of digits) are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidInput`] if the reading does not contain
    /// exactly 25 bits.
    pub fn parse_bits(reading: &str) -> Result<Self, LayoutError> {
        let bits: Vec<bool> = reading
            .chars()
            .filter_map(|c| match c {
                '0' => Some(false),
                '1' => Some(true),
                _ => None,
            })
            .collect();
        if bits.len() != GRID_SIZE * GRID_SIZE {
            return Err(LayoutError::invalid_input(format!(
                "grid reading must contain {} bits, got {}",
                GRID_SIZE * GRID_SIZE,
                bits.len()
            )));
        }
        let mut cells = [[false; GRID_SIZE]; GRID_SIZE];
        for (i, bit) in bits.into_iter().enumerate() {
            cells[i / GRID_SIZE][i % GRID_SIZE] = bit;
        }
        Ok(Self { cells })
    }

    /// Row-major `0`/`1` string, 25 characters.
    #[must_use]
    pub fn to_bit_string(&self) -> String {
        self.cells
            .iter()
            .flatten()
            .map(|&dot| if dot { '1' } else { '0' })
            .collect()
    }

    /// Number of dots set, anchors included.
    #[must_use]
    pub fn dot_count(&self) -> usize {
        self.cells.iter().flatten().filter(|&&dot| dot).count()
    }
}

/// Renders one line per row using `●` for a dot and `○` for an empty cell.
impl fmt::Display for MicroIdGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (r, row) in self.cells.iter().enumerate() {
            if r > 0 {
                writeln!(f)?;
            }
            for (c, &dot) in row.iter().enumerate() {
                if c > 0 {
                    f.write_str(" ")?;
                }
                f.write_str(if dot { "●" } else { "○" })?;
            }
        }
        Ok(())
    }
}

/// Result of reading a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoded {
    /// The 20-bit value recovered from the data cells.
    pub value: u32,
    pub parity_valid: bool,
    pub anchors_valid: bool,
}

impl Decoded {
    /// Parity and anchors check out and the value is a legal serial.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.parity_valid && self.anchors_valid && self.value >= Serial::MIN
    }

    /// The serial, if the reading is valid.
    #[must_use]
    pub fn serial(&self) -> Option<Serial> {
        if self.is_valid() {
            Serial::new(self.value).ok()
        } else {
            None
        }
    }
}

/// Encode a raw value.
///
/// # Errors
///
/// Returns [`LayoutError::InvalidInput`] outside `1..=1_048_575`.
pub fn encode(value: u32) -> Result<MicroIdGrid, LayoutError> {
    Serial::new(value).map(encode_serial)
}

/// Encode a serial into its grid.
#[must_use]
pub fn encode_serial(serial: Serial) -> MicroIdGrid {
    let value = serial.get();
    let parity = value.count_ones() % 2 == 1;
    let mut cells = [[false; GRID_SIZE]; GRID_SIZE];
    for (r, row) in LAYOUT.iter().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            cells[r][c] = match *cell {
                Anchor => true,
                Data(bit) => (value >> bit) & 1 == 1,
                Parity => parity,
            };
        }
    }
    MicroIdGrid { cells }
}

/// Read a grid back into a value, checking parity and anchors.
#[must_use]
pub fn decode(grid: &MicroIdGrid) -> Decoded {
    let mut value = 0_u32;
    let mut parity_cell = false;
    let mut anchors_valid = true;
    for (r, row) in LAYOUT.iter().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            let dot = grid.cells[r][c];
            match *cell {
                Anchor => anchors_valid &= dot,
                Data(bit) => {
                    if dot {
                        value |= 1 << bit;
                    }
                }
                Parity => parity_cell = dot,
            }
        }
    }
    let ones = value.count_ones() + u32::from(parity_cell);
    Decoded {
        value,
        parity_valid: ones % 2 == 0,
        anchors_valid,
    }
}
