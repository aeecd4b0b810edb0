//! Board engine.
//!
//! Pure functions over a gravity-drop grid: piece placement, four-in-a-row
//! detection, and full-board checks. No state of its own beyond the grid;
//! everything here is deterministic and side-effect-free.

use thiserror::Error;

/// Default grid height.
pub const DEFAULT_ROWS: usize = 6;

/// Default grid width.
pub const DEFAULT_COLS: usize = 7;

/// Run length required to win.
pub const WIN_LENGTH: usize = 4;

/// One of the two competing sides in a match.
///
/// A side is a position, not a person: it may be held by a human or the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    One,
    Two,
}

impl Side {
    /// The opposing side.
    pub fn other(self) -> Side {
        match self {
            Self::One => Self::Two,
            Self::Two => Self::One,
        }
    }

    /// Wire representation (1 or 2).
    pub fn as_num(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

/// A grid cell: empty, or occupied by one side's marker.
pub type Cell = Option<Side>;

/// Board errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("column {0} is out of range")]
    InvalidColumn(usize),
    #[error("column {0} is full")]
    ColumnFull(usize),
}

/// A `rows x cols` grid with gravity-drop placement.
///
/// Invariant: within any column, occupied cells are contiguous from the
/// bottom row upward. Row 0 is the top of the grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    rows: usize,
    cols: usize,
    cells: Vec<Vec<Cell>>,
}

impl Board {
    /// Create an empty board.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: vec![vec![None; cols]; rows],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Get the cell at `(row, col)`, or `None` if out of bounds.
    pub fn cell(&self, row: usize, col: usize) -> Option<Cell> {
        self.cells.get(row).and_then(|r| r.get(col)).copied()
    }

    /// Lowest empty row in `col`, if the column has space.
    pub fn lowest_empty_row(&self, col: usize) -> Option<usize> {
        (0..self.rows).rev().find(|&r| self.cells[r][col].is_none())
    }

    /// Check whether a column has at least one empty cell.
    pub fn column_open(&self, col: usize) -> bool {
        col < self.cols && self.lowest_empty_row(col).is_some()
    }

    /// Drop `side`'s marker into `col`, returning the row it landed in.
    pub fn drop(&mut self, col: usize, side: Side) -> Result<usize, BoardError> {
        if col >= self.cols {
            return Err(BoardError::InvalidColumn(col));
        }
        let row = self
            .lowest_empty_row(col)
            .ok_or(BoardError::ColumnFull(col))?;
        self.cells[row][col] = Some(side);
        Ok(row)
    }

    /// Check whether the marker at `(row, col)` completes a run of at least
    /// [`WIN_LENGTH`] for `side` along any of the four axes.
    ///
    /// Counts contiguous matching cells in both directions from the placement.
    pub fn is_winning_placement(&self, row: usize, col: usize, side: Side) -> bool {
        const AXES: [(isize, isize); 4] = [(0, 1), (1, 0), (1, 1), (1, -1)];

        for (dr, dc) in AXES {
            let mut count = 1;
            count += self.run_length(row, col, dr, dc, side);
            count += self.run_length(row, col, -dr, -dc, side);
            if count >= WIN_LENGTH {
                return true;
            }
        }
        false
    }

    /// Count contiguous `side` markers in direction `(dr, dc)` starting from
    /// the cell after `(row, col)`.
    fn run_length(&self, row: usize, col: usize, dr: isize, dc: isize, side: Side) -> usize {
        let mut count = 0;
        let mut r = row as isize + dr;
        let mut c = col as isize + dc;
        while r >= 0 && (r as usize) < self.rows && c >= 0 && (c as usize) < self.cols {
            if self.cells[r as usize][c as usize] != Some(side) {
                break;
            }
            count += 1;
            r += dr;
            c += dc;
        }
        count
    }

    /// Scan every occupied cell for a completed run.
    ///
    /// Only used to classify a full board as a draw versus a missed win;
    /// normal play detects wins at placement time.
    pub fn any_win_exists(&self) -> bool {
        for row in 0..self.rows {
            for col in 0..self.cols {
                if let Some(side) = self.cells[row][col] {
                    if self.is_winning_placement(row, col, side) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Check whether no empty cell remains.
    pub fn is_full(&self) -> bool {
        self.cells
            .iter()
            .all(|row| row.iter().all(|cell| cell.is_some()))
    }

    /// Convert to the wire representation: rows of `0 | 1 | 2`.
    pub fn to_json(&self) -> serde_json::Value {
        let rows: Vec<serde_json::Value> = self
            .cells
            .iter()
            .map(|row| {
                let cells: Vec<u8> = row.iter().map(|c| c.map_or(0, Side::as_num)).collect();
                serde_json::json!(cells)
            })
            .collect();
        serde_json::Value::Array(rows)
    }
}
