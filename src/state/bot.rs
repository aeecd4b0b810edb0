//! Bot decision procedure.
//!
//! A fixed three-tier heuristic, not search: take an immediate win, block the
//! opponent's immediate win, otherwise prefer columns near the center. Uses
//! the board engine as a one-ply simulator on private copies; the caller's
//! board is never mutated.

use crate::state::board::{Board, Side};

/// Pick a column for `bot_side` to play.
///
/// Only meaningful while at least one column is open; callers must not invoke
/// this on a full board. Falls back to the first open column left-to-right,
/// which cannot fail under that precondition.
pub fn next_move(board: &Board, bot_side: Side) -> usize {
    let opponent = bot_side.other();

    // 1) Immediate win for the bot, first column by ascending index.
    if let Some(col) = winning_column(board, bot_side) {
        return col;
    }

    // 2) Block the opponent's immediate win.
    if let Some(col) = winning_column(board, opponent) {
        return col;
    }

    // 3) Prefer the center, then alternate outward.
    for col in center_out_order(board.cols()) {
        if board.column_open(col) {
            return col;
        }
    }

    // 4) First open column left-to-right.
    (0..board.cols()).find(|&c| board.column_open(c)).unwrap_or(0)
}

/// First column where dropping `side`'s marker completes a run, if any.
fn winning_column(board: &Board, side: Side) -> Option<usize> {
    for col in 0..board.cols() {
        let Some(row) = board.lowest_empty_row(col) else {
            continue;
        };
        let mut probe = board.clone();
        probe
            .drop(col, side)
            .expect("open column accepts a simulated drop");
        if probe.is_winning_placement(row, col, side) {
            return Some(col);
        }
    }
    None
}

/// Column order: center, center-1, center+1, center-2, center+2, ...
fn center_out_order(cols: usize) -> Vec<usize> {
    let center = cols / 2;
    let mut order = vec![center];
    for step in 1..=cols {
        if step <= center {
            order.push(center - step);
        }
        if center + step < cols {
            order.push(center + step);
        }
    }
    order
}
