//! Move selection for the autoplay peer.
//!
//! [`select_move`] is pure apart from the random source it is given: `Easy` picks a random
//! free cell, `Hard` runs an exhaustive minimax, `Medium` alternates the two on the parity
//! of the agent's move count.

use rand::seq::IteratorRandom;
use rand::Rng;
use tracing::trace;

use crate::game::{is_game_ended, Board, Difficulty, GameResult, Player, Position};

/// Picks the cell `player` plays next, `None` when the board is full.
pub fn select_move<R: Rng + ?Sized>(
    board: &Board,
    player: Player,
    difficulty: Difficulty,
    move_count: u32,
    rng: &mut R,
) -> Option<Position> {
    match difficulty {
        Difficulty::Easy => random_move(board, rng),
        Difficulty::Hard => best_move(board, player),
        Difficulty::Medium => {
            if move_count % 2 == 0 {
                best_move(board, player)
            } else {
                random_move(board, rng)
            }
        }
    }
}

/// Uniformly random free cell.
pub fn random_move<R: Rng + ?Sized>(board: &Board, rng: &mut R) -> Option<Position> {
    board.empty_positions().choose(rng)
}

/// Minimax-optimal cell for `player`; ties go to the lowest linear index.
pub fn best_move(board: &Board, player: Player) -> Option<Position> {
    let mut best: Option<(Position, i8)> = None;
    for position in board.empty_positions() {
        let mut next = *board;
        if next.place(position, player).is_err() {
            continue;
        }
        let score = minimax(&next, player.other(), player);
        trace!(%position, score);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((position, score));
        }
    }
    best.map(|(position, _)| position)
}

/// Value of `board` for `maximizer` with `to_move` about to play: +1 win, -1 loss, 0 draw.
pub fn minimax(board: &Board, to_move: Player, maximizer: Player) -> i8 {
    match is_game_ended(board) {
        GameResult::NotFinished => {}
        GameResult::Draw | GameResult::Quit => return 0,
        result => {
            return if result.winner() == Some(maximizer) { 1 } else { -1 };
        }
    }

    let scores = board.empty_positions().filter_map(|position| {
        let mut next = *board;
        next.place(position, to_move).ok()?;
        Some(minimax(&next, to_move.other(), maximizer))
    });
    if to_move == maximizer {
        scores.max().unwrap_or(0)
    } else {
        scores.min().unwrap_or(0)
    }
}
