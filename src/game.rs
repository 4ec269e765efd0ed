//! Board, players and results of a tris game.
//!
//! Everything here is pure: the shared memory layout stores these values as raw bytes
//! (see [`crate::shared_state`]) and converts them back with the `to_raw`/`from_raw` pairs.

use std::fmt;
use std::str::FromStr;

use crate::error::MoveError;

/// Side length of the grid.
pub const BOARD_SIDE: u8 = 3;
/// Number of cells on the board.
pub const BOARD_CELLS: usize = 9;

/// One of the two player slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Player {
    /// Slot 1
    One,
    /// Slot 2
    Two,
}

impl Player {
    /// Both players, in slot order.
    pub const ALL: [Player; 2] = [Player::One, Player::Two];

    /// The opponent.
    pub fn other(self) -> Player {
        match self {
            Player::One => Player::Two,
            Player::Two => Player::One,
        }
    }

    /// Index in `participant_pids` / `usernames` (slot 0 is the coordinator).
    pub fn slot(self) -> usize {
        match self {
            Player::One => 1,
            Player::Two => 2,
        }
    }

    /// Inverse of [`Player::slot`].
    pub fn from_slot(slot: usize) -> Option<Player> {
        match slot {
            1 => Some(Player::One),
            2 => Some(Player::Two),
            _ => None,
        }
    }

    /// Index in the two-entry `symbols` array.
    pub fn symbol_index(self) -> usize {
        self.slot() - 1
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Player::One => write!(f, "player one"),
            Player::Two => write!(f, "player two"),
        }
    }
}

/// Content of a board cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cell {
    /// Free
    #[default]
    Empty,
    /// Taken by [`Player::One`]
    PlayerOne,
    /// Taken by [`Player::Two`]
    PlayerTwo,
}

impl Cell {
    /// The cell a player leaves behind.
    pub fn of(player: Player) -> Cell {
        match player {
            Player::One => Cell::PlayerOne,
            Player::Two => Cell::PlayerTwo,
        }
    }

    /// Who holds the cell.
    pub fn owner(self) -> Option<Player> {
        match self {
            Cell::Empty => None,
            Cell::PlayerOne => Some(Player::One),
            Cell::PlayerTwo => Some(Player::Two),
        }
    }

    pub(crate) fn to_raw(self) -> u8 {
        match self {
            Cell::Empty => 0,
            Cell::PlayerOne => 1,
            Cell::PlayerTwo => 2,
        }
    }

    /// Unknown bytes read back as empty.
    pub(crate) fn from_raw(raw: u8) -> Cell {
        match raw {
            1 => Cell::PlayerOne,
            2 => Cell::PlayerTwo,
            _ => Cell::Empty,
        }
    }
}

/// A cell coordinate, 0-based.
///
/// The linear index used by the shared layout is `row + col * 3`, for both validation and
/// mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    row: u8,
    col: u8,
}

impl Position {
    /// `None` when outside the grid.
    pub fn new(row: u8, col: u8) -> Option<Position> {
        (row < BOARD_SIDE && col < BOARD_SIDE).then_some(Position { row, col })
    }

    /// Inverse of [`Position::index`].
    pub fn from_index(index: usize) -> Option<Position> {
        (index < BOARD_CELLS).then(|| Position {
            row: (index % BOARD_SIDE as usize) as u8,
            col: (index / BOARD_SIDE as usize) as u8,
        })
    }

    /// Linear index in the shared board.
    pub fn index(self) -> usize {
        self.row as usize + self.col as usize * BOARD_SIDE as usize
    }

    /// 0-based row.
    pub fn row(self) -> u8 {
        self.row
    }

    /// 0-based column.
    pub fn col(self) -> u8 {
        self.col
    }
}

impl fmt::Display for Position {
    /// 1-based, the way players type it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.row + 1, self.col + 1)
    }
}

impl FromStr for Position {
    type Err = MoveError;

    /// Parses `<row> <col>` (or `<row>,<col>`), both 1-based.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let malformed = || MoveError::Malformed(trimmed.to_owned());

        let mut parts = trimmed
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|p| !p.is_empty());
        let (Some(row), Some(col), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed());
        };
        let row: i64 = row.parse().map_err(|_| malformed())?;
        let col: i64 = col.parse().map_err(|_| malformed())?;

        let side = BOARD_SIDE as i64;
        if !(1..=side).contains(&row) || !(1..=side).contains(&col) {
            return Err(MoveError::OutOfGrid { row, col });
        }
        Ok(Position {
            row: (row - 1) as u8,
            col: (col - 1) as u8,
        })
    }
}

/// The 8 winning lines, as linear indices.
const LINES: [[usize; 3]; 8] = [
    // rows (row fixed, col varies => stride 3)
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    // columns
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    // diagonals
    [0, 4, 8],
    [6, 4, 2],
];

/// A snapshot of the 9 cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Board {
    cells: [Cell; BOARD_CELLS],
}

impl Board {
    /// An empty board.
    pub fn new() -> Board {
        Board::default()
    }

    /// Build a board from its cells in linear-index order.
    pub fn from_cells(cells: [Cell; BOARD_CELLS]) -> Board {
        Board { cells }
    }

    /// All cells in linear-index order.
    pub fn cells(&self) -> &[Cell; BOARD_CELLS] {
        &self.cells
    }

    /// Content of one cell.
    pub fn get(&self, position: Position) -> Cell {
        self.cells[position.index()]
    }

    /// Checks that `position` may receive a move.
    pub fn check_free(&self, position: Position) -> Result<(), MoveError> {
        match self.get(position) {
            Cell::Empty => Ok(()),
            _ => Err(MoveError::Occupied {
                row: position.row + 1,
                col: position.col + 1,
            }),
        }
    }

    /// Marks `position` for `player`. A taken cell is never overwritten.
    pub fn place(&mut self, position: Position, player: Player) -> Result<(), MoveError> {
        self.check_free(position)?;
        self.cells[position.index()] = Cell::of(player);
        Ok(())
    }

    /// Free cells, in increasing linear index.
    pub fn empty_positions(&self) -> impl Iterator<Item = Position> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == Cell::Empty)
            .filter_map(|(i, _)| Position::from_index(i))
    }

    /// No free cell left.
    pub fn is_full(&self) -> bool {
        self.cells.iter().all(|c| *c != Cell::Empty)
    }

    /// Number of taken cells.
    pub fn occupied(&self) -> usize {
        self.cells.iter().filter(|c| **c != Cell::Empty).count()
    }

    /// Render with the session symbols.
    pub fn display(&self, symbols: [char; 2]) -> BoardView<'_> {
        BoardView {
            board: self,
            symbols,
        }
    }
}

/// Plain-text rendering of a [`Board`].
pub struct BoardView<'a> {
    board: &'a Board,
    symbols: [char; 2],
}

impl fmt::Display for BoardView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "    1   2   3")?;
        for row in 0..BOARD_SIDE {
            write!(f, "{} ", row + 1)?;
            for col in 0..BOARD_SIDE {
                let position = Position { row, col };
                let symbol = match self.board.get(position).owner() {
                    Some(p) => self.symbols[p.symbol_index()],
                    None => ' ',
                };
                let sep = if col + 1 < BOARD_SIDE { "|" } else { "" };
                write!(f, " {symbol} {sep}")?;
            }
            writeln!(f)?;
            if row + 1 < BOARD_SIDE {
                writeln!(f, "  ---+---+---")?;
            }
        }
        Ok(())
    }
}

/// Outcome stored in the `result` field.
///
/// Moves from `NotFinished` to exactly one terminal value, then never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GameResult {
    /// Still playing
    #[default]
    NotFinished,
    /// Full board, no line
    Draw,
    /// Player one completed a line
    PlayerOneWins,
    /// Player two completed a line
    PlayerTwoWins,
    /// Someone left; the remaining player wins
    Quit,
}

impl GameResult {
    /// The result awarding the win to `player`.
    pub fn win_for(player: Player) -> GameResult {
        match player {
            Player::One => GameResult::PlayerOneWins,
            Player::Two => GameResult::PlayerTwoWins,
        }
    }

    /// Winner by line, if any.
    pub fn winner(self) -> Option<Player> {
        match self {
            GameResult::PlayerOneWins => Some(Player::One),
            GameResult::PlayerTwoWins => Some(Player::Two),
            _ => None,
        }
    }

    /// Anything but `NotFinished`.
    pub fn is_terminal(self) -> bool {
        self != GameResult::NotFinished
    }

    pub(crate) fn to_raw(self) -> u8 {
        match self {
            GameResult::NotFinished => 0,
            GameResult::Draw => 1,
            GameResult::PlayerOneWins => 2,
            GameResult::PlayerTwoWins => 3,
            GameResult::Quit => 4,
        }
    }

    pub(crate) fn from_raw(raw: u8) -> GameResult {
        match raw {
            1 => GameResult::Draw,
            2 => GameResult::PlayerOneWins,
            3 => GameResult::PlayerTwoWins,
            4 => GameResult::Quit,
            _ => GameResult::NotFinished,
        }
    }
}

impl fmt::Display for GameResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameResult::NotFinished => write!(f, "game in progress"),
            GameResult::Draw => write!(f, "draw"),
            GameResult::PlayerOneWins => write!(f, "player one wins"),
            GameResult::PlayerTwoWins => write!(f, "player two wins"),
            GameResult::Quit => write!(f, "a player quit"),
        }
    }
}

/// Strength of the autoplay peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Difficulty {
    /// Random moves
    Easy,
    /// Alternates random and perfect moves
    Medium,
    /// Minimax, never loses
    Hard,
}

impl Difficulty {
    /// `None` encodes "no autoplay".
    pub(crate) fn to_raw(difficulty: Option<Difficulty>) -> u8 {
        match difficulty {
            None => 0,
            Some(Difficulty::Easy) => 1,
            Some(Difficulty::Medium) => 2,
            Some(Difficulty::Hard) => 3,
        }
    }

    pub(crate) fn from_raw(raw: u8) -> Option<Difficulty> {
        match raw {
            1 => Some(Difficulty::Easy),
            2 => Some(Difficulty::Medium),
            3 => Some(Difficulty::Hard),
            _ => None,
        }
    }
}

impl FromStr for Difficulty {
    type Err = String;

    /// `*` is shorthand for hard.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "*" | "hard" => Ok(Difficulty::Hard),
            "medium" => Ok(Difficulty::Medium),
            "easy" => Ok(Difficulty::Easy),
            other => Err(format!(
                "unknown difficulty '{other}' (expected '*', 'easy', 'medium' or 'hard')"
            )),
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Medium => write!(f, "medium"),
            Difficulty::Hard => write!(f, "hard"),
        }
    }
}

/// Evaluates the board: a winner if any of the 8 lines is uniform and non-empty, `Draw`
/// when the board is full otherwise, `NotFinished` in every other case.
pub fn is_game_ended(board: &Board) -> GameResult {
    for [a, b, c] in LINES {
        let cell = board.cells[a];
        if cell != Cell::Empty && cell == board.cells[b] && cell == board.cells[c] {
            if let Some(player) = cell.owner() {
                return GameResult::win_for(player);
            }
        }
    }
    if board.is_full() {
        GameResult::Draw
    } else {
        GameResult::NotFinished
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn pos(row: u8, col: u8) -> Position {
        Position::new(row, col).unwrap()
    }

    fn board_from(pattern: &str) -> Board {
        // pattern lists cells row by row, 'x' = one, 'o' = two
        let mut board = Board::new();
        for (i, ch) in pattern.chars().filter(|c| !c.is_whitespace()).enumerate() {
            let position = pos(i as u8 / 3, i as u8 % 3);
            match ch {
                'x' => board.place(position, Player::One).unwrap(),
                'o' => board.place(position, Player::Two).unwrap(),
                _ => {}
            }
        }
        board
    }

    #[test]
    fn index_formula_is_row_plus_three_cols() {
        assert_eq!(pos(0, 0).index(), 0);
        assert_eq!(pos(0, 1).index(), 3);
        assert_eq!(pos(2, 0).index(), 2);
        assert_eq!(pos(1, 2).index(), 7);
        for i in 0..BOARD_CELLS {
            assert_eq!(Position::from_index(i).unwrap().index(), i);
        }
        assert!(Position::from_index(9).is_none());
        assert!(Position::new(3, 0).is_none());
    }

    #[test]
    fn scenario_main_diagonal() {
        let mut board = Board::new();
        board.place(pos(0, 0), Player::One).unwrap();
        assert_eq!(board.cells()[0], Cell::PlayerOne);
        board.place(pos(0, 1), Player::Two).unwrap();
        assert_eq!(board.cells()[3], Cell::PlayerTwo);
        board.place(pos(1, 1), Player::One).unwrap();
        board.place(pos(0, 2), Player::Two).unwrap();
        assert_eq!(is_game_ended(&board), GameResult::NotFinished);
        board.place(pos(2, 2), Player::One).unwrap();
        assert_eq!(is_game_ended(&board), GameResult::PlayerOneWins);
    }

    #[test]
    fn full_board_without_line_is_draw() {
        let board = board_from("xox xoo oxx");
        assert!(board.is_full());
        assert_eq!(is_game_ended(&board), GameResult::Draw);
    }

    #[test]
    fn every_line_wins() {
        for line in LINES {
            for player in Player::ALL {
                let mut board = Board::new();
                for i in line {
                    board.place(Position::from_index(i).unwrap(), player).unwrap();
                }
                assert_eq!(is_game_ended(&board), GameResult::win_for(player));
            }
        }
    }

    #[test]
    fn bent_triples_do_not_win() {
        // linear indices: {0,1,3} is an L, {0,4,5} a knight's step, {1,5,6} scattered
        for triple in [[0, 1, 3], [0, 4, 5], [1, 5, 6], [2, 4, 7], [3, 5, 7]] {
            for player in Player::ALL {
                let mut board = Board::new();
                for i in triple {
                    board.place(Position::from_index(i).unwrap(), player).unwrap();
                }
                assert_eq!(is_game_ended(&board), GameResult::NotFinished, "{triple:?}");
            }
        }
    }

    /// Winners found by walking rows, columns and diagonals by coordinates.
    fn winners_by_coordinates(board: &Board) -> Vec<Player> {
        let owns = |player: Player, cells: [(u8, u8); 3]| {
            cells
                .iter()
                .all(|&(r, c)| board.get(pos(r, c)) == Cell::of(player))
        };
        Player::ALL
            .into_iter()
            .filter(|&player| {
                (0..3).any(|r| owns(player, [(r, 0), (r, 1), (r, 2)]))
                    || (0..3).any(|c| owns(player, [(0, c), (1, c), (2, c)]))
                    || owns(player, [(0, 0), (1, 1), (2, 2)])
                    || owns(player, [(0, 2), (1, 1), (2, 0)])
            })
            .collect()
    }

    proptest! {
        #[test]
        fn only_straight_lines_win(cells in proptest::collection::vec(0u8..3, 9)) {
            let mut board = Board::new();
            for (i, cell) in cells.iter().enumerate() {
                let position = Position::from_index(i).unwrap();
                match cell {
                    1 => board.place(position, Player::One).unwrap(),
                    2 => board.place(position, Player::Two).unwrap(),
                    _ => {}
                }
            }
            let winners = winners_by_coordinates(&board);
            prop_assume!(winners.len() < 2);

            let expected = match winners.first() {
                Some(&player) => GameResult::win_for(player),
                None if board.is_full() => GameResult::Draw,
                None => GameResult::NotFinished,
            };
            prop_assert_eq!(is_game_ended(&board), expected);
        }
    }

    #[test]
    fn win_on_last_cell_beats_draw() {
        let board = board_from("xox oxo oxx");
        assert_eq!(is_game_ended(&board), GameResult::PlayerOneWins);
    }

    #[test]
    fn occupied_cell_is_never_overwritten() {
        let mut board = Board::new();
        board.place(pos(1, 1), Player::One).unwrap();
        let err = board.place(pos(1, 1), Player::Two).unwrap_err();
        assert_eq!(err, MoveError::Occupied { row: 2, col: 2 });
        assert_eq!(board.get(pos(1, 1)), Cell::PlayerOne);
    }

    #[test]
    fn parse_move_input() {
        assert_eq!("1 1".parse::<Position>().unwrap(), pos(0, 0));
        assert_eq!(" 3,2\n".parse::<Position>().unwrap(), pos(2, 1));
        assert_eq!("2  3".parse::<Position>().unwrap(), pos(1, 2));
        assert!(matches!(
            "4 1".parse::<Position>(),
            Err(MoveError::OutOfGrid { row: 4, col: 1 })
        ));
        assert!(matches!(
            "0 2".parse::<Position>(),
            Err(MoveError::OutOfGrid { .. })
        ));
        assert!(matches!("a b".parse::<Position>(), Err(MoveError::Malformed(_))));
        assert!(matches!("1".parse::<Position>(), Err(MoveError::Malformed(_))));
        assert!(matches!("1 2 3".parse::<Position>(), Err(MoveError::Malformed(_))));
    }

    #[test]
    fn raw_encodings_are_stable() {
        for result in [
            GameResult::NotFinished,
            GameResult::Draw,
            GameResult::PlayerOneWins,
            GameResult::PlayerTwoWins,
            GameResult::Quit,
        ] {
            assert_eq!(GameResult::from_raw(result.to_raw()), result);
        }
        assert_eq!(Difficulty::from_raw(Difficulty::to_raw(None)), None);
        assert_eq!(Cell::from_raw(42), Cell::Empty);
    }

    #[test]
    fn difficulty_markers() {
        assert_eq!("*".parse::<Difficulty>(), Ok(Difficulty::Hard));
        assert_eq!("Medium".parse::<Difficulty>(), Ok(Difficulty::Medium));
        assert!("impossible".parse::<Difficulty>().is_err());
    }

    #[test]
    fn board_renders_symbols() {
        let board = board_from("x.. .o. ...");
        let text = board.display(['X', 'O']).to_string();
        assert!(text.contains(" X |"));
        assert!(text.contains(" O |"));
    }
}
