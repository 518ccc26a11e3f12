//! Tic-Tac-Toe
//!
//! Bundled rules module. P1 plays `X`, P2 plays `O`, one side moves per turn.
//!
//! State is three rows of `X`, `O` or `.` joined by newlines:
//!
//! ```text
//! XO.
//! .X.
//! ..O
//! ```
//!
//! Moves are `row,column` with both coordinates in `1..=3`.

use super::contract::{Game, GameError, TurnOutcome};
use super::outcome::{GameResult, Moves, Outcome, Side, ToMove};

const SIZE: usize = 3;
const SQUARES: usize = SIZE * SIZE;

const REASON_WIN: &str = "Three in a row";
const REASON_FULL: &str = "Out of squares";
const REASON_INVALID: &str = "Invalid move";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cell {
    Empty,
    Mark(Side),
}

impl Cell {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '.' => Some(Cell::Empty),
            'X' => Some(Cell::Mark(Side::P1)),
            'O' => Some(Cell::Mark(Side::P2)),
            _ => None,
        }
    }

    fn to_char(self) -> char {
        match self {
            Cell::Empty => '.',
            Cell::Mark(Side::P1) => 'X',
            Cell::Mark(Side::P2) => 'O',
        }
    }
}

/// A game of tic-tac-toe.
#[derive(Clone, Debug)]
pub struct TicTacToe {
    board: [[Cell; SIZE]; SIZE],
    move_number: usize,
    result: Option<GameResult>,
}

impl Default for TicTacToe {
    fn default() -> Self {
        Self::new()
    }
}

impl TicTacToe {
    /// Empty board, P1 to move.
    pub fn new() -> Self {
        Self {
            board: [[Cell::Empty; SIZE]; SIZE],
            move_number: 0,
            result: None,
        }
    }

    /// Load a position from its textual board.
    ///
    /// A position that is already won or full loads with its result set.
    pub fn from_board(text: &str) -> Result<Self, GameError> {
        let rows: Vec<&str> = text.split('\n').collect();
        if rows.len() != SIZE {
            return Err(invalid("board has incorrect number of rows"));
        }

        for (i, row) in rows.iter().enumerate() {
            if row.chars().count() != SIZE {
                return Err(invalid(format!("board row {} has incorrect length", i + 1)));
            }
        }

        let mut game = Self::new();
        let mut marks = [0usize; 2];

        for (r, row) in rows.iter().enumerate() {
            for (c, ch) in row.chars().enumerate() {
                let cell = Cell::from_char(ch)
                    .ok_or_else(|| invalid("board has an invalid element"))?;
                match cell {
                    Cell::Mark(Side::P1) => marks[0] += 1,
                    Cell::Mark(Side::P2) => marks[1] += 1,
                    Cell::Empty => {}
                }
                game.board[r][c] = cell;
            }
        }

        let [xs, os] = marks;
        if xs < os || xs > os + 1 {
            return Err(invalid("board has incorrect number of Xs and Os"));
        }
        game.move_number = xs + os;

        let p1_win = game.has_line(Side::P1);
        let p2_win = game.has_line(Side::P2);

        game.result = match (p1_win, p2_win) {
            (true, true) => return Err(invalid("board has invalid position")),
            (true, false) => Some(GameResult::new(Outcome::P1Wins, REASON_WIN)),
            (false, true) => Some(GameResult::new(Outcome::P2Wins, REASON_WIN)),
            (false, false) if game.move_number == SQUARES => {
                Some(GameResult::new(Outcome::Draw, REASON_FULL))
            }
            (false, false) => None,
        };

        Ok(game)
    }

    /// Registry entry point.
    pub fn construct(state: Option<&str>) -> Result<Box<dyn Game>, GameError> {
        let game = match state {
            Some(board) => Self::from_board(board)?,
            None => Self::new(),
        };
        Ok(Box::new(game))
    }

    fn side_to_move(&self) -> Side {
        if self.move_number % 2 == 0 {
            Side::P1
        } else {
            Side::P2
        }
    }

    fn has_line(&self, side: Side) -> bool {
        let mark = Cell::Mark(side);
        let b = &self.board;

        let row_or_column = (0..SIZE).any(|i| {
            (0..SIZE).all(|j| b[i][j] == mark) || (0..SIZE).all(|j| b[j][i] == mark)
        });
        let diagonal = (0..SIZE).all(|i| b[i][i] == mark)
            || (0..SIZE).all(|i| b[i][SIZE - 1 - i] == mark);

        row_or_column || diagonal
    }

    fn finish(&mut self, result: GameResult) -> TurnOutcome {
        self.result = Some(result.clone());
        TurnOutcome::Finished(result)
    }
}

/// Parse `r,c` with both coordinates in `1..=3` into zero-based indices.
fn parse_move(text: &str) -> Option<(usize, usize)> {
    match text.as_bytes() {
        [r @ b'1'..=b'3', b',', c @ b'1'..=b'3'] => {
            Some(((r - b'1') as usize, (c - b'1') as usize))
        }
        _ => None,
    }
}

fn invalid(message: impl Into<String>) -> GameError {
    GameError::InvalidState(message.into())
}

impl Game for TicTacToe {
    fn start(&mut self) -> Result<ToMove, GameError> {
        if self.result.is_some() {
            return Err(GameError::AlreadyFinished);
        }
        Ok(ToMove::only(self.side_to_move()))
    }

    fn apply_moves(&mut self, moves: &Moves) -> TurnOutcome {
        if let Some(result) = &self.result {
            return TurnOutcome::Finished(result.clone());
        }

        let mover = self.side_to_move();
        if moves[mover.other()].is_some() {
            return self.finish(GameResult::loss_for(mover.other(), REASON_INVALID));
        }

        let square = moves[mover].as_deref().and_then(parse_move);
        let (r, c) = match square {
            Some((r, c)) if self.board[r][c] == Cell::Empty => (r, c),
            _ => return self.finish(GameResult::loss_for(mover, REASON_INVALID)),
        };

        self.board[r][c] = Cell::Mark(mover);
        if self.has_line(mover) {
            return self.finish(GameResult::new(Outcome::win_for(mover), REASON_WIN));
        }

        self.move_number += 1;
        if self.move_number == SQUARES {
            return self.finish(GameResult::new(Outcome::Draw, REASON_FULL));
        }

        TurnOutcome::Continue(ToMove::only(self.side_to_move()))
    }

    fn state(&self) -> String {
        self.board
            .iter()
            .map(|row| row.iter().map(|cell| cell.to_char()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn result(&self) -> Option<&GameResult> {
        self.result.as_ref()
    }
}
