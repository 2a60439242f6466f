use std::str::FromStr;

use chess::{Board, BoardStatus, ChessMove, Color, MoveGen, Piece, ALL_SQUARES};

use super::{canonical_index, Features, Position, Side, ACTION_SPACE};
use crate::error::PositionError;

/// Bits of the move number, then of the halfmove clock, then four castling flags.
pub const HEADER_SIZE: usize = 8 + 6 + 4;
/// Twelve piece planes and two repetition bits per square.
pub const FRAME_SIZE: usize = 12 + 2;
pub const FRAME_COUNT: usize = 6;
pub const FRAMES_SIZE: usize = FRAME_COUNT * 64 * FRAME_SIZE;

const FRAME_LEN: usize = 64 * FRAME_SIZE;
const MOVE_NUMBER_BITS: usize = 8;
const HALFMOVE_BITS: usize = 6;
const FIFTY_MOVE_PLIES: u32 = 100;

#[derive(Clone, Debug)]
struct State {
    board: Board,
    halfmove_clock: u32,
    move_number: u32,
}

/// Chess position with the history needed for repetition draws and for
/// the evaluator's stacked frames.
#[derive(Clone, Debug)]
pub struct ChessPosition {
    states: Vec<State>,
    // One frame per state for each perspective, padded with empty frames.
    white_frames: Vec<f32>,
    black_frames: Vec<f32>,
}

impl Default for ChessPosition {
    fn default() -> Self {
        ChessPosition::from_board(Board::default())
    }
}

impl ChessPosition {
    pub fn from_board(board: Board) -> Self {
        ChessPosition::with_clocks(board, 0, 1)
    }

    fn with_clocks(board: Board, halfmove_clock: u32, move_number: u32) -> Self {
        let padding = (FRAME_COUNT - 1) * FRAME_LEN;
        let mut position = ChessPosition {
            states: vec![State {
                board,
                halfmove_clock,
                move_number,
            }],
            white_frames: vec![0.0; padding],
            black_frames: vec![0.0; padding],
        };
        position.push_frames();
        position
    }

    /// Play a sequence of moves in UCI notation from the starting position.
    pub fn from_uci(moves: &[&str]) -> Result<Self, PositionError> {
        let mut position = ChessPosition::default();
        for mv in moves {
            let action = ChessPosition::parse_action(mv)?;
            position.push(&action)?;
        }
        Ok(position)
    }

    pub fn board(&self) -> &Board {
        &self.top().board
    }

    pub fn halfmove_clock(&self) -> u32 {
        self.top().halfmove_clock
    }

    fn top(&self) -> &State {
        &self.states[self.states.len() - 1]
    }

    /// How many times the current board has occurred, including now.
    pub fn repetitions(&self) -> usize {
        let hash = self.board().get_hash();
        self.states
            .iter()
            .filter(|state| state.board.get_hash() == hash)
            .count()
    }

    fn push_frames(&mut self) {
        let board = self.board();
        let repeated = self.repetitions() - 1;
        let mut white = vec![0.0; FRAME_LEN];
        let mut black = vec![0.0; FRAME_LEN];
        for square in ALL_SQUARES {
            let index = square.to_index();
            let white_offset = index * FRAME_SIZE;
            let black_offset = (63 - index) * FRAME_SIZE;
            if let (Some(piece), Some(color)) = (board.piece_on(square), board.color_on(square)) {
                let (white_plane, black_plane) = match color {
                    Color::White => (piece.to_index(), 6 + piece.to_index()),
                    Color::Black => (6 + piece.to_index(), piece.to_index()),
                };
                white[white_offset + white_plane] = 1.0;
                black[black_offset + black_plane] = 1.0;
            }
            for bit in 0..2 {
                let value = ((repeated >> bit) & 1) as f32;
                white[white_offset + 12 + bit] = value;
                black[black_offset + 12 + bit] = value;
            }
        }
        self.white_frames.extend(white);
        self.black_frames.extend(black);
    }

    fn is_insufficient_material(&self) -> bool {
        let board = self.board();
        let minors = *board.pieces(Piece::Knight) | *board.pieces(Piece::Bishop);
        let kings = *board.pieces(Piece::King);
        (kings | minors) == *board.combined() && minors.popcnt() < 3
    }
}

fn push_bits(header: &mut Vec<f32>, value: u32, bits: usize) {
    header.extend((0..bits).map(|bit| ((value >> bit) & 1) as f32));
}

fn side_of(color: Color) -> Side {
    match color {
        Color::White => Side::First,
        Color::Black => Side::Second,
    }
}

impl Position for ChessPosition {
    type Action = ChessMove;

    const HEADER_SIZE: usize = HEADER_SIZE;
    const FRAMES_SIZE: usize = FRAMES_SIZE;
    const ACTION_SPACE: usize = ACTION_SPACE;

    fn canonical_index(action: &ChessMove, perspective: Side) -> usize {
        canonical_index(action, perspective)
    }

    fn side_to_move(&self) -> Side {
        side_of(self.board().side_to_move())
    }

    fn ply(&self) -> usize {
        self.states.len() - 1
    }

    fn legal_actions(&self) -> (Vec<ChessMove>, Vec<f32>) {
        let side = self.side_to_move();
        let mut mask = vec![0.0; ACTION_SPACE];
        let actions: Vec<ChessMove> = MoveGen::new_legal(self.board()).collect();
        for action in &actions {
            mask[canonical_index(action, side)] = 1.0;
        }
        (actions, mask)
    }

    fn features(&self) -> Features {
        let state = self.top();
        let board = &state.board;
        let mut header = Vec::with_capacity(HEADER_SIZE);
        push_bits(&mut header, state.move_number, MOVE_NUMBER_BITS);
        push_bits(&mut header, state.halfmove_clock, HALFMOVE_BITS);
        let mine = board.my_castle_rights();
        let theirs = board.their_castle_rights();
        for flag in [
            mine.has_kingside(),
            mine.has_queenside(),
            theirs.has_kingside(),
            theirs.has_queenside(),
        ] {
            header.push(if flag { 1.0 } else { 0.0 });
        }

        let frames = match board.side_to_move() {
            Color::White => &self.white_frames,
            Color::Black => &self.black_frames,
        };
        Features {
            header,
            frames: frames[frames.len() - FRAMES_SIZE..].to_vec(),
        }
    }

    fn push(&mut self, action: &ChessMove) -> Result<(), PositionError> {
        let state = self.top();
        if !state.board.legal(*action) {
            return Err(PositionError::IllegalAction(action.to_string()));
        }
        let resets_clock = state.board.piece_on(action.get_source()) == Some(Piece::Pawn)
            || state.board.piece_on(action.get_dest()).is_some();
        let next = State {
            board: state.board.make_move_new(*action),
            halfmove_clock: if resets_clock {
                0
            } else {
                state.halfmove_clock + 1
            },
            move_number: match state.board.side_to_move() {
                Color::White => state.move_number,
                Color::Black => state.move_number + 1,
            },
        };
        self.states.push(next);
        self.push_frames();
        Ok(())
    }

    fn pop(&mut self) {
        assert!(self.states.len() > 1, "cannot pop the starting position");
        self.states.pop();
        let len = self.white_frames.len() - FRAME_LEN;
        self.white_frames.truncate(len);
        self.black_frames.truncate(len);
    }

    fn terminal_value(&self) -> Option<f32> {
        match self.board().status() {
            BoardStatus::Checkmate => return Some(-1.0),
            BoardStatus::Stalemate => return Some(0.0),
            BoardStatus::Ongoing => {}
        }
        if self.is_insufficient_material()
            || self.halfmove_clock() >= FIFTY_MOVE_PLIES
            || self.repetitions() >= 3
        {
            return Some(0.0);
        }
        None
    }
}

impl FromStr for ChessPosition {
    type Err = PositionError;

    /// Parse a FEN string. The history starts at the given board.
    fn from_str(fen: &str) -> Result<Self, Self::Err> {
        let invalid = || PositionError::InvalidFen(fen.to_string());
        let board = Board::from_str(fen).map_err(|_| invalid())?;
        let mut clocks = fen.split_whitespace().skip(4);
        let mut clock = |default: u32| -> Result<u32, PositionError> {
            match clocks.next() {
                Some(field) => field.parse().map_err(|_| invalid()),
                None => Ok(default),
            }
        };
        let halfmove_clock = clock(0)?;
        let move_number = clock(1)?;
        Ok(ChessPosition::with_clocks(board, halfmove_clock, move_number))
    }
}
