use std::{
    fmt::{Debug, Display},
    ops::Not,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::PositionError;

mod moves;
mod position;
#[cfg(test)]
mod tests;

pub use moves::{canonical_index, ACTION_SPACE};
pub use position::{ChessPosition, FRAMES_SIZE, FRAME_COUNT, FRAME_SIZE, HEADER_SIZE};

/// The two players, named by move order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    First,
    Second,
}

impl Side {
    /// +1 for the first player, -1 for the second.
    pub fn sign(self) -> f32 {
        match self {
            Side::First => 1.0,
            Side::Second => -1.0,
        }
    }
}

impl Not for Side {
    type Output = Side;

    fn not(self) -> Side {
        match self {
            Side::First => Side::Second,
            Side::Second => Side::First,
        }
    }
}

/// Dimensions of the evaluator input and output for one position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub header: usize,
    pub frames: usize,
    pub actions: usize,
}

impl Shape {
    pub fn of<P: Position>() -> Self {
        Shape {
            header: P::HEADER_SIZE,
            frames: P::FRAMES_SIZE,
            actions: P::ACTION_SPACE,
        }
    }
}

/// Evaluator input for one position, from the perspective of the side to move.
#[derive(Clone, Debug, PartialEq)]
pub struct Features {
    pub header: Vec<f32>,
    pub frames: Vec<f32>,
}

/// A game state that can be searched.
///
/// `push` and `pop` must be strictly paired: after any sequence of pushes
/// followed by the same number of pops the position is unchanged.
pub trait Position {
    type Action: Clone + Debug + Display + FromStr + PartialEq;

    const HEADER_SIZE: usize;
    const FRAMES_SIZE: usize;
    const ACTION_SPACE: usize;

    /// Index of `action` in the policy vector evaluated for `perspective`.
    fn canonical_index(action: &Self::Action, perspective: Side) -> usize;

    fn side_to_move(&self) -> Side;

    /// Number of actions played since the start of the game.
    fn ply(&self) -> usize;

    /// Legal actions and a mask over the action space marking them.
    fn legal_actions(&self) -> (Vec<Self::Action>, Vec<f32>);

    fn features(&self) -> Features;

    fn push(&mut self, action: &Self::Action) -> Result<(), PositionError>;

    fn pop(&mut self);

    /// Outcome for the side to move if the game is over.
    fn terminal_value(&self) -> Option<f32>;

    fn parse_action(s: &str) -> Result<Self::Action, PositionError> {
        s.parse()
            .map_err(|_| PositionError::InvalidAction(s.to_string()))
    }
}
