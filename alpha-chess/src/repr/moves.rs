use chess::ChessMove;

use super::Side;

/// One slot per (source, destination) pair. Promotions share the slot of
/// the underlying pawn move.
pub const ACTION_SPACE: usize = 64 * 64;

/// Policy index of a move. Squares are mirrored for the second player so the
/// evaluator always sees the board from the mover's side.
pub fn canonical_index(action: &ChessMove, perspective: Side) -> usize {
    let source = action.get_source().to_index();
    let dest = action.get_dest().to_index();
    match perspective {
        Side::First => source * 64 + dest,
        Side::Second => (63 - source) * 64 + (63 - dest),
    }
}
