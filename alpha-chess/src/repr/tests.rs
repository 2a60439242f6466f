use std::str::FromStr;

use chess::ChessMove;

use super::*;

fn mv(s: &str) -> ChessMove {
    ChessMove::from_str(s).unwrap()
}

#[test]
fn starting_position() {
    let position = ChessPosition::default();
    assert_eq!(position.side_to_move(), Side::First);
    assert_eq!(position.ply(), 0);
    assert_eq!(position.terminal_value(), None);

    let (actions, mask) = position.legal_actions();
    assert_eq!(actions.len(), 20);
    assert_eq!(mask.len(), ACTION_SPACE);
    assert_eq!(mask.iter().sum::<f32>(), 20.0);
}

#[test]
fn canonical_index_mirrors_for_second_player() {
    // e2e4 for white and d7d5 for black look the same from the mover's side
    // once mirrored through the centre of the board.
    let white = canonical_index(&mv("e2e4"), Side::First);
    let black = canonical_index(&mv("d7d5"), Side::Second);
    assert_eq!(white, black);
    assert_eq!(white, 12 * 64 + 28);
}

#[test]
fn mask_uses_canonical_indices() {
    let position = ChessPosition::from_uci(&["e2e4"]).unwrap();
    let (actions, mask) = position.legal_actions();
    for action in &actions {
        assert_eq!(mask[canonical_index(action, Side::Second)], 1.0);
    }
}

#[test]
fn push_pop_restores_position() {
    let mut position = ChessPosition::from_uci(&["e2e4", "e7e5"]).unwrap();
    let before = position.features();
    let hash = position.board().get_hash();

    for action in ["g1f3", "b8c6", "f1b5"] {
        position.push(&mv(action)).unwrap();
    }
    for _ in 0..3 {
        position.pop();
    }

    assert_eq!(position.board().get_hash(), hash);
    assert_eq!(position.ply(), 2);
    assert_eq!(position.features(), before);
}

#[test]
fn illegal_push_is_rejected() {
    let mut position = ChessPosition::default();
    assert_eq!(
        position.push(&mv("e2e5")),
        Err(PositionError::IllegalAction("e2e5".to_string()))
    );
    assert_eq!(position.ply(), 0);
}

#[test]
fn feature_shapes() {
    let position = ChessPosition::from_uci(&["e2e4"]).unwrap();
    let features = position.features();
    assert_eq!(features.header.len(), HEADER_SIZE);
    assert_eq!(features.frames.len(), FRAMES_SIZE);
    assert_eq!(Shape::of::<ChessPosition>().frames, FRAME_COUNT * 64 * FRAME_SIZE);
}

#[test]
fn frames_are_from_the_movers_side() {
    // After e2e4 black is to move. In the newest frame black's own king on e8
    // is mirrored onto e1's mirror square (d1) in the mover's planes.
    let position = ChessPosition::from_uci(&["e2e4"]).unwrap();
    let features = position.features();
    let newest = &features.frames[FRAMES_SIZE - 64 * FRAME_SIZE..];
    let king = chess::Piece::King.to_index();
    let d1 = 3;
    assert_eq!(newest[d1 * FRAME_SIZE + king], 1.0);
    // The white pawn that moved to e4 appears on d5 among the opponent planes.
    let d5 = 4 * 8 + 3;
    assert_eq!(newest[d5 * FRAME_SIZE + 6 + chess::Piece::Pawn.to_index()], 1.0);
}

#[test]
fn checkmate_is_a_loss_for_the_mover() {
    let position = ChessPosition::from_uci(&["f2f3", "e7e5", "g2g4", "d8h4"]).unwrap();
    assert_eq!(position.terminal_value(), Some(-1.0));
}

#[test]
fn threefold_repetition_is_a_draw() {
    let moves = ["g1f3", "g8f6", "f3g1", "f6g8", "g1f3", "g8f6", "f3g1", "f6g8"];
    let position = ChessPosition::from_uci(&moves).unwrap();
    assert_eq!(position.repetitions(), 3);
    assert_eq!(position.terminal_value(), Some(0.0));

    // The repetition count shows up in the newest frame.
    let features = position.features();
    let newest = &features.frames[FRAMES_SIZE - 64 * FRAME_SIZE..];
    assert_eq!(newest[12], 0.0);
    assert_eq!(newest[13], 1.0);
}

#[test]
fn insufficient_material_is_a_draw() {
    let position = ChessPosition::from_str("8/8/4k3/8/8/3NK3/8/8 w - - 0 1").unwrap();
    assert_eq!(position.terminal_value(), Some(0.0));
}

#[test]
fn fifty_move_rule() {
    let position = ChessPosition::from_str("8/8/4k3/8/8/3QK3/8/8 w - - 100 80").unwrap();
    assert_eq!(position.halfmove_clock(), 100);
    assert_eq!(position.terminal_value(), Some(0.0));

    let position = ChessPosition::from_str("8/8/4k3/8/8/3QK3/8/8 w - - 99 80").unwrap();
    assert_eq!(position.terminal_value(), None);
}

#[test]
fn halfmove_clock_resets_on_pawn_moves() {
    let position = ChessPosition::from_uci(&["g1f3", "g8f6"]).unwrap();
    assert_eq!(position.halfmove_clock(), 2);
    let position = ChessPosition::from_uci(&["g1f3", "g8f6", "e2e4"]).unwrap();
    assert_eq!(position.halfmove_clock(), 0);
}
