use std::path::Path;

use alpha_chess::{
    config::SearchParams,
    coordinator::Search,
    record::GameRecord,
    repr::{Position, Side},
    search::Tree,
};
use log::{debug, info};

use crate::{error::TrainerError, status::StatusBoard};

/// Who searches for each side.
pub enum Players<'a> {
    /// One pool plays both sides with a single tree.
    Shared(&'a mut Search),
    /// Separate pools and trees for the first and second player.
    Split {
        first: &'a mut Search,
        second: &'a mut Search,
    },
}

/// Play `record` to the end, saving it after every move.
/// Returns the outcome for the first player.
pub async fn play_game<P>(
    players: Players<'_>,
    record: &mut GameRecord,
    path: &Path,
    params: &SearchParams,
    max_plies: Option<usize>,
    status: &StatusBoard,
) -> Result<f32, TrainerError>
where
    P: Position + Default + Clone,
{
    let position: P = record.replay()?;
    let mut seats: Vec<(&mut Search, Tree<P>)> = match players {
        Players::Shared(search) => vec![(search, Tree::new(position, params.clone()))],
        Players::Split { first, second } => vec![
            (first, Tree::new(position.clone(), params.clone())),
            (second, Tree::new(position, params.clone())),
        ],
    };

    let result = loop {
        let ply = record.len();
        let (terminal, side) = {
            let position = seats[0].1.position();
            (position.terminal_value(), position.side_to_move())
        };
        if let Some(value) = terminal {
            break value * side.sign();
        }
        if max_plies.map_or(false, |max| ply >= max) {
            debug!("adjudicating a draw after {ply} plies");
            break 0.0;
        }

        let seat = if side == Side::Second && seats.len() > 1 { 1 } else { 0 };
        let (search, tree) = &mut seats[seat];
        let report = search
            .run(tree, params.search_nodes, |progress| {
                status.update(|s| {
                    s.ply = ply;
                    s.search = Some(progress.clone());
                })
            })
            .await?;
        let action = match tree.choose(params.temperature_at(ply)) {
            Some((action, _)) => action.clone(),
            None => return Err(TrainerError::NoMoves(ply)),
        };
        debug!("ply {ply}: {action} ({:.0} nps)\n{}", report.nps, tree.root().debug(Some(5)));

        let mcts = tree
            .visit_shares()
            .into_iter()
            .map(|(action, share)| (action.to_string(), share))
            .collect();
        record.push_step(action.to_string(), mcts);
        for (_, tree) in seats.iter_mut() {
            tree.push(&action)?;
        }
        record.save(path)?;
    };

    record.finish(result);
    record.save(path)?;
    info!("game finished with {result} after {} plies", record.len());
    Ok(result)
}
