use std::collections::{HashMap, HashSet};

use log::{debug, trace};
use rand::thread_rng;

use super::{Batch, BatchResult, Handle, Node};
use crate::{
    config::SearchParams,
    error::{PositionError, TreeError},
    repr::{Features, Position},
};

enum Leaf<A> {
    Terminal(f32),
    Open(Vec<A>, Vec<f32>, Features),
}

/// Search tree over a position. The position is a scratchpad that is always
/// returned to the root state between calls.
pub struct Tree<P: Position> {
    pub(super) root: Node<P::Action>,
    pub(super) position: P,
    pub(super) params: SearchParams,
    /// Path from the root to every claimed node.
    pub(super) in_flight: HashMap<Handle, Vec<usize>>,
    /// Claims cut off from the tree by `push`.
    pub(super) orphaned: HashSet<Handle>,
    next_handle: Handle,
}

impl<P: Position> Tree<P> {
    pub fn new(position: P, params: SearchParams) -> Self {
        Tree {
            root: Node::root(position.side_to_move()),
            position,
            params,
            in_flight: HashMap::new(),
            orphaned: HashSet::new(),
            next_handle: 0,
        }
    }

    pub fn root(&self) -> &Node<P::Action> {
        &self.root
    }

    pub fn position(&self) -> &P {
        &self.position
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    /// Number of nodes waiting for evaluation.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Collect up to `maxsize` leaves for evaluation. Terminal leaves are
    /// backed up immediately and produce no row. The batch comes back short
    /// or empty once every reachable leaf is claimed.
    pub fn next_batch(&mut self, maxsize: usize) -> Result<Batch<P::Action>, TreeError> {
        let mut batch = Batch::for_position::<P>(maxsize);
        let mut rng = thread_rng();
        for _ in 0..maxsize {
            let path = match self.root.select(&self.params, &mut rng) {
                Some(path) => path,
                None => break,
            };
            let depth = path.len();
            if let Some(value) = self.root.get(&path).terminal() {
                self.root.backprop(&path, value, 1, depth);
                continue;
            }

            let actions = self.root.action_path(&path);
            let pushed = self.replay(&actions)?;
            let leaf = match self.position.terminal_value() {
                Some(value) => Leaf::Terminal(value),
                None => {
                    let (actions, lmm) = self.position.legal_actions();
                    let features = self.position.features();
                    Leaf::Open(actions, lmm, features)
                }
            };
            for _ in 0..pushed {
                self.position.pop();
            }

            match leaf {
                Leaf::Terminal(value) => {
                    trace!("terminal leaf at depth {depth} with value {value}");
                    self.root.get_mut(&path).terminal = Some(value);
                    self.root.backprop(&path, value, 1, depth);
                }
                Leaf::Open(actions, lmm, features) => {
                    let handle = self.next_handle;
                    self.next_handle += 1;
                    batch.add(features, lmm, actions, handle, depth)?;
                    self.root.get_mut(&path).claim = Some(handle);
                    self.in_flight.insert(handle, path);
                }
            }
        }
        Ok(batch)
    }

    /// Push `actions` onto the position. On failure the pushed prefix is
    /// popped again before returning.
    fn replay(&mut self, actions: &[P::Action]) -> Result<usize, PositionError> {
        for (pushed, action) in actions.iter().enumerate() {
            if let Err(err) = self.position.push(action) {
                for _ in 0..pushed {
                    self.position.pop();
                }
                return Err(err);
            }
        }
        Ok(actions.len())
    }

    /// Expand every node of an evaluated batch. Each handle is consumed once.
    /// Rows whose node was cut off by `push` are skipped.
    pub fn expand(&mut self, result: BatchResult<P::Action>) -> Result<(), TreeError> {
        for (row, policy, value) in result.into_rows() {
            if self.orphaned.remove(&row.handle) {
                debug!("skipping orphaned handle {}", row.handle);
                continue;
            }
            let path = self
                .in_flight
                .remove(&row.handle)
                .ok_or(TreeError::StaleHandle(row.handle))?;
            let node = self.root.get(&path);
            if node.claim() != Some(row.handle) {
                return Err(TreeError::StaleHandle(row.handle));
            }
            let turn = node.turn;
            let priors = row
                .actions
                .iter()
                .map(|action| policy[P::canonical_index(action, turn)])
                .collect();
            self.root.expand(&path, row.actions, priors, value, row.depth);
        }
        Ok(())
    }

    /// Release the claims of a batch that will never be evaluated.
    pub fn abandon(&mut self, batch: Batch<P::Action>) {
        for row in batch.into_rows() {
            self.orphaned.remove(&row.handle);
            if let Some(path) = self.in_flight.remove(&row.handle) {
                self.root.get_mut(&path).claim = None;
            }
        }
    }
}
