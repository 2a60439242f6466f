use rand::thread_rng;
use rand_distr::{Distribution, WeightedIndex};

use super::{Node, Tree};
use crate::{error::TreeError, repr::Position};

impl<A: PartialEq> Node<A> {
    /// Get the sub-tree for the given action.
    /// This allows tree reuse.
    #[must_use]
    pub fn advance(self, action: &A) -> Option<Node<A>> {
        self.children
            .into_iter()
            .find(|(a, _)| a == action)
            .map(|(_, child)| child)
    }
}

impl<P: Position> Tree<P> {
    /// Sample a root child with weight `n^(1/T) + 1`.
    /// Returns `None` if the root has not been expanded.
    pub fn choose(&self, temperature: f32) -> Option<&(P::Action, Node<P::Action>)> {
        let children = &self.root.children;
        if children.is_empty() {
            return None;
        }
        let weights: Vec<f32> = children
            .iter()
            .map(|(_, child)| (child.n as f32).powf(1.0 / temperature) + 1.0)
            .collect();
        // Tiny temperatures overflow the weights; fall back to the most
        // visited child.
        let distr = if weights.iter().sum::<f32>().is_finite() {
            WeightedIndex::new(&weights).ok()
        } else {
            None
        };
        match distr {
            Some(distr) => children.get(distr.sample(&mut thread_rng())),
            None => children.iter().rev().max_by_key(|(_, child)| child.n),
        }
    }

    /// Visit share of each root child, in child order.
    pub fn visit_shares(&self) -> Vec<(P::Action, f32)> {
        let children = &self.root.children;
        let total: u32 = children.iter().map(|(_, child)| child.n).sum();
        children
            .iter()
            .map(|(action, child)| {
                let share = if total == 0 {
                    1.0 / children.len() as f32
                } else {
                    child.n as f32 / total as f32
                };
                (action.clone(), share)
            })
            .collect()
    }

    /// Play `action`, keeping its subtree as the new root when there is one.
    /// Claims beneath the new root stay valid; all others become orphaned.
    pub fn push(&mut self, action: &P::Action) -> Result<(), TreeError> {
        let index = if self.root.is_expanded() {
            let index = self
                .root
                .children
                .iter()
                .position(|(a, _)| a == action)
                .ok_or_else(|| TreeError::UnknownAction(action.to_string()))?;
            Some(index)
        } else {
            None
        };
        self.position.push(action)?;

        let turn = self.position.side_to_move();
        let root = std::mem::replace(&mut self.root, Node::root(turn));
        if let Some(child) = index.and_then(|_| root.advance(action)) {
            self.root = child;
        }
        for (handle, path) in std::mem::take(&mut self.in_flight) {
            match (index, path.split_first()) {
                (Some(index), Some((&first, rest))) if first == index => {
                    self.in_flight.insert(handle, rest.to_vec());
                }
                _ => {
                    self.orphaned.insert(handle);
                }
            }
        }
        Ok(())
    }
}
