use rand::Rng;

use super::{node::Node, noise::dirichlet_noise};
use crate::config::SearchParams;

impl<A> Node<A> {
    /// Selection priority of this node as seen by its parent.
    pub fn puct(&self, parent_visits: u32, noise: f32, params: &SearchParams) -> f32 {
        // -Q(s, a) + Wp * P'(s, a) + sqrt(N(s)) / (1 + N(s, a))
        // where P' mixes the prior with Dirichlet noise.
        let prior = self.p * (1.0 - params.puct_noise_weight) + noise * params.puct_noise_weight;
        -self.q() + params.puct_policy_weight * prior + (parent_visits as f32).sqrt() / (self.n as f32 + 1.0)
    }

    /// Find an unclaimed node to evaluate, returning the path of child
    /// indices leading to it. Returns `None` when every reachable leaf is
    /// claimed.
    pub fn select<R: Rng + ?Sized>(&self, params: &SearchParams, rng: &mut R) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        if self.select_into(params, rng, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn select_into<R: Rng + ?Sized>(&self, params: &SearchParams, rng: &mut R, path: &mut Vec<usize>) -> bool {
        if self.is_claimed() {
            return false;
        }
        if self.terminal.is_some() || !self.is_expanded() {
            return true;
        }

        let noise = dirichlet_noise(params.puct_noise_alpha, self.children.len(), rng);
        let mut order: Vec<(usize, f32)> = self
            .children
            .iter()
            .zip(noise)
            .enumerate()
            .map(|(i, ((_, child), eta))| (i, child.puct(self.n, eta, params)))
            .collect();
        // Stable sort, so equal priorities keep child order.
        order.sort_by(|(_, a), (_, b)| b.total_cmp(a));

        for (i, _) in order {
            path.push(i);
            if self.children[i].1.select_into(params, rng, path) {
                return true;
            }
            path.pop();
        }
        false
    }
}
