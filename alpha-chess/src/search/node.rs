use super::Handle;
use crate::repr::Side;

/// A search tree node. Children own their subtrees; a node is addressed
/// from an ancestor by the path of child indices leading to it.
#[derive(Clone, Debug)]
pub struct Node<A> {
    /// Visit count.
    pub n: u32,
    /// Terminal visit count.
    pub tn: u32,
    /// Prior probability from the parent's evaluation.
    pub p: f32,
    /// Accumulated value from the perspective of the side to move here.
    pub w: f32,
    pub turn: Side,
    /// Deepest expansion observed through this node, relative to the root.
    pub maxdepth: usize,
    pub(crate) claim: Option<Handle>,
    pub(crate) terminal: Option<f32>,
    pub children: Vec<(A, Node<A>)>,
}

impl<A> Node<A> {
    pub fn root(turn: Side) -> Self {
        Node::new(turn, 1.0)
    }

    pub fn new(turn: Side, p: f32) -> Self {
        Node {
            n: 0,
            tn: 0,
            p,
            w: 0.0,
            turn,
            maxdepth: 0,
            claim: None,
            terminal: None,
            children: Vec::new(),
        }
    }

    /// Average value. Unvisited nodes are worth nothing.
    pub fn q(&self) -> f32 {
        if self.n == 0 {
            0.0
        } else {
            self.w / self.n as f32
        }
    }

    pub fn is_expanded(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn is_claimed(&self) -> bool {
        self.claim.is_some()
    }

    pub fn claim(&self) -> Option<Handle> {
        self.claim
    }

    /// Cached outcome if this node was found to end the game.
    pub fn terminal(&self) -> Option<f32> {
        self.terminal
    }

    pub fn get(&self, path: &[usize]) -> &Node<A> {
        path.iter().fold(self, |node, &i| &node.children[i].1)
    }

    pub fn get_mut(&mut self, path: &[usize]) -> &mut Node<A> {
        path.iter().fold(self, |node, &i| &mut node.children[i].1)
    }

    /// Actions leading from this node along `path`.
    pub fn action_path(&self, path: &[usize]) -> Vec<A>
    where
        A: Clone,
    {
        let mut node = self;
        path.iter()
            .map(|&i| {
                let (action, child) = &node.children[i];
                node = child;
                action.clone()
            })
            .collect()
    }

    /// Create the children of the node at `path` and release its claim,
    /// then back up `value` from there.
    pub fn expand(&mut self, path: &[usize], actions: Vec<A>, priors: Vec<f32>, value: f32, depth: usize) {
        let node = self.get_mut(path);
        let turn = !node.turn;
        node.children = actions
            .into_iter()
            .zip(priors)
            .map(|(action, p)| (action, Node::new(turn, p)))
            .collect();
        node.claim = None;
        self.backprop(path, value, 0, depth);
    }

    /// Record `value` at the node reached by `path` and at every node on the
    /// way there. Each step up flips the sign of the value and takes one off
    /// `depth`.
    pub fn backprop(&mut self, path: &[usize], value: f32, terminal: u32, depth: usize) {
        let sign = if path.len() % 2 == 0 { 1.0 } else { -1.0 };
        self.record(sign * value, terminal, depth.saturating_sub(path.len()));
        if let Some((&first, rest)) = path.split_first() {
            self.children[first].1.backprop(rest, value, terminal, depth);
        }
    }

    fn record(&mut self, value: f32, terminal: u32, depth: usize) {
        self.n += 1;
        self.tn += terminal;
        self.w += value;
        self.maxdepth = self.maxdepth.max(depth);
    }
}
