use std::fmt::Display;

use serde::Serialize;

use super::{Node, Tree};
use crate::repr::Position;

/// Snapshot of a tree for progress reports.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TreeStatus {
    pub visits: u32,
    pub terminal_visits: u32,
    /// Root value for the side to move.
    pub value: f32,
    pub maxdepth: usize,
    pub height: usize,
    pub in_flight: usize,
    pub pv: Vec<String>,
}

impl<A> Node<A> {
    /// Principal variation: repeatedly follow the most visited child.
    /// Ties go to the earliest child.
    pub fn pv(&self) -> Vec<&A> {
        let mut line = Vec::new();
        let mut node = self;
        while let Some((action, child)) = node.best_child() {
            line.push(action);
            node = child;
        }
        line
    }

    fn best_child(&self) -> Option<&(A, Node<A>)> {
        self.children
            .iter()
            .rev()
            .max_by_key(|(_, child)| child.n)
    }

    /// Length of the longest path below this node.
    pub fn height(&self) -> usize {
        self.children
            .iter()
            .map(|(_, child)| child.height() + 1)
            .max()
            .unwrap_or(0)
    }
}

impl<A: Display> Node<A> {
    pub fn debug(&self, limit: Option<usize>) -> String {
        const MAX_CONTINUATION_LEN: usize = 8;
        let mut children: Vec<_> = self.children.iter().collect();
        children.sort_by_key(|(_, node)| node.n);
        children.reverse();
        let rows: String = children
            .iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|(action, node)| {
                let continuation = node
                    .pv()
                    .into_iter()
                    .take(MAX_CONTINUATION_LEN)
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                format!(
                    "{: <8} {: >8} {: >8.4} {: >8.4} | {}\n",
                    action.to_string(),
                    node.n,
                    -node.q(),
                    node.p,
                    continuation,
                )
            })
            .collect();
        format!("action     visits    value    prior | continuation\n{rows}")
    }
}

impl<P: Position> Tree<P> {
    pub fn status(&self) -> TreeStatus {
        TreeStatus {
            visits: self.root.n,
            terminal_visits: self.root.tn,
            value: self.root.q(),
            maxdepth: self.root.maxdepth,
            height: self.root.height(),
            in_flight: self.in_flight(),
            pv: self.root.pv().into_iter().map(|a| a.to_string()).collect(),
        }
    }
}
