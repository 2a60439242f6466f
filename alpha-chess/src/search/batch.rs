use super::Handle;
use crate::{
    error::BatchError,
    protocol::EvalRequest,
    repr::{Features, Position, Shape},
};

/// Correlation data for one batch row. It never leaves the coordinator.
#[derive(Clone, Debug, PartialEq)]
pub struct Pending<A> {
    pub handle: Handle,
    pub actions: Vec<A>,
    pub depth: usize,
}

/// Positions waiting for evaluation, flattened row by row.
#[derive(Clone, Debug)]
pub struct Batch<A> {
    maxsize: usize,
    shape: Shape,
    headers: Vec<f32>,
    frames: Vec<f32>,
    lmm: Vec<f32>,
    rows: Vec<Pending<A>>,
}

impl<A> Batch<A> {
    pub fn new(maxsize: usize, shape: Shape) -> Self {
        Batch {
            maxsize,
            shape,
            headers: Vec::with_capacity(maxsize * shape.header),
            frames: Vec::with_capacity(maxsize * shape.frames),
            lmm: Vec::with_capacity(maxsize * shape.actions),
            rows: Vec::with_capacity(maxsize),
        }
    }

    pub fn for_position<P: Position<Action = A>>(maxsize: usize) -> Self {
        Batch::new(maxsize, Shape::of::<P>())
    }

    pub fn add(
        &mut self,
        features: Features,
        lmm: Vec<f32>,
        actions: Vec<A>,
        handle: Handle,
        depth: usize,
    ) -> Result<(), BatchError> {
        if self.is_full() {
            return Err(BatchError::Full(self.maxsize));
        }
        check_len("header", self.shape.header, features.header.len())?;
        check_len("frames", self.shape.frames, features.frames.len())?;
        check_len("lmm", self.shape.actions, lmm.len())?;
        self.headers.extend(features.header);
        self.frames.extend(features.frames);
        self.lmm.extend(lmm);
        self.rows.push(Pending { handle, actions, depth });
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.rows.len()
    }

    pub fn maxsize(&self) -> usize {
        self.maxsize
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.maxsize
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn rows(&self) -> &[Pending<A>] {
        &self.rows
    }

    /// The part of the batch that is sent to a worker.
    pub fn to_request(&self, id: u64) -> EvalRequest {
        EvalRequest {
            id,
            shape: self.shape,
            size: self.size(),
            headers: self.headers.clone(),
            frames: self.frames.clone(),
            lmm: self.lmm.clone(),
        }
    }

    /// Pair evaluator output with this batch's rows.
    pub fn make_result(self, policy: Vec<f32>, value: Vec<f32>) -> Result<BatchResult<A>, BatchError> {
        check_len("policy", self.size() * self.shape.actions, policy.len())?;
        check_len("value", self.size(), value.len())?;
        if !value.iter().all(|v| v.is_finite()) {
            return Err(BatchError::NonFinite("value"));
        }
        if !policy.iter().all(|p| p.is_finite()) {
            return Err(BatchError::NonFinite("policy"));
        }
        Ok(BatchResult {
            actions: self.shape.actions,
            policy,
            value,
            rows: self.rows,
        })
    }

    pub fn into_rows(self) -> Vec<Pending<A>> {
        self.rows
    }
}

fn check_len(what: &'static str, expected: usize, got: usize) -> Result<(), BatchError> {
    if expected == got {
        Ok(())
    } else {
        Err(BatchError::Shape { what, expected, got })
    }
}

/// Evaluated batch, ready to be expanded into the tree.
#[derive(Clone, Debug)]
pub struct BatchResult<A> {
    actions: usize,
    policy: Vec<f32>,
    value: Vec<f32>,
    rows: Vec<Pending<A>>,
}

impl<A> BatchResult<A> {
    pub fn size(&self) -> usize {
        self.rows.len()
    }

    pub fn policy(&self, row: usize) -> &[f32] {
        &self.policy[row * self.actions..(row + 1) * self.actions]
    }

    pub fn value(&self, row: usize) -> f32 {
        self.value[row]
    }

    pub fn rows(&self) -> &[Pending<A>] {
        &self.rows
    }

    /// Rows with their policy slice and value.
    pub fn into_rows(self) -> impl Iterator<Item = (Pending<A>, Vec<f32>, f32)> {
        let actions = self.actions;
        let mut policy = self.policy.into_iter();
        self.rows.into_iter().zip(self.value).map(move |(row, value)| {
            let row_policy: Vec<f32> = policy.by_ref().take(actions).collect();
            (row, row_policy, value)
        })
    }
}
