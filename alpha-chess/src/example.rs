use crate::{
    error::{BatchError, RecordError},
    protocol::EvalRequest,
    record::GameRecord,
    repr::{Features, Position, Shape},
};

/// One training row: a position seen in self-play with its search policy
/// and the game outcome for the side to move.
#[derive(Clone, Debug, PartialEq)]
pub struct Example {
    pub features: Features,
    pub lmm: Vec<f32>,
    pub policy: Vec<f32>,
    pub value: f32,
}

impl Example {
    /// Rebuild the example at `ply` of a finished game by replaying it.
    pub fn from_record<P: Position + Default>(record: &GameRecord, ply: usize) -> Result<Self, RecordError> {
        let len = record.steps.len();
        let step = record.steps.get(ply).ok_or(RecordError::Ply { ply, len })?;
        let outcome = record.result.ok_or(RecordError::Unfinished)?;

        let mut position = P::default();
        for action in record.actions::<P>()?.iter().take(ply) {
            position.push(action)?;
        }
        let side = position.side_to_move();
        let (_, lmm) = position.legal_actions();
        let mut policy = vec![0.0; P::ACTION_SPACE];
        for (action, share) in &step.mcts {
            let action = P::parse_action(action)?;
            policy[P::canonical_index(&action, side)] += share;
        }
        Ok(Example {
            features: position.features(),
            lmm,
            policy,
            value: outcome * side.sign(),
        })
    }
}

/// Rows for one optimisation step, laid out like an evaluation request.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainBatch {
    pub input: EvalRequest,
    pub policy: Vec<f32>,
    pub value: Vec<f32>,
}

impl TrainBatch {
    pub fn new(shape: Shape, capacity: usize) -> Self {
        TrainBatch {
            input: EvalRequest {
                id: 0,
                shape,
                size: 0,
                headers: Vec::with_capacity(capacity * shape.header),
                frames: Vec::with_capacity(capacity * shape.frames),
                lmm: Vec::with_capacity(capacity * shape.actions),
            },
            policy: Vec::with_capacity(capacity * shape.actions),
            value: Vec::with_capacity(capacity),
        }
    }

    pub fn size(&self) -> usize {
        self.input.size
    }

    pub fn add(&mut self, features: Features, lmm: Vec<f32>, policy: Vec<f32>, value: f32) -> Result<(), BatchError> {
        let shape = self.input.shape;
        for (what, expected, got) in [
            ("header", shape.header, features.header.len()),
            ("frames", shape.frames, features.frames.len()),
            ("lmm", shape.actions, lmm.len()),
            ("policy", shape.actions, policy.len()),
        ] {
            if expected != got {
                return Err(BatchError::Shape { what, expected, got });
            }
        }
        self.input.headers.extend(features.header);
        self.input.frames.extend(features.frames);
        self.input.lmm.extend(lmm);
        self.input.size += 1;
        self.policy.extend(policy);
        self.value.push(value);
        Ok(())
    }

    pub fn push(&mut self, example: Example) -> Result<(), BatchError> {
        self.add(example.features, example.lmm, example.policy, example.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::{canonical_index, ChessPosition, Side};

    fn record() -> GameRecord {
        let mut record = GameRecord::default();
        record.push_step("e2e4".into(), vec![("e2e4".into(), 0.75), ("d2d4".into(), 0.25)]);
        record.push_step("e7e5".into(), vec![("e7e5".into(), 1.0)]);
        record.finish(-1.0);
        record
    }

    #[test]
    fn targets_follow_the_mover() {
        let record = record();

        let first = Example::from_record::<ChessPosition>(&record, 0).unwrap();
        assert_eq!(first.value, -1.0);
        let e4 = canonical_index(&"e2e4".parse().unwrap(), Side::First);
        assert_eq!(first.policy[e4], 0.75);

        let second = Example::from_record::<ChessPosition>(&record, 1).unwrap();
        assert_eq!(second.value, 1.0);
        let e5 = canonical_index(&"e7e5".parse().unwrap(), Side::Second);
        assert_eq!(second.policy[e5], 1.0);
        assert_eq!(second.lmm[e5], 1.0);
    }

    #[test]
    fn ply_out_of_range() {
        assert!(matches!(
            Example::from_record::<ChessPosition>(&record(), 2),
            Err(RecordError::Ply { ply: 2, len: 2 })
        ));
    }

    #[test]
    fn batch_checks_shapes() {
        let mut batch = TrainBatch::new(Shape::of::<ChessPosition>(), 2);
        let example = Example::from_record::<ChessPosition>(&record(), 0).unwrap();
        batch.push(example.clone()).unwrap();
        assert_eq!(batch.size(), 1);
        assert!(batch.input.validate().is_ok());

        let mut bad = example;
        bad.policy.pop();
        assert!(batch.push(bad).is_err());
        assert_eq!(batch.size(), 1);
    }
}
