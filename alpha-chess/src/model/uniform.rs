use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use log::debug;
use serde::{Deserialize, Serialize};

use super::{loss, mean_loss, EvalOutput, Evaluator};
use crate::{error::ModelError, example::TrainBatch, protocol::EvalRequest};

/// Spreads the policy evenly over the legal actions and values every
/// position at zero. Training only counts the batches it has seen.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UniformModel {
    pub trained_batches: u64,
}

impl UniformModel {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

impl Evaluator for UniformModel {
    fn evaluate(&self, request: &EvalRequest) -> Result<EvalOutput, ModelError> {
        let actions = request.shape.actions;
        let mut policy = Vec::with_capacity(request.size * actions);
        for row in 0..request.size {
            let mask = request.lmm(row);
            let legal = mask.iter().filter(|&&m| m > 0.0).count();
            if legal == 0 {
                policy.extend(std::iter::repeat(1.0 / actions as f32).take(actions));
            } else {
                policy.extend(mask.iter().map(|&m| if m > 0.0 { 1.0 / legal as f32 } else { 0.0 }));
            }
        }
        Ok(EvalOutput {
            policy,
            value: vec![0.0; request.size],
        })
    }

    fn train(&mut self, batches: &[TrainBatch]) -> Result<(f32, f32), ModelError> {
        let losses = batches
            .iter()
            .map(|batch| Ok(loss(&self.evaluate(&batch.input)?, batch)))
            .collect::<Result<Vec<_>, ModelError>>()?;
        let before = mean_loss(&losses)?;
        self.trained_batches += batches.len() as u64;
        debug!("uniform model has seen {} batches", self.trained_batches);
        // Nothing to fit, so the loss cannot move.
        Ok((before, before))
    }

    fn save(&self, path: &Path) -> Result<(), ModelError> {
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        example::TrainBatch,
        repr::{ChessPosition, Position, Shape},
    };

    fn request(position: &ChessPosition) -> EvalRequest {
        let features = position.features();
        let (_, lmm) = position.legal_actions();
        EvalRequest {
            id: 0,
            shape: Shape::of::<ChessPosition>(),
            size: 1,
            headers: features.header,
            frames: features.frames,
            lmm,
        }
    }

    #[test]
    fn policy_is_uniform_over_legal_moves() {
        let output = UniformModel::default()
            .evaluate(&request(&ChessPosition::default()))
            .unwrap();
        assert_eq!(output.value, vec![0.0]);
        assert_eq!(output.policy.iter().filter(|&&p| p > 0.0).count(), 20);
        assert!((output.policy.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn training_reports_loss_and_persists() {
        let position = ChessPosition::default();
        let mut batch = TrainBatch::new(Shape::of::<ChessPosition>(), 1);
        let (_, lmm) = position.legal_actions();
        let mut target = vec![0.0; lmm.len()];
        let index = lmm.iter().position(|&m| m > 0.0).unwrap();
        target[index] = 1.0;
        batch.add(position.features(), lmm, target, 1.0).unwrap();

        let mut model = UniformModel::default();
        let (before, after) = model.train(&[batch]).unwrap();
        // -ln(1/20) for the policy plus 1 for the value.
        assert!((before - (20f32.ln() + 1.0)).abs() < 1e-3);
        assert_eq!(before, after);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        model.save(&path).unwrap();
        assert_eq!(UniformModel::load(&path).unwrap().trained_batches, 1);
    }
}
