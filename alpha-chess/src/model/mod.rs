use std::{fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{error::ModelError, example::TrainBatch, protocol::EvalRequest};

#[cfg(feature = "torch")]
pub mod network;
pub mod uniform;

pub use uniform::UniformModel;

/// Added to predicted probabilities before taking logarithms.
pub const POLICY_EPSILON: f32 = 1e-6;

/// Flattened evaluator output for a batch.
#[derive(Clone, Debug, PartialEq)]
pub struct EvalOutput {
    pub policy: Vec<f32>,
    pub value: Vec<f32>,
}

pub trait Evaluator {
    /// Policy and value for every row of `request`.
    fn evaluate(&self, request: &EvalRequest) -> Result<EvalOutput, ModelError>;

    /// Fit the evaluator to `batches`.
    /// Returns the mean loss before and after training.
    fn train(&mut self, batches: &[TrainBatch]) -> Result<(f32, f32), ModelError>;

    fn save(&self, path: &Path) -> Result<(), ModelError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Legal moves equally likely, every position even.
    #[default]
    Uniform,
    /// Neural network, needs the `torch` feature.
    Torch,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Uniform => write!(f, "uniform"),
            ModelKind::Torch => write!(f, "torch"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniform" => Ok(ModelKind::Uniform),
            "torch" => Ok(ModelKind::Torch),
            _ => Err(format!("unknown model kind {s:?}")),
        }
    }
}

/// Any evaluator this build supports.
pub enum Model {
    Uniform(UniformModel),
    #[cfg(feature = "torch")]
    Torch(network::TorchModel),
}

impl Model {
    /// A freshly initialized model.
    pub fn generate(kind: ModelKind) -> Result<Self, ModelError> {
        match kind {
            ModelKind::Uniform => Ok(Model::Uniform(UniformModel::default())),
            #[cfg(feature = "torch")]
            ModelKind::Torch => Ok(Model::Torch(network::TorchModel::default())),
            #[cfg(not(feature = "torch"))]
            ModelKind::Torch => Err(ModelError::Unsupported(kind.to_string())),
        }
    }

    pub fn load(kind: ModelKind, path: &Path) -> Result<Self, ModelError> {
        match kind {
            ModelKind::Uniform => Ok(Model::Uniform(UniformModel::load(path)?)),
            #[cfg(feature = "torch")]
            ModelKind::Torch => Ok(Model::Torch(network::TorchModel::load(path)?)),
            #[cfg(not(feature = "torch"))]
            ModelKind::Torch => Err(ModelError::Unsupported(kind.to_string())),
        }
    }
}

impl Evaluator for Model {
    fn evaluate(&self, request: &EvalRequest) -> Result<EvalOutput, ModelError> {
        match self {
            Model::Uniform(model) => model.evaluate(request),
            #[cfg(feature = "torch")]
            Model::Torch(model) => model.evaluate(request),
        }
    }

    fn train(&mut self, batches: &[TrainBatch]) -> Result<(f32, f32), ModelError> {
        match self {
            Model::Uniform(model) => model.train(batches),
            #[cfg(feature = "torch")]
            Model::Torch(model) => model.train(batches),
        }
    }

    fn save(&self, path: &Path) -> Result<(), ModelError> {
        match self {
            Model::Uniform(model) => model.save(path),
            #[cfg(feature = "torch")]
            Model::Torch(model) => model.save(path),
        }
    }
}

/// Policy cross-entropy plus value squared error, averaged over the rows of
/// `batch`.
pub fn loss(output: &EvalOutput, batch: &TrainBatch) -> f32 {
    let size = batch.input.size.max(1) as f32;
    let policy_loss: f32 = output
        .policy
        .iter()
        .zip(&batch.policy)
        .map(|(predicted, target)| -target * (predicted + POLICY_EPSILON).ln())
        .sum();
    let value_loss: f32 = output
        .value
        .iter()
        .zip(&batch.value)
        .map(|(predicted, target)| (target - predicted).powi(2))
        .sum();
    (policy_loss + value_loss) / size
}

/// Mean of per-batch losses, rejecting anything that is not a number.
pub fn mean_loss(losses: &[f32]) -> Result<f32, ModelError> {
    let mean = losses.iter().sum::<f32>() / losses.len().max(1) as f32;
    if mean.is_finite() {
        Ok(mean)
    } else {
        Err(ModelError::InvalidLoss(mean))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_loss_is_rejected() {
        assert_eq!(mean_loss(&[1.0, 3.0]).unwrap(), 2.0);
        assert!(matches!(mean_loss(&[1.0, f32::NAN]), Err(ModelError::InvalidLoss(_))));
        assert!(matches!(mean_loss(&[f32::INFINITY]), Err(ModelError::InvalidLoss(_))));
    }

    #[test]
    fn kind_names() {
        for kind in [ModelKind::Uniform, ModelKind::Torch] {
            assert_eq!(kind.to_string().parse::<ModelKind>(), Ok(kind));
        }
        assert!("resnet".parse::<ModelKind>().is_err());
    }

    #[cfg(not(feature = "torch"))]
    #[test]
    fn torch_needs_the_feature() {
        assert!(matches!(Model::generate(ModelKind::Torch), Err(ModelError::Unsupported(_))));
    }
}
