use std::path::Path;

use log::debug;
use tch::{
    nn::{self, Adam, Module, OptimizerConfig, VarStore},
    Device,
    Kind,
    Tensor,
};

use super::{mean_loss, EvalOutput, Evaluator};
use crate::{
    error::ModelError,
    example::TrainBatch,
    protocol::EvalRequest,
    repr::{ACTION_SPACE, FRAMES_SIZE, HEADER_SIZE},
    DEVICE,
};

const HIDDEN: i64 = 512;
const LEARNING_RATE: f64 = 1e-4;
const WEIGHT_DECAY: f64 = 1e-4;
const EPOCHS: usize = 4;
// Logit offset for illegal actions.
const MASK_PENALTY: f64 = 1e4;

const INPUT: i64 = (HEADER_SIZE + FRAMES_SIZE) as i64;

/// Fully connected policy and value network.
pub struct TorchModel {
    vs: VarStore,
    trunk: nn::Sequential,
    policy: nn::Linear,
    value: nn::Linear,
}

impl Default for TorchModel {
    fn default() -> Self {
        let vs = VarStore::new(*DEVICE);
        let root = vs.root();
        let trunk = nn::seq()
            .add(nn::linear(&root / "input", INPUT, HIDDEN, Default::default()))
            .add_fn(|x| x.relu())
            .add(nn::linear(&root / "hidden", HIDDEN, HIDDEN, Default::default()))
            .add_fn(|x| x.relu());
        let policy = nn::linear(&root / "policy", HIDDEN, ACTION_SPACE as i64, Default::default());
        let value = nn::linear(&root / "value", HIDDEN, 1, Default::default());
        TorchModel {
            vs,
            trunk,
            policy,
            value,
        }
    }
}

impl TorchModel {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let mut model = TorchModel::default();
        model.vs.load(path)?;
        Ok(model)
    }

    fn inputs(request: &EvalRequest) -> (Tensor, Tensor) {
        let size = request.size as i64;
        let headers = Tensor::of_slice(&request.headers).view([size, HEADER_SIZE as i64]);
        let frames = Tensor::of_slice(&request.frames).view([size, FRAMES_SIZE as i64]);
        let input = Tensor::cat(&[headers, frames], 1).to_device(*DEVICE);
        let lmm = Tensor::of_slice(&request.lmm)
            .view([size, ACTION_SPACE as i64])
            .to_device(*DEVICE);
        (input, lmm)
    }

    /// Log-probabilities over legal actions and values in [-1, 1].
    fn forward(&self, input: &Tensor, lmm: &Tensor) -> (Tensor, Tensor) {
        let hidden = self.trunk.forward(input);
        let logits = hidden.apply(&self.policy) + (lmm - 1.0) * MASK_PENALTY;
        let policy = logits.log_softmax(1, Kind::Float);
        let value = hidden.apply(&self.value).tanh().view([-1]);
        (policy, value)
    }

    fn loss(&self, batch: &TrainBatch) -> Tensor {
        let (input, lmm) = Self::inputs(&batch.input);
        let (policy, value) = self.forward(&input, &lmm);
        let size = batch.size().max(1) as f64;
        let p = Tensor::of_slice(&batch.policy)
            .view(policy.size().as_slice())
            .to_device(*DEVICE);
        let z = Tensor::of_slice(&batch.value).to_device(*DEVICE);
        let loss_p = -(p * policy).sum(Kind::Float) / size;
        let loss_z = (z - value).square().sum(Kind::Float) / size;
        loss_p + loss_z
    }

    fn mean_loss(&self, batches: &[TrainBatch]) -> Result<f32, ModelError> {
        let losses: Vec<f32> = tch::no_grad(|| {
            batches
                .iter()
                .map(|batch| f64::from(&self.loss(batch)) as f32)
                .collect()
        });
        mean_loss(&losses)
    }
}

impl Evaluator for TorchModel {
    fn evaluate(&self, request: &EvalRequest) -> Result<EvalOutput, ModelError> {
        let (input, lmm) = Self::inputs(request);
        let (policy, value) = tch::no_grad(|| self.forward(&input, &lmm));
        let policy: Vec<f32> = policy.exp().view([-1]).to_device(Device::Cpu).into();
        let value: Vec<f32> = value.to_device(Device::Cpu).into();
        Ok(EvalOutput { policy, value })
    }

    fn train(&mut self, batches: &[TrainBatch]) -> Result<(f32, f32), ModelError> {
        let before = self.mean_loss(batches)?;
        let mut opt = Adam {
            wd: WEIGHT_DECAY,
            ..Default::default()
        }
        .build(&self.vs, LEARNING_RATE)?;
        for epoch in 0..EPOCHS {
            for batch in batches {
                let loss = self.loss(batch);
                opt.backward_step(&loss);
            }
            debug!("finished epoch {epoch}");
        }
        let after = self.mean_loss(batches)?;
        Ok((before, after))
    }

    fn save(&self, path: &Path) -> Result<(), ModelError> {
        self.vs.save(path)?;
        Ok(())
    }
}
