use std::{fs::File, io::BufReader, net::IpAddr, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, model::ModelKind};

// search
pub const PUCT_POLICY_WEIGHT: f32 = 3.0;
pub const PUCT_NOISE_WEIGHT: f32 = 0.05;
pub const PUCT_NOISE_ALPHA: f32 = 0.285;
pub const BATCH_SIZE: usize = 16;
pub const SEARCH_NODES: u32 = 1200;
pub const TEMPERATURE: f32 = 1.0;
pub const TEMPERATURE_DROP: f32 = 1.0;
pub const TEMPERATURE_DROP_PLY: usize = 30;

// worker pool
pub const NUM_WORKERS: usize = 4;
pub const WORKER_HOST: [u8; 4] = [127, 0, 0, 1];
pub const MAX_RETRIES: usize = 10;
pub const RETRY_DELAY: Duration = Duration::from_secs(1);
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

// self-play
pub const SELFPLAY_WINDOW: usize = 64;
pub const SELFPLAY_WINDOW_SHIFT: usize = 16;
pub const MAX_GAME_PLIES: usize = 512;

// train
pub const TRAINING_BATCHES: usize = 64;
pub const TRAINING_BATCH_SIZE: usize = 256;

// arena
pub const ARENA_GAMES: usize = 20;
pub const ARENA_THRESHOLD: f64 = 0.6;

/// Parameters of a single tree search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    pub puct_policy_weight: f32,
    pub puct_noise_weight: f32,
    pub puct_noise_alpha: f32,
    /// Maximum number of rows in a batch.
    pub batch_size: usize,
    /// Root visits to reach before a move is chosen.
    pub search_nodes: u32,
    pub temperature: f32,
    pub temperature_drop: f32,
    /// First ply played with `temperature_drop`.
    pub temperature_drop_ply: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams {
            puct_policy_weight: PUCT_POLICY_WEIGHT,
            puct_noise_weight: PUCT_NOISE_WEIGHT,
            puct_noise_alpha: PUCT_NOISE_ALPHA,
            batch_size: BATCH_SIZE,
            search_nodes: SEARCH_NODES,
            temperature: TEMPERATURE,
            temperature_drop: TEMPERATURE_DROP,
            temperature_drop_ply: TEMPERATURE_DROP_PLY,
        }
    }
}

impl SearchParams {
    /// Temperature used to choose the move at `ply`.
    pub fn temperature_at(&self, ply: usize) -> f32 {
        if ply >= self.temperature_drop_ply {
            self.temperature_drop
        } else {
            self.temperature
        }
    }
}

/// How evaluation workers are started and reached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolParams {
    pub num_workers: usize,
    pub host: IpAddr,
    /// Worker executable. Workers run as tasks in this process when unset.
    pub worker_program: Option<PathBuf>,
}

impl Default for PoolParams {
    fn default() -> Self {
        PoolParams {
            num_workers: NUM_WORKERS,
            host: IpAddr::from(WORKER_HOST),
            worker_program: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerParams {
    pub data_dir: PathBuf,
    pub model_kind: ModelKind,
    pub selfplay_window: usize,
    pub selfplay_window_shift: usize,
    pub arena_games: usize,
    pub arena_threshold: f64,
    pub training_batches: usize,
    pub training_batch_size: usize,
    /// Games reaching this many plies are adjudicated as draws.
    pub max_game_plies: Option<usize>,
}

impl Default for TrainerParams {
    fn default() -> Self {
        TrainerParams {
            data_dir: PathBuf::from("_data"),
            model_kind: ModelKind::default(),
            selfplay_window: SELFPLAY_WINDOW,
            selfplay_window_shift: SELFPLAY_WINDOW_SHIFT,
            arena_games: ARENA_GAMES,
            arena_threshold: ARENA_THRESHOLD,
            training_batches: TRAINING_BATCHES,
            training_batch_size: TRAINING_BATCH_SIZE,
            max_game_plies: Some(MAX_GAME_PLIES),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub search: SearchParams,
    pub pool: PoolParams,
    pub trainer: TrainerParams,
}

impl Config {
    /// Read a configuration file. Missing keys take their default value.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| Err(ConfigError::Invalid(reason.to_string()));
        if self.search.batch_size == 0 {
            return invalid("search.batch_size must be positive");
        }
        if self.search.puct_noise_alpha <= 0.0 {
            return invalid("search.puct_noise_alpha must be positive");
        }
        if !(0.0..=1.0).contains(&self.search.puct_noise_weight) {
            return invalid("search.puct_noise_weight must lie in [0, 1]");
        }
        if self.pool.num_workers == 0 {
            return invalid("pool.num_workers must be positive");
        }
        if self.trainer.selfplay_window == 0 || self.trainer.arena_games == 0 {
            return invalid("trainer window and arena sizes must be positive");
        }
        if self.trainer.selfplay_window_shift > self.trainer.selfplay_window {
            return invalid("trainer.selfplay_window_shift exceeds the window");
        }
        // A zero threshold would accept before any arena game is recorded.
        let threshold = self.trainer.arena_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return invalid("trainer.arena_threshold must lie in (0, 1]");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"search": {"batch_size": 4}}"#).unwrap();
        assert_eq!(config.search.batch_size, 4);
        assert_eq!(config.search.search_nodes, SEARCH_NODES);
        assert_eq!(config.pool, PoolParams::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_oversized_shift() {
        let mut config = Config::default();
        config.trainer.selfplay_window_shift = config.trainer.selfplay_window + 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn arena_threshold_must_be_positive() {
        let mut config = Config::default();
        config.trainer.arena_threshold = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.trainer.arena_threshold = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn temperature_drops() {
        let params = SearchParams {
            temperature: 1.0,
            temperature_drop: 0.25,
            temperature_drop_ply: 2,
            ..Default::default()
        };
        assert_eq!(params.temperature_at(1), 1.0);
        assert_eq!(params.temperature_at(2), 0.25);
    }
}
