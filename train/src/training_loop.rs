use std::{fs, marker::PhantomData, path::Path};

use alpha_chess::{
    config::Config,
    coordinator::Search,
    error::ModelError,
    example::{Example, TrainBatch},
    model::{Evaluator, Model},
    record::GameRecord,
    repr::{Position, Shape},
};
use log::{info, warn};
use rand::{thread_rng, Rng};

use crate::{
    disk::DataDir,
    error::TrainerError,
    pit::{ArenaTally, Verdict},
    self_play::{play_game, Players},
    status::{ArenaSummary, Phase, StatusBoard},
};

/// Generation loop: fill the self-play window with the incumbent, train a
/// candidate on it, and promote the candidate if it wins the arena.
pub struct Trainer<P> {
    config: Config,
    data: DataDir,
    status: StatusBoard,
    position: PhantomData<P>,
}

impl<P> Trainer<P>
where
    P: Position + Default + Clone,
{
    pub fn new(config: Config, data: DataDir, status: StatusBoard) -> Self {
        Trainer {
            config,
            data,
            status,
            position: PhantomData,
        }
    }

    pub async fn run(&mut self) -> Result<(), TrainerError> {
        self.recover()?;
        loop {
            self.step().await?;
        }
    }

    /// Bring the data directory into a consistent state after a restart.
    pub fn recover(&mut self) -> Result<(), TrainerError> {
        let incumbent = self.data.incumbent();
        if !incumbent.exists() {
            info!("creating a new {} model", self.config.trainer.model_kind);
            let model = Model::generate(self.config.trainer.model_kind)?;
            save_atomically(&model, &incumbent)?;
        }
        if !self.data.candidate().exists() && self.data.has_arena_records()? {
            info!("completing an interrupted promotion");
            self.finish_promotion()?;
        }
        let generation = self.data.generation()?;
        self.status.update(|s| s.generation = generation);
        Ok(())
    }

    /// One cycle of self-play, training and arena.
    /// Returns `None` if training failed and the cycle has to be repeated.
    pub async fn step(&mut self) -> Result<Option<Verdict>, TrainerError> {
        self.self_play().await?;

        if !self.data.candidate().exists() {
            match self.train_candidate() {
                Ok(()) => {}
                Err(TrainerError::Model(ModelError::InvalidLoss(loss))) => {
                    warn!("discarding candidate with loss {loss}");
                    return Ok(None);
                }
                Err(err) => return Err(err),
            }
        }

        let verdict = self.arena().await?;
        match verdict {
            Verdict::Accept => self.promote()?,
            Verdict::Reject => self.reject()?,
        }
        Ok(Some(verdict))
    }

    async fn self_play(&mut self) -> Result<(), TrainerError> {
        let window = self.config.trainer.selfplay_window;
        if self.data.next_selfplay_slot(window)?.is_none() {
            return Ok(());
        }
        let mut search = self.start_search(&self.data.incumbent()).await?;
        while let Some((slot, partial)) = self.data.next_selfplay_slot(window)? {
            self.status.update(|s| {
                s.phase = Phase::SelfPlay;
                s.game = Some(slot);
            });
            info!("self-play game {slot}/{window}");
            let mut record = partial.unwrap_or_default();
            play_game::<P>(
                Players::Shared(&mut search),
                &mut record,
                &self.data.selfplay_path(slot),
                &self.config.search,
                self.config.trainer.max_game_plies,
                &self.status,
            )
            .await?;
        }
        search.stop().await?;
        Ok(())
    }

    async fn start_search(&self, model: &Path) -> Result<Search, TrainerError> {
        Ok(Search::start(&self.config.pool, self.config.trainer.model_kind, model).await?)
    }

    fn train_candidate(&mut self) -> Result<(), TrainerError> {
        self.status.update(|s| {
            s.phase = Phase::Training;
            s.game = None;
            s.search = None;
        });
        let records = self.data.selfplay_records(self.config.trainer.selfplay_window)?;
        let batches = sample_batches::<P, _>(
            &records,
            self.config.trainer.training_batches,
            self.config.trainer.training_batch_size,
            &mut thread_rng(),
        )?;

        let mut model = Model::load(self.config.trainer.model_kind, &self.data.incumbent())?;
        let (before, after) = fit(&mut model, &batches)?;
        info!("trained candidate on {} batches: loss {before:.4} -> {after:.4}", batches.len());
        self.status.update(|s| s.losses = Some((before, after)));
        save_atomically(&model, &self.data.candidate())
    }

    async fn arena(&mut self) -> Result<Verdict, TrainerError> {
        let games = self.config.trainer.arena_games;
        let mut tally = ArenaTally::new(games, self.config.trainer.arena_threshold);
        for record in self.data.arena_records(games)? {
            if let Some(score) = record.candidate_score() {
                tally.record(score);
            }
        }
        self.publish_arena(&tally);

        if let Some(verdict) = tally.verdict() {
            return Ok(verdict);
        }

        let mut candidate = self.start_search(&self.data.candidate()).await?;
        let mut incumbent = self.start_search(&self.data.incumbent()).await?;
        let verdict = loop {
            if let Some(verdict) = tally.verdict() {
                break verdict;
            }
            let (slot, partial) = match self.data.next_arena_slot(games)? {
                Some(next) => next,
                // Every slot holds a finished game, so the tally is decided.
                None => break tally.verdict().unwrap_or(Verdict::Reject),
            };

            let mut record = partial.unwrap_or_else(|| {
                let side = if thread_rng().gen_bool(0.5) { 1.0 } else { -1.0 };
                GameRecord::with_candidate(side)
            });
            let players = if record.candidate_side == Some(-1.0) {
                Players::Split {
                    first: &mut incumbent,
                    second: &mut candidate,
                }
            } else {
                Players::Split {
                    first: &mut candidate,
                    second: &mut incumbent,
                }
            };
            self.status.update(|s| s.game = Some(slot));
            info!("arena game {slot}/{games}");
            play_game::<P>(
                players,
                &mut record,
                &self.data.arena_path(slot),
                &self.config.search,
                self.config.trainer.max_game_plies,
                &self.status,
            )
            .await?;
            tally.record(record.candidate_score().unwrap_or(0.5));
            self.publish_arena(&tally);
        };

        candidate.stop().await?;
        incumbent.stop().await?;
        info!(
            "arena verdict {verdict:?} with {} from {} games",
            tally.score(),
            tally.played()
        );
        Ok(verdict)
    }

    fn publish_arena(&self, tally: &ArenaTally) {
        let summary = ArenaSummary {
            played: tally.played(),
            total: tally.total(),
            score: tally.score(),
        };
        self.status.update(|s| {
            s.phase = Phase::Arena;
            s.arena = Some(summary);
        });
    }

    /// The rename of the candidate commits the promotion; the remaining
    /// steps are repeated by `recover` if they are interrupted.
    fn promote(&mut self) -> Result<(), TrainerError> {
        self.status.update(|s| s.phase = Phase::Promoting);
        fs::rename(self.data.candidate(), self.data.incumbent())?;
        self.finish_promotion()
    }

    fn finish_promotion(&mut self) -> Result<(), TrainerError> {
        let generation = self.data.generation()?;
        self.data.archive_window(generation)?;
        // A missing archive means the counter was already bumped.
        if self.data.archive(generation).exists() {
            self.data.set_generation(generation + 1)?;
        }
        self.data.clear_arena()?;

        let generation = self.data.generation()?;
        info!("promoted candidate to generation {generation}");
        self.status.update(|s| {
            s.generation = generation;
            s.arena = None;
        });
        Ok(())
    }

    fn reject(&mut self) -> Result<(), TrainerError> {
        self.status.update(|s| s.phase = Phase::Rejecting);
        self.data.clear_arena()?;
        fs::remove_file(self.data.candidate())?;
        self.data.shift_window(
            self.config.trainer.selfplay_window,
            self.config.trainer.selfplay_window_shift,
        )?;
        self.status.update(|s| s.arena = None);
        info!("rejected candidate");
        Ok(())
    }
}

fn save_atomically(model: &Model, path: &Path) -> Result<(), TrainerError> {
    let tmp = path.with_extension("tmp");
    model.save(&tmp)?;
    fs::rename(tmp, path)?;
    Ok(())
}

/// Train `model` on `batches`, failing on a loss that is not a number.
fn fit<E: Evaluator>(model: &mut E, batches: &[TrainBatch]) -> Result<(f32, f32), TrainerError> {
    let (before, after) = model.train(batches)?;
    for loss in [before, after] {
        if !loss.is_finite() {
            return Err(ModelError::InvalidLoss(loss).into());
        }
    }
    Ok((before, after))
}

/// Draw every training row from a random game, then a random ply of that
/// game. Empty games are skipped.
pub fn sample_batches<P, R>(
    records: &[GameRecord],
    count: usize,
    size: usize,
    rng: &mut R,
) -> Result<Vec<TrainBatch>, TrainerError>
where
    P: Position + Default,
    R: Rng + ?Sized,
{
    let games: Vec<&GameRecord> = records.iter().filter(|record| !record.is_empty()).collect();
    if games.is_empty() {
        return Err(TrainerError::EmptyWindow);
    }

    let mut batches = Vec::with_capacity(count);
    for _ in 0..count {
        let mut batch = TrainBatch::new(Shape::of::<P>(), size);
        for _ in 0..size {
            let game = games[rng.gen_range(0..games.len())];
            let ply = rng.gen_range(0..game.len());
            batch.push(Example::from_record::<P>(game, ply)?)?;
        }
        batches.push(batch);
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use alpha_chess::{model::EvalOutput, protocol::EvalRequest, repr::ChessPosition};
    use rand::{rngs::StdRng, SeedableRng};
    use tempfile::TempDir;

    use super::*;

    fn small_config(dir: &TempDir, threshold: f64) -> Config {
        let mut config = Config::default();
        config.search.search_nodes = 8;
        config.search.batch_size = 4;
        config.pool.num_workers = 1;
        config.pool.worker_program = None;
        config.trainer.data_dir = dir.path().to_path_buf();
        config.trainer.selfplay_window = 2;
        config.trainer.selfplay_window_shift = 1;
        config.trainer.arena_games = 2;
        config.trainer.arena_threshold = threshold;
        config.trainer.training_batches = 1;
        config.trainer.training_batch_size = 4;
        config.trainer.max_game_plies = Some(2);
        config
    }

    fn trainer(config: Config) -> Trainer<ChessPosition> {
        let data = DataDir::open(&config.trainer.data_dir).unwrap();
        let (board, _) = StatusBoard::new();
        Trainer::new(config, data, board)
    }

    fn finished(result: f32, candidate_side: Option<f32>) -> GameRecord {
        let mut record = candidate_side.map(GameRecord::with_candidate).unwrap_or_default();
        record.push_step("e2e4".into(), vec![("e2e4".into(), 0.75), ("d2d4".into(), 0.25)]);
        record.push_step("e7e5".into(), vec![("e7e5".into(), 1.0)]);
        record.finish(result);
        record
    }

    fn count_files(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn winning_candidate_is_promoted() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(small_config(&dir, 0.5));
        trainer.recover().unwrap();
        assert!(trainer.data.incumbent().exists());

        // Two drawn arena games score exactly half.
        let verdict = trainer.step().await.unwrap();
        assert_eq!(verdict, Some(Verdict::Accept));
        assert_eq!(trainer.data.generation().unwrap(), 1);
        assert_eq!(count_files(&trainer.data.archive(0)), 2);
        assert!(!trainer.data.candidate().exists());
        assert!(!trainer.data.has_arena_records().unwrap());
        assert!(trainer.data.selfplay_records(2).unwrap().is_empty());
        assert_eq!(trainer.status.current().generation, 1);
    }

    #[tokio::test]
    async fn losing_candidate_is_rejected_early() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(small_config(&dir, 0.8));
        trainer.recover().unwrap();

        // A draw in the first game leaves the candidate unable to reach 1.6.
        let verdict = trainer.step().await.unwrap();
        assert_eq!(verdict, Some(Verdict::Reject));
        assert_eq!(trainer.data.generation().unwrap(), 0);
        assert!(!trainer.data.candidate().exists());
        assert!(!trainer.data.has_arena_records().unwrap());
        assert_eq!(trainer.data.selfplay_records(2).unwrap().len(), 1);
        assert!(!trainer.data.archive(0).exists());
    }

    #[tokio::test]
    async fn decided_arena_resumes_without_playing() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(&dir, 0.8);
        let data = DataDir::open(&config.trainer.data_dir).unwrap();
        finished(0.0, None).save(&data.selfplay_path(0)).unwrap();
        finished(1.0, None).save(&data.selfplay_path(1)).unwrap();
        let model = Model::generate(config.trainer.model_kind).unwrap();
        save_atomically(&model, &data.incumbent()).unwrap();
        save_atomically(&model, &data.candidate()).unwrap();
        // The candidate lost with the first move.
        finished(-1.0, Some(1.0)).save(&data.arena_path(0)).unwrap();

        let mut trainer = trainer(config);
        trainer.recover().unwrap();
        let verdict = trainer.step().await.unwrap();
        assert_eq!(verdict, Some(Verdict::Reject));
        assert!(!trainer.data.candidate().exists());
        assert_eq!(trainer.data.selfplay_records(2).unwrap(), vec![finished(1.0, None)]);
    }

    struct Diverging;

    impl Evaluator for Diverging {
        fn evaluate(&self, _: &EvalRequest) -> Result<EvalOutput, ModelError> {
            unreachable!("training never evaluates through this stub")
        }

        fn train(&mut self, _: &[TrainBatch]) -> Result<(f32, f32), ModelError> {
            Ok((1.0, f32::NAN))
        }

        fn save(&self, _: &Path) -> Result<(), ModelError> {
            unreachable!("a diverged model is never saved")
        }
    }

    #[test]
    fn diverged_training_is_an_invalid_loss() {
        let result = fit(&mut Diverging, &[]);
        assert!(matches!(
            result,
            Err(TrainerError::Model(ModelError::InvalidLoss(loss))) if loss.is_nan()
        ));
    }

    #[tokio::test]
    async fn candidate_with_invalid_loss_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(small_config(&dir, 0.5));
        trainer.recover().unwrap();
        // An outcome this large overflows the squared value error.
        finished(3e38, None).save(&trainer.data.selfplay_path(0)).unwrap();
        finished(3e38, None).save(&trainer.data.selfplay_path(1)).unwrap();

        assert_eq!(trainer.step().await.unwrap(), None);
        assert!(!trainer.data.candidate().exists());
        assert!(!trainer.data.candidate().with_extension("tmp").exists());
        assert!(!trainer.data.has_arena_records().unwrap());
        assert_eq!(trainer.data.generation().unwrap(), 0);
        assert_eq!(trainer.data.selfplay_records(2).unwrap().len(), 2);
    }

    #[test]
    fn recover_completes_interrupted_promotion() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(small_config(&dir, 0.5));
        finished(0.0, None).save(&trainer.data.selfplay_path(0)).unwrap();
        finished(1.0, None).save(&trainer.data.selfplay_path(1)).unwrap();
        finished(1.0, Some(1.0)).save(&trainer.data.arena_path(0)).unwrap();

        trainer.recover().unwrap();
        assert_eq!(trainer.data.generation().unwrap(), 1);
        assert_eq!(count_files(&trainer.data.archive(0)), 2);
        assert!(!trainer.data.has_arena_records().unwrap());

        // A second recovery has nothing left to do.
        trainer.recover().unwrap();
        assert_eq!(trainer.data.generation().unwrap(), 1);
    }

    #[test]
    fn recover_after_generation_bump_only_clears_arena() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(small_config(&dir, 0.5));
        trainer.data.set_generation(1).unwrap();
        finished(1.0, Some(-1.0)).save(&trainer.data.arena_path(0)).unwrap();

        trainer.recover().unwrap();
        assert_eq!(trainer.data.generation().unwrap(), 1);
        assert!(!trainer.data.archive(1).exists());
        assert!(!trainer.data.has_arena_records().unwrap());
    }

    #[test]
    fn batches_draw_from_every_game() {
        let records = vec![finished(1.0, None), finished(-1.0, None)];
        let mut rng = StdRng::seed_from_u64(7);
        let batches = sample_batches::<ChessPosition, _>(&records, 3, 5, &mut rng).unwrap();
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|batch| batch.size() == 5));
    }

    #[test]
    fn short_and_long_games_are_drawn_equally() {
        let mut short = GameRecord::default();
        short.push_step("e2e4".into(), vec![("e2e4".into(), 1.0)]);
        short.finish(1.0);
        let mut long = GameRecord::default();
        for _ in 0..10 {
            for action in ["g1f3", "g8f6", "f3g1", "f6g8"] {
                long.push_step(action.into(), vec![(action.into(), 1.0)]);
            }
        }
        long.finish(0.0);

        let records = vec![short, long];
        let mut rng = StdRng::seed_from_u64(1);
        let batches = sample_batches::<ChessPosition, _>(&records, 10, 100, &mut rng).unwrap();
        // Only rows from the decided game carry a non-zero value.
        let decided = batches
            .iter()
            .flat_map(|batch| &batch.value)
            .filter(|&&value| value != 0.0)
            .count();
        assert!((400..=600).contains(&decided), "{decided} of 1000 rows from the short game");
    }

    #[test]
    fn empty_games_are_skipped() {
        let records = vec![GameRecord::default(), finished(1.0, None)];
        let batches = sample_batches::<ChessPosition, _>(&records, 2, 8, &mut thread_rng()).unwrap();
        assert!(batches.iter().all(|batch| batch.size() == 8));
    }

    #[test]
    fn empty_window_cannot_be_sampled() {
        let records = vec![GameRecord::default()];
        let result = sample_batches::<ChessPosition, _>(&records, 1, 4, &mut thread_rng());
        assert!(matches!(result, Err(TrainerError::EmptyWindow)));
    }
}
