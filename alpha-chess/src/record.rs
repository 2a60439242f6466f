use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{error::RecordError, repr::Position};

/// One played move with the search's visit shares at the root.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub action: String,
    pub mcts: Vec<(String, f32)>,
}

/// A game as stored on disk. Incomplete games have no result and can be
/// resumed by replaying their steps.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub steps: Vec<Step>,
    /// Outcome for the first player.
    pub result: Option<f32>,
    /// +1 or -1 when the candidate model played the first or second side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_side: Option<f32>,
}

impl GameRecord {
    pub fn with_candidate(candidate_side: f32) -> Self {
        GameRecord {
            candidate_side: Some(candidate_side),
            ..Default::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, RecordError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Write through a temporary file so a crash never leaves half a record.
    pub fn save(&self, path: &Path) -> Result<(), RecordError> {
        let tmp = path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn push_step(&mut self, action: String, mcts: Vec<(String, f32)>) {
        self.steps.push(Step { action, mcts });
    }

    pub fn finish(&mut self, result: f32) {
        self.result = Some(result);
    }

    pub fn is_complete(&self) -> bool {
        self.result.is_some()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn actions<P: Position>(&self) -> Result<Vec<P::Action>, RecordError> {
        self.steps
            .iter()
            .map(|step| Ok(P::parse_action(&step.action)?))
            .collect()
    }

    /// The position reached after every recorded step.
    pub fn replay<P: Position + Default>(&self) -> Result<P, RecordError> {
        let mut position = P::default();
        for action in self.actions::<P>()? {
            position.push(&action)?;
        }
        Ok(position)
    }

    /// Arena score of the candidate: 1 for a win, 0.5 for a draw.
    pub fn candidate_score(&self) -> Option<f64> {
        let result = self.result? as f64;
        let side = self.candidate_side? as f64;
        Some((side * result + 1.0) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::{ChessPosition, Position, Side};

    #[test]
    fn save_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.json");

        let mut record = GameRecord::with_candidate(-1.0);
        record.push_step("e2e4".into(), vec![("e2e4".into(), 1.0)]);
        record.save(&path).unwrap();

        let loaded = GameRecord::load(&path).unwrap();
        assert_eq!(loaded, record);
        assert!(!loaded.is_complete());
        let position: ChessPosition = loaded.replay().unwrap();
        assert_eq!(position.side_to_move(), Side::Second);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn candidate_scores() {
        let mut record = GameRecord::with_candidate(-1.0);
        assert_eq!(record.candidate_score(), None);
        record.finish(-1.0);
        assert_eq!(record.candidate_score(), Some(1.0));
        record.finish(0.0);
        assert_eq!(record.candidate_score(), Some(0.5));
        record.finish(1.0);
        assert_eq!(record.candidate_score(), Some(0.0));
    }

    #[test]
    fn bad_action_is_reported() {
        let mut record = GameRecord::default();
        record.push_step("e2e5".into(), vec![]);
        assert!(matches!(
            record.replay::<ChessPosition>(),
            Err(RecordError::Position(_))
        ));
    }
}
