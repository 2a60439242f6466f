use alpha_chess::coordinator::SearchStatus;
use serde::Serialize;
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum Phase {
    #[default]
    Starting,
    SelfPlay,
    Training,
    Arena,
    Promoting,
    Rejecting,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ArenaSummary {
    pub played: usize,
    pub total: usize,
    pub score: f64,
}

/// Snapshot of the trainer, replaced as a whole on every change.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrainerStatus {
    pub generation: u64,
    pub phase: Phase,
    /// Slot of the game being played.
    pub game: Option<usize>,
    pub ply: usize,
    pub search: Option<SearchStatus>,
    pub arena: Option<ArenaSummary>,
    /// Loss before and after the last training run.
    pub losses: Option<(f32, f32)>,
}

/// Publishes trainer snapshots to any number of observers.
pub struct StatusBoard {
    sender: watch::Sender<TrainerStatus>,
}

impl StatusBoard {
    pub fn new() -> (Self, watch::Receiver<TrainerStatus>) {
        let (sender, receiver) = watch::channel(TrainerStatus::default());
        (StatusBoard { sender }, receiver)
    }

    pub fn current(&self) -> TrainerStatus {
        self.sender.borrow().clone()
    }

    /// Publish a copy of the current snapshot with `change` applied.
    pub fn update(&self, change: impl FnOnce(&mut TrainerStatus)) {
        let mut next = self.current();
        change(&mut next);
        self.sender.send_replace(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observers_see_snapshots() {
        let (board, receiver) = StatusBoard::new();
        let before = receiver.borrow().clone();
        board.update(|status| {
            status.phase = Phase::Arena;
            status.generation = 3;
        });
        assert_eq!(before.phase, Phase::Starting);
        assert_eq!(receiver.borrow().phase, Phase::Arena);
        assert_eq!(board.current().generation, 3);
    }

    #[test]
    fn updates_survive_without_observers() {
        let (board, receiver) = StatusBoard::new();
        drop(receiver);
        board.update(|status| status.ply = 7);
        assert_eq!(board.current().ply, 7);
    }
}
