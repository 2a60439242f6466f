/// Outcome of an arena once it is decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
}

/// Running arena score of the candidate. A win scores 1, a draw 0.5.
#[derive(Clone, Debug, PartialEq)]
pub struct ArenaTally {
    total: usize,
    threshold: f64,
    played: usize,
    score: f64,
}

impl ArenaTally {
    pub fn new(total: usize, threshold: f64) -> Self {
        ArenaTally {
            total,
            threshold,
            played: 0,
            score: 0.0,
        }
    }

    pub fn record(&mut self, score: f64) {
        self.played += 1;
        self.score += score;
    }

    pub fn played(&self) -> usize {
        self.played
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn total(&self) -> usize {
        self.total
    }

    fn remaining(&self) -> usize {
        self.total.saturating_sub(self.played)
    }

    /// Decided as soon as the remaining games cannot change the outcome:
    /// rejected if winning all of them stays below the bar, accepted if
    /// losing all of them still clears it.
    pub fn verdict(&self) -> Option<Verdict> {
        let bar = self.total as f64 * self.threshold;
        if self.score + (self.remaining() as f64) < bar {
            Some(Verdict::Reject)
        } else if self.score >= bar {
            Some(Verdict::Accept)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(scores: &[f64]) -> ArenaTally {
        let mut tally = ArenaTally::new(10, 0.6);
        for &score in scores {
            tally.record(score);
        }
        tally
    }

    #[test]
    fn four_losses_keep_playing() {
        assert_eq!(tally(&[0.0; 4]).verdict(), None);
    }

    #[test]
    fn five_losses_reject() {
        assert_eq!(tally(&[0.0; 5]).verdict(), Some(Verdict::Reject));
    }

    #[test]
    fn six_wins_accept() {
        assert_eq!(tally(&[1.0; 5]).verdict(), None);
        assert_eq!(tally(&[1.0; 6]).verdict(), Some(Verdict::Accept));
    }

    #[test]
    fn draws_count_half() {
        let mut t = tally(&[0.5; 8]);
        assert_eq!(t.score(), 4.0);
        assert_eq!(t.verdict(), None);
        t.record(0.5);
        assert_eq!(t.verdict(), Some(Verdict::Reject));

        let t = tally(&[1.0, 1.0, 1.0, 1.0, 1.0, 0.5, 0.5]);
        assert_eq!(t.verdict(), Some(Verdict::Accept));
    }

    #[test]
    fn always_decided_at_the_end() {
        for wins in 0..=10 {
            let scores: Vec<f64> = (0..10).map(|i| if i < wins { 1.0 } else { 0.0 }).collect();
            assert!(tally(&scores).verdict().is_some());
        }
    }
}
