use std::collections::HashMap;

use crate::common::config::RecognitionConfig;
use crate::core::descriptor::Descriptor;

/// Count of probe descriptors whose nearest neighbour in `batch` passes the
/// ratio test against the second nearest. Batches with fewer than two
/// descriptors cannot be ratio-tested and score 0.
pub fn good_matches(probe: &[Descriptor], batch: &[Descriptor], ratio: f32) -> u32 {
    if batch.len() < 2 {
        return 0;
    }

    let mut good = 0;
    for query in probe {
        let mut best = u32::MAX;
        let mut second = u32::MAX;
        for candidate in batch {
            let d = query.hamming(candidate);
            if d < best {
                second = best;
                best = d;
            } else if d < second {
                second = d;
            }
        }
        if (best as f32) < ratio * second as f32 {
            good += 1;
        }
    }
    good
}

/// Sum of good matches over every stored batch of one employee.
pub fn employee_score<'a>(
    probe: &[Descriptor],
    batches: impl IntoIterator<Item = &'a Vec<Descriptor>>,
    ratio: f32,
) -> u32 {
    batches
        .into_iter()
        .map(|batch| good_matches(probe, batch, ratio))
        .sum()
}

/// Best and runner-up scores over a population of employees.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scoreboard {
    pub best: Option<(String, u32)>,
    pub runner_up: u32,
}

impl Scoreboard {
    pub fn from_scores(scores: &HashMap<String, u32>) -> Self {
        let mut board = Scoreboard::default();
        // Sorted so ties resolve the same way on every run.
        let mut entries: Vec<_> = scores.iter().collect();
        entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        let mut iter = entries.into_iter();
        if let Some((id, &score)) = iter.next() {
            board.best = Some((id.clone(), score));
        }
        if let Some((_, &score)) = iter.next() {
            board.runner_up = score;
        }
        board
    }
}

pub fn confidence(best: u32, runner_up: u32) -> f32 {
    let denom = (best + runner_up).max(1) as f32;
    (100.0 * best as f32 / denom).min(100.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    /// Set only when the match clears both the score and margin thresholds.
    pub employee_id: Option<String>,
    pub confidence: f32,
    pub best_score: u32,
    pub runner_up: u32,
}

impl MatchOutcome {
    pub fn none() -> Self {
        Self {
            employee_id: None,
            confidence: 0.0,
            best_score: 0,
            runner_up: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MatchPolicy {
    pub ratio: f32,
    pub min_match: u32,
    pub min_margin: u32,
}

impl MatchPolicy {
    pub fn from_config(config: &RecognitionConfig) -> Self {
        Self {
            ratio: config.recognition_ratio_thresh,
            min_match: config.recognition_min_match,
            min_margin: config.recognition_min_margin,
        }
    }

    pub fn accepts(&self, best: u32, runner_up: u32) -> bool {
        best >= self.min_match && best.saturating_sub(runner_up) >= self.min_margin
    }

    /// Open-set identification against every enrolled employee.
    pub fn identify(&self, scores: &HashMap<String, u32>) -> MatchOutcome {
        let board = Scoreboard::from_scores(scores);
        let Some((id, best)) = board.best else {
            return MatchOutcome::none();
        };
        let accepted = self.accepts(best, board.runner_up);
        MatchOutcome {
            employee_id: accepted.then_some(id),
            confidence: confidence(best, board.runner_up),
            best_score: best,
            runner_up: board.runner_up,
        }
    }

    /// Verification of a known employee: the target's score against the best
    /// score of anyone else.
    pub fn verify(&self, target: &str, scores: &HashMap<String, u32>) -> MatchOutcome {
        let target_score = scores.get(target).copied().unwrap_or(0);
        let best_other = scores
            .iter()
            .filter(|(id, _)| id.as_str() != target)
            .map(|(_, &s)| s)
            .max()
            .unwrap_or(0);
        let accepted = self.accepts(target_score, best_other);
        MatchOutcome {
            employee_id: accepted.then(|| target.to_string()),
            confidence: confidence(target_score, best_other),
            best_score: target_score,
            runner_up: best_other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> MatchPolicy {
        MatchPolicy { ratio: 0.75, min_match: 65, min_margin: 10 }
    }

    fn scores(entries: &[(&str, u32)]) -> HashMap<String, u32> {
        entries.iter().map(|(id, s)| (id.to_string(), *s)).collect()
    }

    fn descriptor(fill: u8) -> Descriptor {
        Descriptor([fill; 32])
    }

    #[test]
    fn test_ratio_test() {
        let probe = [descriptor(0x00)];
        // nearest 0 bits away, second 256 bits away
        let batch = vec![descriptor(0x00), descriptor(0xFF)];
        assert_eq!(good_matches(&probe, &batch, 0.75), 1);

        // two equally near neighbours fail the ratio test
        let ambiguous = vec![descriptor(0x01), descriptor(0x01)];
        assert_eq!(good_matches(&probe, &ambiguous, 0.75), 0);

        assert_eq!(good_matches(&probe, &[descriptor(0x00)], 0.75), 0);
    }

    #[test]
    fn test_employee_score_sums_batches() {
        let probe = [descriptor(0x00), descriptor(0x0F)];
        let batches = vec![
            vec![descriptor(0x00), descriptor(0xFF)],
            vec![descriptor(0x0F), descriptor(0xF0)],
        ];
        assert_eq!(employee_score(&probe, &batches, 0.75), 2);
    }

    #[test]
    fn test_confidence_bounds() {
        assert_eq!(confidence(0, 0), 0.0);
        assert_eq!(confidence(80, 0), 100.0);
        assert_eq!(confidence(60, 20), 75.0);
        for best in [0u32, 1, 5, 70, 500] {
            for runner in [0u32, 1, 5, 70, 500] {
                let c = confidence(best, runner);
                assert!((0.0..=100.0).contains(&c));
            }
        }
    }

    #[test]
    fn test_identify_requires_score_and_margin() {
        let p = policy();
        assert_eq!(p.identify(&scores(&[("1", 80), ("2", 20)])).employee_id.as_deref(), Some("1"));
        // below min_match
        assert!(p.identify(&scores(&[("1", 64)])).employee_id.is_none());
        // margin too thin
        let outcome = p.identify(&scores(&[("1", 80), ("2", 75)]));
        assert!(outcome.employee_id.is_none());
        assert!(outcome.confidence > 0.0);
        assert_eq!(p.identify(&HashMap::new()), MatchOutcome::none());
    }

    #[test]
    fn test_raising_thresholds_never_accepts_more() {
        let board = scores(&[("1", 90), ("2", 70)]);
        let loose = MatchPolicy { ratio: 0.75, min_match: 50, min_margin: 5 };
        let strict = MatchPolicy { ratio: 0.75, min_match: 95, min_margin: 25 };
        assert!(loose.identify(&board).employee_id.is_some());
        assert!(strict.identify(&board).employee_id.is_none());
    }

    #[test]
    fn test_verify_attributes_only_target() {
        let p = policy();
        let board = scores(&[("1", 100), ("2", 70)]);
        assert_eq!(p.verify("1", &board).employee_id.as_deref(), Some("1"));
        // the target is the runner-up here, so it cannot clear the margin
        assert!(p.verify("2", &board).employee_id.is_none());
        assert!(p.verify("9", &board).employee_id.is_none());
    }
}
