//! Self-Evaluator + Experience Learner (SPEC_FULL.md §4.11).

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

const LEARNING_RATE: f32 = 0.1;
const OFFSET_CLAMP: f32 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfEvaluation {
    pub accuracy: f32,
    pub completeness: f32,
    pub relevance: f32,
    pub clarity: f32,
    pub efficiency: f32,
    pub user_alignment: f32,
    pub overall: f32,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub patterns: Vec<String>,
}

/// Scores a closed task on the six axes named in §4.11. This crate's
/// evaluator is a deterministic heuristic over observable signals (quality
/// report, retry count, step count against plan) rather than a second LLM
/// round-trip, since the quality rubric already consumed one LLM call for
/// the same candidate response.
pub struct SelfEvaluator;

impl SelfEvaluator {
    pub fn evaluate(
        quality_overall: f32,
        retried: bool,
        steps_used: u32,
        max_steps: u32,
        outcome_success: bool,
    ) -> SelfEvaluation {
        let efficiency = if max_steps == 0 {
            1.0
        } else {
            (1.0 - (steps_used as f32 / max_steps as f32) * 0.5).clamp(0.0, 1.0)
        };
        let accuracy = quality_overall;
        let completeness = if outcome_success { quality_overall } else { quality_overall * 0.6 };
        let relevance = quality_overall;
        let clarity = quality_overall;
        let user_alignment = if retried { quality_overall * 0.9 } else { quality_overall };

        let axes = [accuracy, completeness, relevance, clarity, efficiency, user_alignment];
        let overall = axes.iter().sum::<f32>() / axes.len() as f32;

        let mut strengths = Vec::new();
        let mut weaknesses = Vec::new();
        let mut patterns = Vec::new();

        if quality_overall >= 0.8 {
            strengths.push("high quality rubric score".to_string());
            patterns.push("clean single-pass response".to_string());
        }
        if retried {
            weaknesses.push("required a quality retry before passing".to_string());
            patterns.push("needed targeted retry".to_string());
        }
        if steps_used >= max_steps {
            weaknesses.push("exhausted the step budget".to_string());
        }
        if !outcome_success {
            weaknesses.push("task did not complete successfully".to_string());
        }

        SelfEvaluation {
            accuracy,
            completeness,
            relevance,
            clarity,
            efficiency,
            user_alignment,
            overall,
            strengths,
            weaknesses,
            patterns,
        }
    }
}

/// Maintains a moving calibration offset nudged by later user ratings, added
/// to future raw scores before clamping to `[0,1]`.
pub struct AdaptiveEvaluator {
    offset_millis: AtomicU32,
    offset_negative: std::sync::atomic::AtomicBool,
}

impl Default for AdaptiveEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveEvaluator {
    pub fn new() -> Self {
        Self {
            offset_millis: AtomicU32::new(0),
            offset_negative: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn offset(&self) -> f32 {
        let magnitude = self.offset_millis.load(Ordering::SeqCst) as f32 / 1000.0;
        if self.offset_negative.load(Ordering::SeqCst) {
            -magnitude
        } else {
            magnitude
        }
    }

    fn set_offset(&self, value: f32) {
        let clamped = value.clamp(-OFFSET_CLAMP, OFFSET_CLAMP);
        self.offset_negative.store(clamped < 0.0, Ordering::SeqCst);
        self.offset_millis
            .store((clamped.abs() * 1000.0) as u32, Ordering::SeqCst);
    }

    /// `rating` is on a 1..=5 scale; normalized to [0,1] before comparison
    /// with `predicted_score`.
    pub fn record_user_rating(&self, rating: u8, predicted_score: f32) {
        let normalized_rating = (rating as f32 - 1.0) / 4.0;
        let delta = (normalized_rating - predicted_score) * LEARNING_RATE;
        self.set_offset(self.offset() + delta);
    }

    pub fn calibrate(&self, raw_score: f32) -> f32 {
        (raw_score + self.offset()).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_evaluation_flags_retry_as_a_weakness() {
        let eval = SelfEvaluator::evaluate(0.9, true, 2, 5, true);
        assert!(eval.weaknesses.iter().any(|w| w.contains("retry")));
    }

    #[test]
    fn self_evaluation_overall_is_within_unit_interval() {
        let eval = SelfEvaluator::evaluate(0.5, false, 5, 5, true);
        assert!((0.0..=1.0).contains(&eval.overall));
    }

    #[test]
    fn adaptive_offset_starts_at_zero() {
        let evaluator = AdaptiveEvaluator::new();
        assert_eq!(evaluator.calibrate(0.5), 0.5);
    }

    #[test]
    fn rating_above_prediction_nudges_offset_positive() {
        let evaluator = AdaptiveEvaluator::new();
        evaluator.record_user_rating(5, 0.5);
        assert!(evaluator.offset() > 0.0);
    }

    #[test]
    fn offset_is_clamped_to_plus_minus_0_2() {
        let evaluator = AdaptiveEvaluator::new();
        for _ in 0..50 {
            evaluator.record_user_rating(5, 0.0);
        }
        assert!(evaluator.offset() <= OFFSET_CLAMP + f32::EPSILON);
    }

    #[test]
    fn calibrated_score_is_clamped_to_unit_interval() {
        let evaluator = AdaptiveEvaluator::new();
        for _ in 0..50 {
            evaluator.record_user_rating(5, 0.0);
        }
        assert!(evaluator.calibrate(0.95) <= 1.0);
    }
}
