//! Reasoning subsystem: Classifier (§4.6), Strategy Adapter (§4.7), ReAct
//! Engine (§4.9), Quality Controller (§4.10), Self-Evaluator + Experience
//! Learner (§4.11).

pub mod classifier;
pub mod metacognition;
pub mod quality;
pub mod react_loop;
pub mod strategy;

pub use classifier::{Classification, Classifier};
pub use metacognition::{AdaptiveEvaluator, SelfEvaluation, SelfEvaluator};
pub use quality::{QualityController, QualityReport};
pub use react_loop::{ReactEngine, ReactOutcome};
pub use strategy::{ExecutionPlan, ExperienceRecommendation, StrategyAdapter};
