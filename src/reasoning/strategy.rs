//! Strategy Adapter (SPEC_FULL.md §4.7).

use serde::{Deserialize, Serialize};

use crate::types::{Category, Complexity, ExecutionMode};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub mode: ExecutionMode,
    pub primary_agent: String,
    pub supporting_agents: Vec<String>,
    pub skip_agents: Vec<String>,
    pub decompose_task: bool,
    pub max_steps: u32,
    pub require_validation: bool,
    pub apply_patterns: Vec<String>,
    pub avoid_patterns: Vec<String>,
    pub reason: String,
    pub confidence: f32,
}

/// An experience-learner recommendation carried forward from past episodes
/// in the same category (SPEC_FULL.md §4.11). When its confidence exceeds
/// 0.5, it overrides the classifier's suggested primary/supporting agents.
#[derive(Debug, Clone)]
pub struct ExperienceRecommendation {
    pub primary_agent: String,
    pub supporting_agents: Vec<String>,
    pub confidence: f32,
    pub apply_patterns: Vec<String>,
    pub avoid_patterns: Vec<String>,
}

pub struct StrategyAdapter;

impl StrategyAdapter {
    pub fn plan(
        category: Category,
        complexity: Complexity,
        suggested_primary: &str,
        suggested_supporting: &[String],
        experience: Option<&ExperienceRecommendation>,
        confidence: f32,
    ) -> ExecutionPlan {
        let mode = if category == Category::SimpleChat {
            ExecutionMode::Fast
        } else {
            match complexity {
                Complexity::High => ExecutionMode::Thorough,
                Complexity::Low => ExecutionMode::Fast,
                Complexity::Medium => ExecutionMode::Standard,
            }
        };

        let base_max_steps: i32 = match mode {
            ExecutionMode::Fast => 2,
            ExecutionMode::Standard => 5,
            ExecutionMode::Thorough => 10,
            ExecutionMode::Cautious => 8,
        };
        let complexity_adjust: i32 = match complexity {
            Complexity::Low => -2,
            Complexity::Medium => 0,
            Complexity::High => 2,
        };
        let max_steps = (base_max_steps + complexity_adjust).clamp(1, 20) as u32;

        let (mut primary_agent, mut supporting_agents) =
            (suggested_primary.to_string(), suggested_supporting.to_vec());
        let mut apply_patterns = Vec::new();
        let mut avoid_patterns = Vec::new();
        let mut reason = format!("classifier suggested {suggested_primary} for {category}");

        if let Some(exp) = experience {
            if exp.confidence > 0.5 {
                primary_agent = exp.primary_agent.clone();
                supporting_agents = exp.supporting_agents.clone();
                apply_patterns = exp.apply_patterns.clone();
                avoid_patterns = exp.avoid_patterns.clone();
                reason = format!(
                    "experience recommendation (confidence {:.2}) overrode classifier suggestion",
                    exp.confidence
                );
            }
        }

        let mut skip_agents = Vec::new();
        if matches!(mode, ExecutionMode::Fast) {
            skip_agents.push("thinking".to_string());
            skip_agents.push("validation".to_string());
        }
        if matches!(category, Category::SimpleChat | Category::Calculation) {
            skip_agents.push("rag".to_string());
        }
        skip_agents.sort();
        skip_agents.dedup();

        ExecutionPlan {
            mode,
            primary_agent,
            supporting_agents,
            skip_agents,
            decompose_task: matches!(category, Category::MultiStep) || complexity == Complexity::High,
            max_steps,
            require_validation: !matches!(mode, ExecutionMode::Fast),
            apply_patterns,
            avoid_patterns,
            reason,
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_chat_is_always_fast() {
        let plan = StrategyAdapter::plan(Category::SimpleChat, Complexity::High, "casual", &[], None, 0.9);
        assert_eq!(plan.mode, ExecutionMode::Fast);
    }

    #[test]
    fn high_complexity_is_thorough_outside_simple_chat() {
        let plan = StrategyAdapter::plan(Category::Analysis, Complexity::High, "thinking", &[], None, 0.9);
        assert_eq!(plan.mode, ExecutionMode::Thorough);
        assert_eq!(plan.max_steps, 12);
    }

    #[test]
    fn fast_mode_skips_thinking_and_validation() {
        let plan = StrategyAdapter::plan(Category::SimpleChat, Complexity::Low, "casual", &[], None, 0.9);
        assert!(plan.skip_agents.contains(&"thinking".to_string()));
        assert!(plan.skip_agents.contains(&"validation".to_string()));
    }

    #[test]
    fn rag_skipped_for_calculation() {
        let plan = StrategyAdapter::plan(Category::Calculation, Complexity::Low, "calculation", &[], None, 0.9);
        assert!(plan.skip_agents.contains(&"rag".to_string()));
    }

    #[test]
    fn high_confidence_experience_overrides_primary_agent() {
        let exp = ExperienceRecommendation {
            primary_agent: "rag".into(),
            supporting_agents: vec!["validation".into()],
            confidence: 0.8,
            apply_patterns: vec!["cite sources".into()],
            avoid_patterns: vec![],
        };
        let plan = StrategyAdapter::plan(Category::Analysis, Complexity::Medium, "thinking", &[], Some(&exp), 0.7);
        assert_eq!(plan.primary_agent, "rag");
        assert_eq!(plan.apply_patterns, vec!["cite sources".to_string()]);
    }

    #[test]
    fn low_confidence_experience_does_not_override() {
        let exp = ExperienceRecommendation {
            primary_agent: "rag".into(),
            supporting_agents: vec![],
            confidence: 0.3,
            apply_patterns: vec![],
            avoid_patterns: vec![],
        };
        let plan = StrategyAdapter::plan(Category::Analysis, Complexity::Medium, "thinking", &[], Some(&exp), 0.7);
        assert_eq!(plan.primary_agent, "thinking");
    }
}
