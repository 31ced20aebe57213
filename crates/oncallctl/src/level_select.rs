//! Interactive escalation-level selection.

use dialoguer::Select;
use directory::EscalationPolicy;
use lifecycle::{LevelSelector, LifecycleError};

/// Prompts the operator to pick a level from the policy's chain.
pub struct InteractiveLevelSelector;

impl LevelSelector for InteractiveLevelSelector {
    fn select(&self, policy: &EscalationPolicy) -> Result<u32, LifecycleError> {
        let items: Vec<String> = policy
            .escalation_rules
            .iter()
            .enumerate()
            .map(|(idx, rule)| {
                let members: Vec<&str> = rule
                    .targets
                    .iter()
                    .map(|t| t.summary.as_deref().unwrap_or(t.id.as_str()))
                    .collect();
                let who = if members.is_empty() {
                    "(empty)".to_string()
                } else {
                    members.join(", ")
                };
                format!("Level {}: {who}", idx + 1)
            })
            .collect();

        let chosen = Select::new()
            .with_prompt(format!("Choose a level in {}", policy.name))
            .items(&items)
            .default(0)
            .interact()
            .map_err(|e| LifecycleError::Validation(format!("level selection failed: {e}")))?;

        Ok(u32::try_from(chosen).unwrap_or(0) + 1)
    }
}
