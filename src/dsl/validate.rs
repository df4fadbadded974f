//! Static checks over a parsed scenario document. Pure: never touches
//! state, safe to call repeatedly.

use std::collections::HashSet;

use super::{step_kind, trigger_kind, ScenarioDsl};

/// Returns human-readable problems; an empty list means the document is
/// valid.
pub fn validate(dsl: &ScenarioDsl) -> Vec<String> {
    let mut errors = Vec::new();

    if dsl.trigger.kind.is_empty() {
        errors.push("trigger.type is required".to_string());
    } else if !trigger_kind::ALL.contains(&dsl.trigger.kind.as_str()) {
        errors.push(format!("unknown trigger type: {}", dsl.trigger.kind));
    }

    if dsl.steps.is_empty() {
        errors.push("at least one step is required".to_string());
    }

    let mut seen_ids = HashSet::new();
    for step in &dsl.steps {
        if step.id.is_empty() {
            errors.push("step.id is required for all steps".to_string());
        } else if !seen_ids.insert(step.id.as_str()) {
            errors.push(format!("duplicate step id: {}", step.id));
        }

        if !step_kind::ALL.contains(&step.kind.as_str()) {
            errors.push(format!("unknown step type: {} in step {}", step.kind, step.id));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{Params, StepDsl, TriggerDsl};

    fn dsl_with(trigger: &str, steps: Vec<StepDsl>) -> ScenarioDsl {
        ScenarioDsl {
            trigger: TriggerDsl {
                kind: trigger.to_string(),
                value: String::new(),
            },
            variables: Default::default(),
            steps,
        }
    }

    fn step(id: &str, kind: &str) -> StepDsl {
        StepDsl {
            id: id.to_string(),
            kind: kind.to_string(),
            params: Params::new(),
        }
    }

    #[test]
    fn valid_document_has_no_errors() {
        let dsl = dsl_with("manual", vec![step("a", "log"), step("b", "delay")]);
        assert!(validate(&dsl).is_empty());
    }

    #[test]
    fn duplicate_step_ids_are_reported() {
        let dsl = dsl_with("manual", vec![step("s1", "log"), step("s1", "log")]);
        let errors = validate(&dsl);
        assert!(errors.iter().any(|e| e == "duplicate step id: s1"), "{errors:?}");
    }

    #[test]
    fn empty_step_list_is_reported() {
        let errors = validate(&dsl_with("manual", vec![]));
        assert!(errors.iter().any(|e| e == "at least one step is required"));
    }

    #[test]
    fn unknown_trigger_is_reported() {
        let errors = validate(&dsl_with("bogus", vec![step("a", "log")]));
        assert!(errors.iter().any(|e| e == "unknown trigger type: bogus"));
    }

    #[test]
    fn unknown_step_type_and_missing_id_are_reported() {
        let dsl = dsl_with("manual", vec![step("", "teleport")]);
        let errors = validate(&dsl);
        assert!(errors.iter().any(|e| e == "step.id is required for all steps"));
        assert!(errors.iter().any(|e| e == "unknown step type: teleport in step "));
    }
}
