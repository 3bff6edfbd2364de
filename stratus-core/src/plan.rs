//! Plan - Collection of Effects
//!
//! A Plan is an ordered list of Effects to be executed.
//! No side effects occur until the Plan is applied.

use std::fmt;

use crate::effect::Effect;
use crate::resource::Value;

/// Plan containing Effects to be executed
#[derive(Debug, Clone, Default)]
pub struct Plan {
    effects: Vec<Effect>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    /// True if the plan changes nothing; data source reads do not count
    pub fn is_empty(&self) -> bool {
        self.mutation_count() == 0
    }

    /// Number of mutating Effects
    pub fn mutation_count(&self) -> usize {
        self.effects.iter().filter(|e| e.is_mutating()).count()
    }

    /// Generate a summary of the Plan for display
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for effect in &self.effects {
            match effect {
                Effect::Read(_) => summary.read += 1,
                Effect::Create(_) => summary.create += 1,
                Effect::Update { .. } => summary.update += 1,
                Effect::Replace { .. } => summary.replace += 1,
                Effect::Delete(_) => summary.delete += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub read: usize,
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Plan: {} to add, {} to change, {} to destroy",
            self.create + self.replace,
            self.update,
            self.delete + self.replace
        )
    }
}

fn format_attr(value: Option<&Value>) -> String {
    value.map_or_else(|| "(null)".to_string(), |v| v.to_string())
}

/// Rendering shown when a plan is unexpectedly non-empty
impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for effect in self.effects.iter().filter(|e| e.is_mutating()) {
            writeln!(f, "{} {}", effect.symbol(), effect.resource_id())?;
            match effect {
                Effect::Update { from, to, changed, .. }
                | Effect::Replace { from, to, changed, .. } => {
                    for key in changed {
                        writeln!(
                            f,
                            "    {}: {} => {}",
                            key,
                            format_attr(from.attributes.get(key)),
                            format_attr(to.attributes.get(key))
                        )?;
                    }
                }
                _ => {}
            }
        }
        write!(f, "{}", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Resource, ResourceId, State};
    use std::collections::HashMap;

    #[test]
    fn empty_plan() {
        let plan = Plan::new();
        assert!(plan.is_empty());
        assert_eq!(plan.mutation_count(), 0);
    }

    #[test]
    fn reads_do_not_make_a_plan_non_empty() {
        let mut plan = Plan::new();
        plan.add(Effect::Read(Resource::data("oam_sinks", "all")));
        assert!(plan.is_empty());
        assert_eq!(plan.summary().read, 1);
    }

    #[test]
    fn plan_summary() {
        let mut plan = Plan::new();
        plan.add(Effect::Create(Resource::new("oam_sink", "a")));
        plan.add(Effect::Create(Resource::new("oam_sink", "b")));
        plan.add(Effect::Delete(State::not_found(ResourceId::new(
            "oam_sink", "c",
        ))));

        let summary = plan.summary();
        assert_eq!(summary.create, 2);
        assert_eq!(summary.delete, 1);
        assert_eq!(
            summary.to_string(),
            "Plan: 2 to add, 0 to change, 1 to destroy"
        );
    }

    #[test]
    fn display_lists_changed_attributes() {
        let id = ResourceId::new("organizations_organizational_unit", "ou");
        let mut attrs = HashMap::new();
        attrs.insert("name".to_string(), Value::string("old"));
        let mut plan = Plan::new();
        plan.add(Effect::Update {
            id: id.clone(),
            from: State::existing(id.clone(), attrs),
            to: Resource::new("organizations_organizational_unit", "ou")
                .with_attribute("name", Value::string("new")),
            changed: vec!["name".to_string()],
        });

        let rendered = plan.to_string();
        assert!(rendered.contains("~ organizations_organizational_unit.ou"));
        assert!(rendered.contains("name: \"old\" => \"new\""));
        assert!(rendered.ends_with("Plan: 0 to add, 1 to change, 0 to destroy"));
    }
}
