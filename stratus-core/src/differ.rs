//! Differ - Compare desired state with current state to generate a Plan
//!
//! Compares the "desired state" declared in configuration with the "current
//! state" fetched from the Provider, and generates a list of required Effects
//! (Plan).

use std::collections::{HashMap, HashSet};

use crate::effect::Effect;
use crate::plan::Plan;
use crate::resource::{Resource, ResourceId, State, Value};
use crate::schema::ResourceSchema;

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create(Resource),
    /// Resource exists with differences -> needs update
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource must be destroyed and created again
    Replace {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with no differences -> no action needed
    NoChange(ResourceId),
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange(_))
    }
}

/// Compare desired state with current state to compute a Diff
pub fn diff(desired: &Resource, current: &State, schema: Option<&ResourceSchema>) -> Diff {
    if !current.exists {
        return Diff::Create(desired.clone());
    }

    let changed = find_changed_attributes(&desired.attributes, &current.attributes, schema);

    if current.tainted {
        return Diff::Replace {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        };
    }

    if changed.is_empty() {
        return Diff::NoChange(desired.id.clone());
    }

    let replace = schema.is_some_and(|s| changed.iter().any(|k| s.is_force_new(k)));
    if replace {
        Diff::Replace {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    } else {
        Diff::Update {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    }
}

/// Find changed attributes between desired and current state
///
/// Only configured keys are compared; an unresolved reference is always a
/// change since its value is unknown until apply.
fn find_changed_attributes(
    desired: &HashMap<String, Value>,
    current: &HashMap<String, Value>,
    schema: Option<&ResourceSchema>,
) -> Vec<String> {
    let mut changed = Vec::new();

    for (key, desired_value) in desired {
        // Skip internal attributes (starting with _)
        if key.starts_with('_') {
            continue;
        }
        if desired_value.has_unresolved_ref() {
            changed.push(key.clone());
            continue;
        }

        let unordered = schema.is_some_and(|s| s.is_unordered(key));
        match current.get(key) {
            Some(current_value) if values_equal(desired_value, current_value, unordered) => {}
            _ => changed.push(key.clone()),
        }
    }

    changed.sort();
    changed
}

fn values_equal(desired: &Value, current: &Value, unordered: bool) -> bool {
    match (desired, current) {
        (Value::List(a), Value::List(b)) if unordered => {
            a.len() == b.len() && sorted_items(a) == sorted_items(b)
        }
        _ => desired == current,
    }
}

fn sorted_items(items: &[Value]) -> Vec<&Value> {
    let mut sorted: Vec<&Value> = items.iter().collect();
    sorted.sort_by_cached_key(|v| v.to_string());
    sorted
}

/// Compute Diff for multiple resources and generate a Plan
///
/// Data sources become Read effects. States that exist but are no longer
/// declared are deleted after everything else, in reverse address order.
pub fn create_plan(
    desired: &[Resource],
    current_states: &HashMap<ResourceId, State>,
    schemas: &HashMap<String, ResourceSchema>,
) -> Plan {
    let mut plan = Plan::new();

    for resource in desired {
        if resource.is_data_source() {
            plan.add(Effect::Read(resource.clone()));
            continue;
        }

        let schema = schemas.get(&resource.id.resource_type);
        let mut resource = resource.clone();
        if let Some(schema) = schema {
            schema.apply_defaults(&mut resource.attributes);
        }

        let current = current_states
            .get(&resource.id)
            .cloned()
            .unwrap_or_else(|| State::not_found(resource.id.clone()));

        match diff(&resource, &current, schema) {
            Diff::Create(r) => plan.add(Effect::Create(r)),
            Diff::Update {
                id,
                from,
                to,
                changed_attributes,
            } => plan.add(Effect::Update {
                id,
                from,
                to,
                changed: changed_attributes,
            }),
            Diff::Replace {
                id,
                from,
                to,
                changed_attributes,
            } => plan.add(Effect::Replace {
                id,
                from,
                to,
                changed: changed_attributes,
            }),
            Diff::NoChange(_) => {}
        }
    }

    let declared: HashSet<&ResourceId> = desired
        .iter()
        .filter(|r| !r.is_data_source())
        .map(|r| &r.id)
        .collect();
    let mut orphans: Vec<&State> = current_states
        .values()
        .filter(|s| s.exists && !declared.contains(&s.id))
        .collect();
    orphans.sort_by(|a, b| b.id.cmp(&a.id));
    for state in orphans {
        plan.add(Effect::Delete(state.clone()));
    }

    plan
}

/// Binding -> attributes (declared merged with observed)
pub type BindingMap = HashMap<String, HashMap<String, Value>>;

/// Bindings under which each resource can be referenced, as indexes into
/// `resources`
///
/// Every resource is reachable by its address. A bare name is a binding
/// only when no other resource shares it.
fn binding_index(resources: &[Resource]) -> HashMap<String, usize> {
    let ambiguous = ambiguous_names(resources);
    let mut index = HashMap::new();
    for (i, resource) in resources.iter().enumerate() {
        index.insert(resource.address(), i);
        if !ambiguous.contains(resource.id.name.as_str()) {
            index.insert(resource.id.name.clone(), i);
        }
    }
    index
}

/// Names declared by more than one resource
pub fn ambiguous_names(resources: &[Resource]) -> HashSet<&str> {
    let mut seen = HashSet::new();
    resources
        .iter()
        .filter(|r| !seen.insert(r.id.name.as_str()))
        .map(|r| r.id.name.as_str())
        .collect()
}

/// Build the binding map used to resolve references
///
/// `current_states` is keyed by address. Observed attributes fill in what
/// the configuration left out, and the identifier is exposed as `id`.
pub fn build_binding_map(
    resources: &[Resource],
    current_states: &HashMap<String, State>,
) -> BindingMap {
    let attributes: Vec<HashMap<String, Value>> = resources
        .iter()
        .map(|resource| {
            let mut attrs = resource.attributes.clone();
            if let Some(state) = current_states.get(&resource.address())
                && state.exists
            {
                for (k, v) in &state.attributes {
                    if !attrs.contains_key(k) {
                        attrs.insert(k.clone(), v.clone());
                    }
                }
                if let Some(identifier) = &state.identifier {
                    attrs
                        .entry("id".to_string())
                        .or_insert_with(|| Value::string(identifier.clone()));
                }
            }
            attrs
        })
        .collect();

    binding_index(resources)
        .into_iter()
        .map(|(binding, i)| (binding, attributes[i].clone()))
        .collect()
}

const MAX_REF_DEPTH: usize = 32;

/// Resolve references in a value; unknown references are kept as-is
pub fn resolve_ref_value(value: &Value, binding_map: &BindingMap) -> Value {
    resolve_with_depth(value, binding_map, 0)
}

fn resolve_with_depth(value: &Value, binding_map: &BindingMap, depth: usize) -> Value {
    match value {
        Value::ResourceRef(binding_name, attr_name) => {
            if depth < MAX_REF_DEPTH
                && let Some(attrs) = binding_map.get(binding_name)
                && let Some(attr_value) = attrs.get(attr_name)
            {
                return resolve_with_depth(attr_value, binding_map, depth + 1);
            }
            value.clone()
        }
        Value::List(items) => Value::List(
            items
                .iter()
                .map(|v| resolve_with_depth(v, binding_map, depth))
                .collect(),
        ),
        Value::Map(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_with_depth(v, binding_map, depth)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

/// Resolve references in all attributes of a resource
pub fn resolve_resource(resource: &Resource, binding_map: &BindingMap) -> Resource {
    let mut resolved = resource.clone();
    resolved.attributes = resource
        .attributes
        .iter()
        .map(|(k, v)| (k.clone(), resolve_ref_value(v, binding_map)))
        .collect();
    resolved
}

/// Resolve references in every resource against states keyed by address
pub fn resolve_refs(resources: &mut [Resource], current_states: &HashMap<String, State>) {
    let binding_map = build_binding_map(resources, current_states);
    for resource in resources.iter_mut() {
        *resource = resolve_resource(resource, &binding_map);
    }
}

/// Extract binding names that a resource depends on
pub fn get_resource_dependencies(resource: &Resource) -> HashSet<String> {
    let mut deps = HashSet::new();
    for value in resource.attributes.values() {
        collect_dependencies(value, &mut deps);
    }
    deps
}

fn collect_dependencies(value: &Value, deps: &mut HashSet<String>) {
    match value {
        Value::ResourceRef(binding_name, _) => {
            deps.insert(binding_name.clone());
        }
        Value::List(items) => {
            for item in items {
                collect_dependencies(item, deps);
            }
        }
        Value::Map(map) => {
            for v in map.values() {
                collect_dependencies(v, deps);
            }
        }
        _ => {}
    }
}

/// Sort resources topologically based on dependencies
///
/// Declaration order is kept among independent resources. Cycles are broken
/// at the first revisit.
pub fn sort_by_dependencies(resources: &[Resource]) -> Vec<Resource> {
    let bindings = binding_index(resources);

    let mut sorted = Vec::new();
    let mut visited: HashSet<usize> = HashSet::new();
    let mut visiting: HashSet<usize> = HashSet::new();

    fn visit(
        index: usize,
        resources: &[Resource],
        bindings: &HashMap<String, usize>,
        visited: &mut HashSet<usize>,
        visiting: &mut HashSet<usize>,
        sorted: &mut Vec<Resource>,
    ) {
        if visited.contains(&index) || !visiting.insert(index) {
            return;
        }

        let resource = &resources[index];
        let mut deps: Vec<String> = get_resource_dependencies(resource).into_iter().collect();
        deps.sort();
        for dep in deps {
            if let Some(&dep_index) = bindings.get(&dep) {
                visit(dep_index, resources, bindings, visited, visiting, sorted);
            }
        }

        visiting.remove(&index);
        visited.insert(index);
        sorted.push(resource.clone());
    }

    for index in 0..resources.len() {
        visit(
            index,
            resources,
            &bindings,
            &mut visited,
            &mut visiting,
            &mut sorted,
        );
    }

    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeSchema, AttributeType};

    fn ou_schema() -> ResourceSchema {
        ResourceSchema::new("organizations_organizational_unit")
            .attribute(AttributeSchema::new("name", AttributeType::String).required())
            .attribute(
                AttributeSchema::new("parent_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
    }

    fn ou_state(name: &str, parent: &str) -> State {
        let mut attrs = HashMap::new();
        attrs.insert("name".to_string(), Value::string(name));
        attrs.insert("parent_id".to_string(), Value::string(parent));
        attrs.insert("arn".to_string(), Value::string("arn:ou"));
        State::existing(ResourceId::new("organizations_organizational_unit", "ou"), attrs)
            .with_identifier("ou-1234")
    }

    fn ou(name: &str, parent: &str) -> Resource {
        Resource::new("organizations_organizational_unit", "ou")
            .with_attribute("name", Value::string(name))
            .with_attribute("parent_id", Value::string(parent))
    }

    #[test]
    fn diff_create_when_not_exists() {
        let desired = ou("a", "r-1");
        let current = State::not_found(desired.id.clone());

        let result = diff(&desired, &current, None);
        assert!(matches!(result, Diff::Create(_)));
    }

    #[test]
    fn diff_no_change_ignores_computed_attributes() {
        let schema = ou_schema();
        let result = diff(&ou("a", "r-1"), &ou_state("a", "r-1"), Some(&schema));
        assert!(matches!(result, Diff::NoChange(_)));
        assert!(!result.is_change());
    }

    #[test]
    fn diff_update_when_different() {
        let schema = ou_schema();
        let result = diff(&ou("b", "r-1"), &ou_state("a", "r-1"), Some(&schema));
        match result {
            Diff::Update {
                changed_attributes, ..
            } => assert_eq!(changed_attributes, vec!["name".to_string()]),
            other => panic!("Expected Update, got {:?}", other),
        }
    }

    #[test]
    fn diff_replace_on_force_new_change() {
        let schema = ou_schema();
        let result = diff(&ou("a", "r-2"), &ou_state("a", "r-1"), Some(&schema));
        assert!(matches!(result, Diff::Replace { .. }));
    }

    #[test]
    fn diff_replace_when_tainted() {
        let schema = ou_schema();
        let current = ou_state("a", "r-1").with_tainted(true);
        let result = diff(&ou("a", "r-1"), &current, Some(&schema));
        match result {
            Diff::Replace {
                changed_attributes, ..
            } => assert!(changed_attributes.is_empty()),
            other => panic!("Expected Replace, got {:?}", other),
        }
    }

    #[test]
    fn diff_unresolved_ref_is_a_change() {
        let desired = ou("a", "r-1").with_attribute("name", Value::reference("other", "name"));
        let result = diff(&desired, &ou_state("a", "r-1"), None);
        assert!(matches!(result, Diff::Update { .. }));
    }

    #[test]
    fn diff_unordered_list_ignores_order() {
        let schema = ResourceSchema::new("oam_link").attribute(
            AttributeSchema::new("resource_types", crate::schema::types::string_list())
                .required()
                .unordered(),
        );
        let desired = Resource::new("oam_link", "l").with_attribute(
            "resource_types",
            Value::string_list(["AWS::Logs::LogGroup", "AWS::XRay::Trace"]),
        );
        let mut attrs = HashMap::new();
        attrs.insert(
            "resource_types".to_string(),
            Value::string_list(["AWS::XRay::Trace", "AWS::Logs::LogGroup"]),
        );
        let current = State::existing(desired.id.clone(), attrs);

        assert!(!diff(&desired, &current, Some(&schema)).is_change());
        assert!(diff(&desired, &current, None).is_change());
    }

    #[test]
    fn create_plan_from_resources() {
        let resources = vec![
            ou("a", "r-1"),
            Resource::data("oam_sinks", "all"),
            Resource::new("organizations_organizational_unit", "fresh")
                .with_attribute("name", Value::string("fresh")),
        ];

        let mut current_states = HashMap::new();
        current_states.insert(resources[0].id.clone(), ou_state("old", "r-1"));
        let orphan_id = ResourceId::new("oam_sink", "gone");
        current_states.insert(
            orphan_id.clone(),
            State::existing(orphan_id.clone(), HashMap::new()).with_identifier("arn:sink"),
        );

        let mut schemas = HashMap::new();
        schemas.insert("organizations_organizational_unit".to_string(), ou_schema());

        let plan = create_plan(&resources, &current_states, &schemas);

        assert_eq!(plan.effects().len(), 4);
        assert!(matches!(plan.effects()[0], Effect::Update { .. }));
        assert!(matches!(plan.effects()[1], Effect::Read(_)));
        assert!(matches!(plan.effects()[2], Effect::Create(_)));
        assert!(matches!(&plan.effects()[3], Effect::Delete(s) if s.id == orphan_id));
    }

    #[test]
    fn create_plan_applies_schema_defaults() {
        let schema = ResourceSchema::new("organizations_policy")
            .attribute(AttributeSchema::new("name", AttributeType::String).required())
            .attribute(
                AttributeSchema::new("type", AttributeType::String)
                    .with_default(Value::string("SERVICE_CONTROL_POLICY")),
            );
        let mut schemas = HashMap::new();
        schemas.insert("organizations_policy".to_string(), schema);
        let resources = vec![
            Resource::new("organizations_policy", "p").with_attribute("name", Value::string("p")),
        ];

        let plan = create_plan(&resources, &HashMap::new(), &schemas);
        match &plan.effects()[0] {
            Effect::Create(r) => assert_eq!(r.get_str("type"), Some("SERVICE_CONTROL_POLICY")),
            other => panic!("Expected Create, got {:?}", other),
        }
    }

    #[test]
    fn resolve_refs_uses_observed_attributes_and_identifier() {
        let mut resources = vec![
            Resource::new("oam_sink", "sink").with_attribute("name", Value::string("s")),
            Resource::new("oam_link", "link")
                .with_attribute("sink_identifier", Value::reference("sink", "arn"))
                .with_attribute("sink_id", Value::reference("sink", "id"))
                .with_attribute("missing", Value::reference("nowhere", "x")),
        ];
        let mut attrs = HashMap::new();
        attrs.insert("arn".to_string(), Value::string("arn:aws:oam:sink/1"));
        let mut states = HashMap::new();
        states.insert(
            resources[0].address(),
            State::existing(resources[0].id.clone(), attrs).with_identifier("sink-1"),
        );

        resolve_refs(&mut resources, &states);

        assert_eq!(resources[1].get_str("sink_identifier"), Some("arn:aws:oam:sink/1"));
        assert_eq!(resources[1].get_str("sink_id"), Some("sink-1"));
        assert!(resources[1].attributes["missing"].has_unresolved_ref());
    }

    #[test]
    fn sort_places_dependencies_first() {
        let resources = vec![
            Resource::new("oam_link", "link")
                .with_attribute("sink_identifier", Value::reference("sink", "arn")),
            Resource::new("oam_sink_policy", "policy")
                .with_attribute("sink_identifier", Value::reference("sink", "arn")),
            Resource::new("oam_sink", "sink"),
        ];

        let sorted = sort_by_dependencies(&resources);
        let names: Vec<&str> = sorted.iter().map(|r| r.id.name.as_str()).collect();
        assert_eq!(names, vec!["sink", "link", "policy"]);
    }

    #[test]
    fn sort_keeps_resources_sharing_a_name() {
        let resources = vec![
            Resource::new("oam_link", "test")
                .with_attribute("sink_identifier", Value::reference("oam_sink.test", "arn")),
            Resource::new("oam_sink", "test"),
            Resource::data("oam_sink", "test")
                .with_attribute("sink_identifier", Value::reference("oam_sink.test", "arn")),
        ];

        let sorted = sort_by_dependencies(&resources);
        let addresses: Vec<String> = sorted.iter().map(Resource::address).collect();
        assert_eq!(
            addresses,
            vec!["oam_sink.test", "oam_link.test", "data.oam_sink.test"]
        );
    }

    #[test]
    fn shared_names_bind_only_by_address() {
        let resources = vec![
            Resource::new("oam_sink", "test").with_attribute("name", Value::string("managed")),
            Resource::data("oam_sink", "test").with_attribute("name", Value::string("read")),
            Resource::new("oam_link", "link").with_attribute("name", Value::string("link")),
        ];

        let bindings = build_binding_map(&resources, &HashMap::new());
        assert!(!bindings.contains_key("test"));
        assert_eq!(bindings["oam_sink.test"]["name"], Value::string("managed"));
        assert_eq!(bindings["data.oam_sink.test"]["name"], Value::string("read"));
        assert_eq!(bindings["link"], bindings["oam_link.link"]);
        assert_eq!(ambiguous_names(&resources), HashSet::from(["test"]));
    }

    #[test]
    fn data_source_does_not_keep_a_managed_orphan() {
        let resources = vec![Resource::data("oam_sink", "s")];
        let id = ResourceId::new("oam_sink", "s");
        let mut current_states = HashMap::new();
        current_states.insert(
            id.clone(),
            State::existing(id.clone(), HashMap::new()).with_identifier("arn:sink"),
        );

        let plan = create_plan(&resources, &current_states, &HashMap::new());
        assert_eq!(plan.effects().len(), 2);
        assert!(matches!(plan.effects()[0], Effect::Read(_)));
        assert!(matches!(&plan.effects()[1], Effect::Delete(s) if s.id == id));
    }

    #[test]
    fn unordered_lists_compare_duplicates() {
        let a = Value::string_list(["A", "A", "B"]);
        let b = Value::string_list(["A", "B", "B"]);
        assert!(!values_equal(&a, &b, true));
        assert!(values_equal(&a, &Value::string_list(["B", "A", "A"]), true));
    }

    #[test]
    fn sort_tolerates_cycles() {
        let resources = vec![
            Resource::new("t", "a").with_attribute("x", Value::reference("b", "x")),
            Resource::new("t", "b").with_attribute("x", Value::reference("a", "x")),
        ];
        assert_eq!(sort_by_dependencies(&resources).len(), 2);
    }
}
