//! Plan computation for resource types.
//!
//! Compares the prior state with the proposed state attribute by attribute,
//! using the resource [`Schema`] to decide which values the provider computes
//! and which changes force replacement.

use serde_json::{Map, Value};

use crate::schema::Schema;
use crate::types::{AttributeChange, PlanResult};

/// Compute the plan for one resource instance.
///
/// - `prior` of `None` (or null) plans a create.
/// - A null `proposed` plans a destroy.
/// - Otherwise each schema attribute is compared; a change to a force-new
///   attribute marks the plan as requiring replacement and clears the values
///   the provider will recompute.
pub fn plan_resource(schema: &Schema, prior: Option<&Value>, proposed: &Value) -> PlanResult {
    let prior = prior.filter(|v| !v.is_null());

    match (prior, proposed) {
        (None, proposed) => plan_create(schema, proposed),
        (Some(prior), Value::Null) => plan_destroy(prior),
        (Some(prior), proposed) => plan_update(schema, prior, proposed),
    }
}

fn as_object(value: &Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    }
}

fn is_set(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key).is_some_and(|v| !v.is_null())
}

fn plan_create(schema: &Schema, proposed: &Value) -> PlanResult {
    let mut planned = as_object(proposed);

    for (name, attr) in &schema.block.attributes {
        if attr.flags.computed && !is_set(&planned, name) {
            planned.insert(name.clone(), Value::Null);
        }
    }

    let mut changes: Vec<AttributeChange> = planned
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| AttributeChange::added(k.clone(), v.clone()))
        .collect();
    changes.sort_by(|a, b| a.path.cmp(&b.path));

    PlanResult::with_changes(Value::Object(planned), changes, false)
}

fn plan_destroy(prior: &Value) -> PlanResult {
    let mut changes: Vec<AttributeChange> = as_object(prior)
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| AttributeChange::removed(k, v))
        .collect();
    changes.sort_by(|a, b| a.path.cmp(&b.path));

    PlanResult::with_changes(Value::Null, changes, false)
}

fn plan_update(schema: &Schema, prior: &Value, proposed: &Value) -> PlanResult {
    let prior = as_object(prior);
    let mut planned = as_object(proposed);
    let mut carried = Vec::new();

    for (name, attr) in &schema.block.attributes {
        if attr.flags.computed && !is_set(&planned, name) {
            if let Some(value) = prior.get(name).filter(|v| !v.is_null()) {
                planned.insert(name.clone(), value.clone());
                carried.push(name.clone());
            }
        }
    }

    let mut changes = Vec::new();
    let mut requires_replace = false;

    for name in schema.attribute_names() {
        let before = prior.get(name).cloned().unwrap_or(Value::Null);
        let after = planned.get(name).cloned().unwrap_or(Value::Null);
        if before == after {
            continue;
        }

        if schema.attribute(name).is_some_and(|a| a.force_new) {
            requires_replace = true;
        }
        changes.push(match (before, after) {
            (Value::Null, after) => AttributeChange::added(name, after),
            (before, Value::Null) => AttributeChange::removed(name, before),
            (before, after) => AttributeChange::modified(name, before, after),
        });
    }

    if changes.is_empty() {
        return PlanResult::no_change(Value::Object(planned));
    }

    if requires_replace {
        for (name, attr) in &schema.block.attributes {
            if attr.flags.is_computed_only() || carried.contains(name) {
                planned.insert(name.clone(), Value::Null);
            }
        }
    }

    PlanResult::with_changes(Value::Object(planned), changes, requires_replace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;
    use serde_json::json;

    fn topic_schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute(
                "partitions",
                Attribute::required_int64().with_force_new(),
            )
            .with_attribute("last_updated", Attribute::optional_computed_string())
    }

    #[test]
    fn test_plan_create_marks_computed_unknown() {
        let plan = plan_resource(
            &topic_schema(),
            None,
            &json!({"name": "orders", "partitions": 3}),
        );

        assert!(!plan.requires_replace);
        assert_eq!(plan.planned_state["id"], Value::Null);
        assert_eq!(plan.planned_state["last_updated"], Value::Null);
        let paths: Vec<&str> = plan.changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["name", "partitions"]);
        assert!(plan.changes.iter().all(|c| c.before.is_none()));
    }

    #[test]
    fn test_plan_null_prior_is_create() {
        let plan = plan_resource(&topic_schema(), Some(&Value::Null), &json!({"name": "a"}));
        assert_eq!(plan.changes.len(), 1);
        assert!(!plan.requires_replace);
    }

    #[test]
    fn test_plan_destroy() {
        let prior = json!({
            "id": "1700000000",
            "name": "orders",
            "partitions": 3,
            "last_updated": null,
        });
        let plan = plan_resource(&topic_schema(), Some(&prior), &Value::Null);

        assert_eq!(plan.planned_state, Value::Null);
        assert_eq!(plan.changes.len(), 3);
        assert!(plan.changes.iter().all(|c| c.after.is_none()));
    }

    #[test]
    fn test_plan_no_change_keeps_computed() {
        let prior = json!({"id": "1700000000", "name": "orders", "partitions": 3});
        let plan = plan_resource(
            &topic_schema(),
            Some(&prior),
            &json!({"name": "orders", "partitions": 3}),
        );

        assert!(plan.changes.is_empty());
        assert!(!plan.requires_replace);
        assert_eq!(plan.planned_state["id"], "1700000000");
    }

    #[test]
    fn test_plan_force_new_change_requires_replace() {
        let prior = json!({
            "id": "1700000000",
            "name": "orders",
            "partitions": 3,
            "last_updated": "2024-01-01 00:00:00"
        });
        let plan = plan_resource(
            &topic_schema(),
            Some(&prior),
            &json!({"name": "orders", "partitions": 6}),
        );

        assert!(plan.requires_replace);
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].path, "partitions");
        assert_eq!(plan.changes[0].before, Some(json!(3)));
        assert_eq!(plan.changes[0].after, Some(json!(6)));
        assert_eq!(plan.planned_state["id"], Value::Null);
        assert_eq!(plan.planned_state["last_updated"], Value::Null);
    }

    #[test]
    fn test_plan_non_force_new_change_updates_in_place() {
        let prior = json!({"id": "1", "name": "orders", "partitions": 3, "last_updated": "old"});
        let plan = plan_resource(
            &topic_schema(),
            Some(&prior),
            &json!({"name": "orders", "partitions": 3, "last_updated": "new"}),
        );

        assert!(!plan.requires_replace);
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.planned_state["id"], "1");
    }
}
