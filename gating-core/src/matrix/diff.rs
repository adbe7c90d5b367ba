use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::models::{Feature, Plan, PlanValue, PlanValueField};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeStatus {
    New,
    Renamed,
    Modified,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::New => "NEW",
            ChangeStatus::Renamed => "RENAMED",
            ChangeStatus::Modified => "MODIFIED",
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field edit under one plan. `None` means the value was undefined
/// on that side (the feature had no entry for the plan at all), which is
/// kept distinct from an explicit `null` or `false`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: PlanValueField,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanChange {
    pub plan_id: String,
    pub plan_name: String,
    pub changes: Vec<FieldChange>,
}

/// Full current snapshot of one plan's value, attached to NEW features.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanSnapshot {
    pub plan_id: String,
    pub plan_name: String,
    pub data: PlanValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangedFeature {
    pub feature_id: String,
    pub name: String,
    pub status: ChangeStatus,
    pub old_name: Option<String>,
    pub changes: Vec<PlanChange>,
    pub plan_data: Vec<PlanSnapshot>,
}

impl ChangedFeature {
    /// Wire shape of one change-log entry.
    pub fn to_value(&self) -> Value {
        let mut entry = Map::new();
        entry.insert("status".into(), Value::String(self.status.as_str().into()));
        if let Some(old_name) = &self.old_name {
            entry.insert("oldName".into(), Value::String(old_name.clone()));
        }
        match self.status {
            ChangeStatus::New => {
                let mut plan_data = Map::new();
                for snapshot in &self.plan_data {
                    let mut slot = Map::new();
                    slot.insert("planId".into(), Value::String(snapshot.plan_id.clone()));
                    slot.insert("planName".into(), Value::String(snapshot.plan_name.clone()));
                    slot.insert(
                        "data".into(),
                        serde_json::to_value(&snapshot.data).unwrap_or(Value::Null),
                    );
                    plan_data.insert(snapshot.plan_id.clone(), Value::Object(slot));
                }
                entry.insert("planData".into(), Value::Object(plan_data));
            }
            ChangeStatus::Renamed | ChangeStatus::Modified => {
                let mut changes = Map::new();
                for plan_change in &self.changes {
                    let mut fields = Map::new();
                    for field_change in &plan_change.changes {
                        let mut pair = Map::new();
                        if let Some(old) = &field_change.old {
                            pair.insert("old".into(), old.clone());
                        }
                        if let Some(new) = &field_change.new {
                            pair.insert("new".into(), new.clone());
                        }
                        fields.insert(field_change.field.as_str().into(), Value::Object(pair));
                    }
                    let mut slot = Map::new();
                    slot.insert("planId".into(), Value::String(plan_change.plan_id.clone()));
                    slot.insert(
                        "planName".into(),
                        Value::String(plan_change.plan_name.clone()),
                    );
                    slot.insert("changes".into(), Value::Object(fields));
                    changes.insert(plan_change.plan_id.clone(), Value::Object(slot));
                }
                entry.insert("changes".into(), Value::Object(changes));
            }
        }
        Value::Object(entry)
    }
}

/// The diff between the live features and the baseline, in live iteration
/// order. Entries are keyed by feature id; the name-keyed wire projection
/// exists only for the change-log surface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    entries: Vec<ChangedFeature>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangedFeature> {
        self.entries.iter()
    }

    pub fn get(&self, feature_id: &str) -> Option<&ChangedFeature> {
        self.entries.iter().find(|entry| entry.feature_id == feature_id)
    }

    pub fn has_new(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.status == ChangeStatus::New)
    }

    /// Plan ids referenced by at least one MODIFIED/RENAMED plan entry.
    pub fn changed_plan_ids(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter(|entry| entry.status != ChangeStatus::New)
            .flat_map(|entry| entry.changes.iter())
            .map(|plan_change| plan_change.plan_id.clone())
            .collect()
    }

    /// Projects the diff to the name-keyed map the change log serializes.
    /// Two live features sharing a display name collide here; the later one
    /// wins, matching the original log format.
    pub fn by_name(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for entry in &self.entries {
            map.insert(entry.name.clone(), entry.to_value());
        }
        map
    }
}

/// Classifies every live feature against the baseline.
///
/// A feature with no baseline counterpart (by id) is NEW and carries the
/// full current value for every plan. A counterpart under a different name
/// is RENAMED and additionally carries the same per-field diff a MODIFIED
/// feature would, since renames co-occur with edits. Unchanged features are
/// absent from the result. Features that exist only in the baseline
/// (deletions) are not represented.
///
/// Pure and deterministic: plan iteration follows `plans`, feature
/// iteration follows `features`, and serialized key order follows
/// insertion order.
pub fn compute_changes(
    features: &[Feature],
    original_features: &[Feature],
    plans: &[Plan],
) -> ChangeSet {
    let baseline: HashMap<&str, &Feature> = original_features
        .iter()
        .map(|feature| (feature.id.as_str(), feature))
        .collect();

    let mut entries = Vec::new();
    for feature in features {
        match baseline.get(feature.id.as_str()) {
            None => {
                let plan_data = plans
                    .iter()
                    .map(|plan| PlanSnapshot {
                        plan_id: plan.id.clone(),
                        plan_name: plan.name.clone(),
                        data: feature.value_or_default(&plan.id),
                    })
                    .collect();
                entries.push(ChangedFeature {
                    feature_id: feature.id.clone(),
                    name: feature.name.clone(),
                    status: ChangeStatus::New,
                    old_name: None,
                    changes: Vec::new(),
                    plan_data,
                });
            }
            Some(original) if original.name != feature.name => {
                entries.push(ChangedFeature {
                    feature_id: feature.id.clone(),
                    name: feature.name.clone(),
                    status: ChangeStatus::Renamed,
                    old_name: Some(original.name.clone()),
                    changes: diff_plans(original, feature, plans),
                    plan_data: Vec::new(),
                });
            }
            Some(original) => {
                let changes = diff_plans(original, feature, plans);
                if !changes.is_empty() {
                    entries.push(ChangedFeature {
                        feature_id: feature.id.clone(),
                        name: feature.name.clone(),
                        status: ChangeStatus::Modified,
                        old_name: None,
                        changes,
                        plan_data: Vec::new(),
                    });
                }
            }
        }
    }

    debug!(changed = entries.len(), "computed change set");
    ChangeSet { entries }
}

/// Field-level comparison of one feature against its baseline counterpart,
/// plan by plan. A missing plan entry compares as undefined: distinct from
/// an entry holding default values.
fn diff_plans(original: &Feature, current: &Feature, plans: &[Plan]) -> Vec<PlanChange> {
    let mut plan_changes = Vec::new();
    for plan in plans {
        let old_value = original.value_for(&plan.id);
        let new_value = current.value_for(&plan.id);
        let mut fields = Vec::new();
        for field in PlanValueField::ALL {
            let old = old_value.map(|value| value.field(field));
            let new = new_value.map(|value| value.field(field));
            if old != new {
                fields.push(FieldChange { field, old, new });
            }
        }
        if !fields.is_empty() {
            plan_changes.push(PlanChange {
                plan_id: plan.id.clone(),
                plan_name: plan.name.clone(),
                changes: fields,
            });
        }
    }
    plan_changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(id: &str, name: &str) -> Plan {
        Plan::new(id, name)
    }

    fn feature(id: &str, name: &str) -> Feature {
        Feature::new(id, name)
    }

    #[test]
    fn undefined_entry_differs_from_defaulted_entry() {
        let plans = vec![plan("starter", "Starter")];
        let original = vec![feature("sso", "Sso")];
        let mut current = vec![feature("sso", "Sso")];
        current[0]
            .plans
            .insert("starter".into(), PlanValue::default());

        let changes = compute_changes(&current, &original, &plans);
        assert_eq!(changes.len(), 1);
        let entry = changes.get("sso").unwrap();
        assert_eq!(entry.status, ChangeStatus::Modified);
        let field = &entry.changes[0].changes[0];
        assert_eq!(field.old, None);
        assert_eq!(field.new, Some(Value::Bool(false)));
    }

    #[test]
    fn identical_features_produce_no_entries() {
        let plans = vec![plan("starter", "Starter")];
        let mut base = feature("sso", "Sso");
        base.plans.insert(
            "starter".into(),
            PlanValue {
                can_enabled: true,
                ..PlanValue::default()
            },
        );
        let changes = compute_changes(
            std::slice::from_ref(&base),
            std::slice::from_ref(&base),
            &plans,
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn wire_projection_omits_undefined_sides() {
        let plans = vec![plan("starter", "Starter")];
        let original = vec![feature("sso", "Sso")];
        let mut current = vec![feature("sso", "Sso")];
        current[0].plans.insert(
            "starter".into(),
            PlanValue {
                can_enabled: true,
                ..PlanValue::default()
            },
        );

        let changes = compute_changes(&current, &original, &plans);
        let wire = Value::Object(changes.by_name());
        let pair = &wire["Sso"]["changes"]["starter"]["changes"]["canEnabled"];
        assert!(pair.get("old").is_none());
        assert_eq!(pair["new"], Value::Bool(true));
    }
}
