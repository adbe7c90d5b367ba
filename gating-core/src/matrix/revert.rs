use std::collections::BTreeMap;

use tracing::info;

use super::models::{Feature, Plan};

/// Restores a live feature to its baseline state, or removes it when it has
/// no baseline counterpart (it was added this session). Unknown ids are a
/// no-op. Returns whether the live collection changed.
pub fn revert_feature(
    feature_id: &str,
    features: &mut Vec<Feature>,
    original_features: &[Feature],
) -> bool {
    let Some(position) = features.iter().position(|feature| feature.id == feature_id) else {
        return false;
    };

    match original_features
        .iter()
        .find(|feature| feature.id == feature_id)
    {
        Some(original) => {
            features[position] = original.clone();
            info!(feature_id, "feature reverted to baseline");
        }
        None => {
            features.remove(position);
            info!(feature_id, "new feature removed");
        }
    }
    true
}

/// Removes a plan from every collection that references it. Plans are only
/// revertable when they were added this session, so revert always means
/// deletion; there is no baseline state to restore. Unknown ids are a no-op.
pub fn revert_plan(
    plan_id: &str,
    plans: &mut Vec<Plan>,
    newly_added_plans: &mut Vec<String>,
    visible_columns: &mut BTreeMap<String, bool>,
    features: &mut [Feature],
) -> bool {
    if !plans.iter().any(|plan| plan.id == plan_id) {
        return false;
    }

    plans.retain(|plan| plan.id != plan_id);
    newly_added_plans.retain(|id| id != plan_id);
    visible_columns.remove(plan_id);
    for feature in features.iter_mut() {
        feature.plans.remove(plan_id);
    }
    info!(plan_id, "plan removed");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::models::PlanValue;

    #[test]
    fn revert_of_unknown_feature_is_a_noop() {
        let mut features = vec![Feature::new("sso", "Sso")];
        let originals = features.clone();
        assert!(!revert_feature("missing", &mut features, &originals));
        assert_eq!(features.len(), 1);
    }

    #[test]
    fn revert_plan_strips_every_reference() {
        let mut plans = vec![Plan::new("trial", "Trial"), Plan::new("pro", "Pro")];
        let mut newly_added = vec!["trial".to_string()];
        let mut visible: BTreeMap<String, bool> =
            [("trial".to_string(), true), ("pro".to_string(), true)].into();
        let mut features = vec![Feature::new("sso", "Sso")];
        features[0].plans.insert("trial".into(), PlanValue::default());

        assert!(revert_plan(
            "trial",
            &mut plans,
            &mut newly_added,
            &mut visible,
            &mut features,
        ));
        assert_eq!(plans.len(), 1);
        assert!(newly_added.is_empty());
        assert!(!visible.contains_key("trial"));
        assert!(features[0].plans.is_empty());
    }
}
