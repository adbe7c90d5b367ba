use std::collections::{BTreeMap, BTreeSet};
use std::io::{Seek, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::changelog::{change_log_json, write_bundle, PageImage};
use super::diff::{compute_changes, ChangeSet};
use super::error::{MatrixError, MatrixResult};
use super::export::{resolve_export_scope, write_archive};
use super::import::merge_import;
use super::loader::LoadedMatrix;
use super::models::{feature_id_from_key, Feature, Plan, PlanDocument, PlanValue, PlanValueField};
use super::revert;

/// Long-running actions guarded against re-entrant invocation. The engine
/// itself is synchronous; the flags exist for callers that hold an action
/// open across their own asynchronous work (file reads, rasterization).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongRunningAction {
    Export,
    Import,
    ChangeLog,
}

/// Everything needed to create a feature, as collected by the add-feature
/// dialog: per-field plan selections plus one shared target name per upsell
/// kind, applied to the plans selected for it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureDraft {
    pub name: String,
    pub enabled_plans: BTreeSet<String>,
    pub flag_plans: BTreeSet<String>,
    pub trial_plans: BTreeSet<String>,
    pub upsell_plan: Option<UpsellTarget>,
    pub upsell_addon: Option<UpsellTarget>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsellTarget {
    pub target: String,
    pub plans: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub plans: usize,
    pub features: usize,
}

/// The single authoritative owner of the editing state: plans, features,
/// the immutable baseline, column visibility, and the newly-added-plan
/// list. Presentation layers receive references and call back into the
/// operations below; none of them hold independent copies.
#[derive(Debug, Clone)]
pub struct EditorSession {
    plans: Vec<Plan>,
    features: Vec<Feature>,
    original_features: Vec<Feature>,
    visible_columns: BTreeMap<String, bool>,
    newly_added_plans: Vec<String>,
    export_in_progress: bool,
    import_in_progress: bool,
    change_log_in_progress: bool,
}

impl EditorSession {
    /// Starts a session over a freshly loaded matrix. The feature collection
    /// is cloned once to become the diff baseline; active and NFR plans are
    /// visible by default.
    pub fn new(matrix: LoadedMatrix) -> Self {
        let visible_columns = matrix
            .plans
            .iter()
            .map(|plan| (plan.id.clone(), plan.is_active || plan.is_nfr()))
            .collect();
        let original_features = matrix.features.clone();
        Self {
            plans: matrix.plans,
            features: matrix.features,
            original_features,
            visible_columns,
            newly_added_plans: Vec::new(),
            export_in_progress: false,
            import_in_progress: false,
            change_log_in_progress: false,
        }
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn original_features(&self) -> &[Feature] {
        &self.original_features
    }

    pub fn newly_added_plans(&self) -> &[String] {
        &self.newly_added_plans
    }

    pub fn visible_columns(&self) -> &BTreeMap<String, bool> {
        &self.visible_columns
    }

    pub fn visible_plans(&self) -> Vec<Plan> {
        self.plans
            .iter()
            .filter(|plan| self.visible_columns.get(&plan.id).copied().unwrap_or(false))
            .cloned()
            .collect()
    }

    /// Recomputes the diff of the live features against the baseline.
    pub fn changes(&self) -> ChangeSet {
        compute_changes(&self.features, &self.original_features, &self.plans)
    }

    // -- editing ----------------------------------------------------------

    /// Flips one boolean sub-column. A feature with no entry for the plan
    /// is materialized from the canonical default first, so the first
    /// toggle always yields true. Unknown ids and upsell fields are soft
    /// no-ops.
    pub fn toggle_value(
        &mut self,
        feature_id: &str,
        plan_id: &str,
        field: PlanValueField,
    ) -> Option<bool> {
        if !field.is_toggle() || !self.plans.iter().any(|plan| plan.id == plan_id) {
            return None;
        }
        let feature = self
            .features
            .iter_mut()
            .find(|feature| feature.id == feature_id)?;
        let value = feature.plans.entry(plan_id.to_string()).or_default();
        let state = value.toggle(field);
        debug!(feature_id, plan_id, field = %field, ?state, "value toggled");
        state
    }

    /// Sets or clears an upsell target for one plan. Returns false when the
    /// ids are unknown or the field is not an upsell field.
    pub fn set_upsell(
        &mut self,
        feature_id: &str,
        plan_id: &str,
        field: PlanValueField,
        target: Option<String>,
    ) -> bool {
        if field.is_toggle() || !self.plans.iter().any(|plan| plan.id == plan_id) {
            return false;
        }
        let Some(feature) = self
            .features
            .iter_mut()
            .find(|feature| feature.id == feature_id)
        else {
            return false;
        };
        let value = feature.plans.entry(plan_id.to_string()).or_default();
        match field {
            PlanValueField::UpsellPlanId => value.upsell_plan_id = target,
            PlanValueField::UpsellAddonId => value.upsell_addon_id = target,
            _ => unreachable!("toggle fields handled above"),
        }
        true
    }

    pub fn rename_feature(&mut self, feature_id: &str, name: &str) -> bool {
        match self
            .features
            .iter_mut()
            .find(|feature| feature.id == feature_id)
        {
            Some(feature) => {
                feature.name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// Creates a feature from a dialog draft. Every known plan receives a
    /// concrete value. Returns the new feature id, or None when the name is
    /// empty (the confirm action is disabled in that state).
    pub fn add_feature(&mut self, draft: &FeatureDraft) -> Option<String> {
        let name = draft.name.trim();
        if name.is_empty() {
            return None;
        }
        let id = self.unique_feature_id(name);

        let mut feature = Feature::new(id.clone(), name);
        for plan in &self.plans {
            let value = PlanValue {
                can_enabled: draft.enabled_plans.contains(&plan.id),
                can_enabled_with_flag: draft.flag_plans.contains(&plan.id),
                can_enabled_in_trial: draft.trial_plans.contains(&plan.id),
                upsell_plan_id: upsell_for(&draft.upsell_plan, &plan.id),
                upsell_addon_id: upsell_for(&draft.upsell_addon, &plan.id),
            };
            feature.plans.insert(plan.id.clone(), value);
        }
        self.features.push(feature);
        info!(feature_id = %id, "feature added");
        Some(id)
    }

    /// Prefills a draft from an existing feature, for the dialog's
    /// copy-from selector. When several plans carry different upsell
    /// targets, the last plan in display order wins.
    pub fn feature_draft_from(&self, feature_id: &str) -> Option<FeatureDraft> {
        let feature = self
            .features
            .iter()
            .find(|feature| feature.id == feature_id)?;

        let mut draft = FeatureDraft::default();
        let mut upsell_plan: Option<UpsellTarget> = None;
        let mut upsell_addon: Option<UpsellTarget> = None;
        for plan in &self.plans {
            let Some(value) = feature.value_for(&plan.id) else {
                continue;
            };
            if value.can_enabled {
                draft.enabled_plans.insert(plan.id.clone());
            }
            if value.can_enabled_with_flag {
                draft.flag_plans.insert(plan.id.clone());
            }
            if value.can_enabled_in_trial {
                draft.trial_plans.insert(plan.id.clone());
            }
            if let Some(target) = &value.upsell_plan_id {
                let slot = upsell_plan.get_or_insert_with(|| UpsellTarget {
                    target: target.clone(),
                    plans: BTreeSet::new(),
                });
                slot.target = target.clone();
                slot.plans.insert(plan.id.clone());
            }
            if let Some(target) = &value.upsell_addon_id {
                let slot = upsell_addon.get_or_insert_with(|| UpsellTarget {
                    target: target.clone(),
                    plans: BTreeSet::new(),
                });
                slot.target = target.clone();
                slot.plans.insert(plan.id.clone());
            }
        }
        draft.upsell_plan = upsell_plan;
        draft.upsell_addon = upsell_addon;
        Some(draft)
    }

    /// Appends a plan column. Every feature gains either a clone of the
    /// template plan's value or the canonical default. The plan is tracked
    /// as newly added and is visible when active. Returns false without
    /// touching state when id or name is empty.
    pub fn add_plan(
        &mut self,
        id: &str,
        name: &str,
        is_popular: bool,
        is_active: bool,
        clone_from: Option<&str>,
    ) -> MatrixResult<bool> {
        let id = id.trim();
        let name = name.trim();
        if id.is_empty() || name.is_empty() {
            return Ok(false);
        }
        if self.plans.iter().any(|plan| plan.id == id) {
            return Err(MatrixError::DuplicatePlan {
                plan_id: id.to_string(),
            });
        }

        let mut plan = Plan::new(id, name);
        plan.is_popular = is_popular;
        plan.is_active = is_active;
        self.plans.push(plan);
        self.newly_added_plans.push(id.to_string());
        self.visible_columns.insert(id.to_string(), is_active);

        for feature in &mut self.features {
            let value = match clone_from {
                Some(template) => feature.value_or_default(template),
                None => PlanValue::default(),
            };
            feature.plans.insert(id.to_string(), value);
        }
        info!(plan_id = id, "plan added");
        Ok(true)
    }

    // -- revert -----------------------------------------------------------

    pub fn revert_feature(&mut self, feature_id: &str) -> bool {
        revert::revert_feature(feature_id, &mut self.features, &self.original_features)
    }

    pub fn revert_plan(&mut self, plan_id: &str) -> bool {
        revert::revert_plan(
            plan_id,
            &mut self.plans,
            &mut self.newly_added_plans,
            &mut self.visible_columns,
            &mut self.features,
        )
    }

    // -- column visibility and filtering ----------------------------------

    pub fn toggle_column(&mut self, plan_id: &str) -> Option<bool> {
        if !self.plans.iter().any(|plan| plan.id == plan_id) {
            return None;
        }
        let slot = self
            .visible_columns
            .entry(plan_id.to_string())
            .or_insert(false);
        *slot = !*slot;
        Some(*slot)
    }

    /// Hides every column when all are visible; shows every column
    /// otherwise.
    pub fn toggle_all_columns(&mut self) {
        let all_visible = self.plans.iter().all(|plan| {
            self.visible_columns
                .get(&plan.id)
                .copied()
                .unwrap_or(false)
        });
        self.set_all_columns(!all_visible);
    }

    pub fn set_all_columns(&mut self, visible: bool) {
        for plan in &self.plans {
            self.visible_columns.insert(plan.id.clone(), visible);
        }
    }

    pub fn filter_features(&self, query: &str) -> Vec<&Feature> {
        let query = query.to_lowercase();
        self.features
            .iter()
            .filter(|feature| feature.name.to_lowercase().contains(&query))
            .collect()
    }

    pub fn filter_plans(&self, query: &str) -> Vec<&Plan> {
        let query = query.to_lowercase();
        self.plans
            .iter()
            .filter(|plan| plan.name.to_lowercase().contains(&query))
            .collect()
    }

    // -- import / export --------------------------------------------------

    /// Wholesale-replaces the session state with imported documents and
    /// resets the diff baseline to the freshly parsed data, so the diff is
    /// empty immediately afterwards. Returns None when an import is
    /// already in flight.
    pub fn import_documents(&mut self, docs: &[(String, PlanDocument)]) -> Option<ImportSummary> {
        if !self.try_begin(LongRunningAction::Import) {
            return None;
        }
        let (plans, features) = merge_import(docs);
        let summary = ImportSummary {
            plans: plans.len(),
            features: features.len(),
        };
        self.visible_columns = plans.iter().map(|plan| (plan.id.clone(), true)).collect();
        self.original_features = features.clone();
        self.plans = plans;
        self.features = features;
        self.newly_added_plans.clear();
        self.finish(LongRunningAction::Import);
        info!(
            plans = summary.plans,
            features = summary.features,
            "session state replaced by import"
        );
        Some(summary)
    }

    /// The plans a scoped export would serialize right now.
    pub fn export_scope(&self, include_hidden_plans: bool) -> Vec<Plan> {
        resolve_export_scope(
            &self.changes(),
            &self.visible_plans(),
            &self.newly_added_plans,
            &self.plans,
            include_hidden_plans,
        )
    }

    /// Writes the change-shaped export archive. Returns the exported plan
    /// ids, or None when an export is already in flight.
    pub fn export_smart<W: Write + Seek>(
        &mut self,
        writer: W,
        include_hidden_plans: bool,
    ) -> MatrixResult<Option<Vec<String>>> {
        if !self.try_begin(LongRunningAction::Export) {
            return Ok(None);
        }
        let scope = self.export_scope(include_hidden_plans);
        let result = write_archive(writer, &self.features, &scope);
        self.finish(LongRunningAction::Export);
        result?;
        Ok(Some(scope.into_iter().map(|plan| plan.id).collect()))
    }

    /// Writes every visible plan regardless of the change shape. Returns
    /// the exported plan ids, or None when an export is already in flight.
    pub fn export_full<W: Write + Seek>(&mut self, writer: W) -> MatrixResult<Option<Vec<String>>> {
        if !self.try_begin(LongRunningAction::Export) {
            return Ok(None);
        }
        let scope = self.visible_plans();
        let result = write_archive(writer, &self.features, &scope);
        self.finish(LongRunningAction::Export);
        result?;
        Ok(Some(scope.into_iter().map(|plan| plan.id).collect()))
    }

    /// Writes the change-log bundle for the current diff. Returns None when
    /// a change-log export is already in flight.
    pub fn export_change_log<W: Write + Seek>(
        &mut self,
        writer: W,
        pages: &[PageImage],
        timestamp: DateTime<Utc>,
    ) -> MatrixResult<Option<()>> {
        if !self.try_begin(LongRunningAction::ChangeLog) {
            return Ok(None);
        }
        let json = change_log_json(
            &self.changes(),
            &self.newly_added_plans,
            &self.plans,
            timestamp,
        );
        let result = write_bundle(writer, Some(&json), pages);
        self.finish(LongRunningAction::ChangeLog);
        result?;
        Ok(Some(()))
    }

    // -- busy flags -------------------------------------------------------

    /// Claims an action slot. Returns false when the action is already in
    /// flight; the caller must then treat its invocation as a no-op.
    pub fn try_begin(&mut self, action: LongRunningAction) -> bool {
        let slot = self.flag_mut(action);
        if *slot {
            return false;
        }
        *slot = true;
        true
    }

    pub fn finish(&mut self, action: LongRunningAction) {
        *self.flag_mut(action) = false;
    }

    pub fn is_busy(&self, action: LongRunningAction) -> bool {
        match action {
            LongRunningAction::Export => self.export_in_progress,
            LongRunningAction::Import => self.import_in_progress,
            LongRunningAction::ChangeLog => self.change_log_in_progress,
        }
    }

    fn flag_mut(&mut self, action: LongRunningAction) -> &mut bool {
        match action {
            LongRunningAction::Export => &mut self.export_in_progress,
            LongRunningAction::Import => &mut self.import_in_progress,
            LongRunningAction::ChangeLog => &mut self.change_log_in_progress,
        }
    }

    fn unique_feature_id(&self, name: &str) -> String {
        let base = feature_id_from_key(name);
        if !self.features.iter().any(|feature| feature.id == base) {
            return base;
        }
        let mut suffix = 2;
        loop {
            let candidate = format!("{base}-{suffix}");
            if !self.features.iter().any(|feature| feature.id == candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }
}

fn upsell_for(target: &Option<UpsellTarget>, plan_id: &str) -> Option<String> {
    target
        .as_ref()
        .filter(|upsell| upsell.plans.contains(plan_id))
        .map(|upsell| upsell.target.clone())
}
