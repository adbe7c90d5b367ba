use std::fs::File;
use std::io::{Seek, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::info;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::diff::ChangeSet;
use super::error::MatrixResult;
use super::models::{Feature, Plan};

/// Selects the plans whose documents an export should contain, from the
/// shape of the outstanding changes. First match wins:
///
/// 1. any NEW feature — every plan (or only the visible ones, at the
///    caller's choice), since a new feature's settings span the whole
///    matrix;
/// 2. plans added this session — just those columns;
/// 3. otherwise — only the visible plans actually referenced by a
///    MODIFIED/RENAMED entry.
pub fn resolve_export_scope(
    changes: &ChangeSet,
    visible_plans: &[Plan],
    newly_added_plans: &[String],
    all_plans: &[Plan],
    include_hidden_plans: bool,
) -> Vec<Plan> {
    if changes.has_new() {
        let scope = if include_hidden_plans {
            all_plans
        } else {
            visible_plans
        };
        return scope.to_vec();
    }

    if !newly_added_plans.is_empty() {
        return visible_plans
            .iter()
            .filter(|plan| newly_added_plans.iter().any(|id| id == &plan.id))
            .cloned()
            .collect();
    }

    let changed = changes.changed_plan_ids();
    visible_plans
        .iter()
        .filter(|plan| changed.contains(&plan.id))
        .cloned()
        .collect()
}

/// Serializes one plan's column: every feature keyed by its
/// SCREAMING_SNAKE_CASE name, with missing entries filled from the
/// canonical default. Key order follows the feature collection.
pub fn plan_document(features: &[Feature], plan: &Plan) -> Map<String, Value> {
    let mut doc = Map::new();
    for feature in features {
        let value = feature.value_or_default(&plan.id);
        doc.insert(
            feature.export_key(),
            serde_json::to_value(&value).unwrap_or(Value::Null),
        );
    }
    doc
}

/// Archive name for an export, embedding an ISO-8601 UTC timestamp.
pub fn archive_file_name(now: DateTime<Utc>) -> String {
    format!("gating-json-{}.zip", now.format("%Y%m%dT%H%M%SZ"))
}

/// Writes one pretty-printed `<planId>.json` per plan into a zip archive.
pub fn write_archive<W: Write + Seek>(
    writer: W,
    features: &[Feature],
    plans: &[Plan],
) -> MatrixResult<()> {
    let mut archive = ZipWriter::new(writer);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for plan in plans {
        archive.start_file(format!("{}.json", plan.id), options)?;
        let doc = Value::Object(plan_document(features, plan));
        archive.write_all(serde_json::to_string_pretty(&doc)?.as_bytes())?;
    }

    archive.finish()?;
    info!(plans = plans.len(), "export archive written");
    Ok(())
}

/// Convenience wrapper writing the archive to a file path.
pub fn export_to_path(path: &Path, features: &[Feature], plans: &[Plan]) -> MatrixResult<()> {
    let file = File::create(path)?;
    write_archive(file, features, plans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::diff::compute_changes;
    use crate::matrix::models::PlanValue;

    #[test]
    fn documents_default_missing_entries() {
        let plan = Plan::new("starter", "Starter");
        let mut feature = Feature::new("sso", "Single Sign On");
        feature.plans.insert(
            "other".into(),
            PlanValue {
                can_enabled: true,
                ..PlanValue::default()
            },
        );
        let doc = plan_document(std::slice::from_ref(&feature), &plan);
        let value = &doc["SINGLE_SIGN_ON"];
        assert_eq!(value["canEnabled"], Value::Bool(false));
        assert_eq!(value["upsellPlanId"], Value::Null);
    }

    #[test]
    fn empty_diff_and_no_new_plans_resolve_to_nothing() {
        let plans = vec![Plan::new("starter", "Starter")];
        let changes = compute_changes(&[], &[], &plans);
        let scope = resolve_export_scope(&changes, &plans, &[], &plans, false);
        assert!(scope.is_empty());
    }

    #[test]
    fn archive_name_embeds_timestamp() {
        let now = DateTime::parse_from_rfc3339("2024-06-01T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(archive_file_name(now), "gating-json-20240601T123000Z.zip");
    }
}
