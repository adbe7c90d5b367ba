use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::{info, warn};
use zip::ZipArchive;

use super::error::{MatrixError, MatrixResult};
use super::loader::sort_plans;
use super::models::{
    display_name_from_key, feature_id_from_key, plan_name_from_id, Feature, Plan, PlanDocument,
};

/// Reads plan documents from a mix of `.json` files (file stem = plan id)
/// and `.zip` archives (top-level `.json` entries, entry stem = plan id).
/// Any malformed document or unreadable archive fails the whole import;
/// partial imports are not supported.
pub fn read_import_files(paths: &[impl AsRef<Path>]) -> MatrixResult<Vec<(String, PlanDocument)>> {
    let mut docs: BTreeMap<String, PlanDocument> = BTreeMap::new();

    for path in paths {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => {
                let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                    return Err(MatrixError::UnsupportedImport {
                        path: path.to_path_buf(),
                    });
                };
                let content = std::fs::read_to_string(path)?;
                let doc = parse_document(path.display().to_string(), &content)?;
                docs.insert(stem.to_string(), doc);
            }
            Some("zip") => {
                let file = File::open(path)?;
                let mut archive = ZipArchive::new(file)?;
                for index in 0..archive.len() {
                    let mut entry = archive.by_index(index)?;
                    if entry.is_dir() {
                        continue;
                    }
                    let name = entry.name().to_string();
                    // Only top-level documents; nested paths are ignored.
                    if name.contains('/') || !name.ends_with(".json") {
                        warn!(entry = %name, "skipping non-document archive entry");
                        continue;
                    }
                    let mut content = String::new();
                    entry.read_to_string(&mut content)?;
                    let stem = name.trim_end_matches(".json").to_string();
                    let doc = parse_document(name, &content)?;
                    docs.insert(stem, doc);
                }
            }
            _ => {
                return Err(MatrixError::UnsupportedImport {
                    path: path.to_path_buf(),
                });
            }
        }
    }

    Ok(docs.into_iter().collect())
}

fn parse_document(name: String, content: &str) -> MatrixResult<PlanDocument> {
    serde_json::from_str(content).map_err(|source| MatrixError::ParseDocument { name, source })
}

/// Rebuilds the full plan and feature collections from imported documents.
/// Imported plans default to active and not popular; absent feature entries
/// are filled with the canonical default so the imported set is complete.
pub fn merge_import(docs: &[(String, PlanDocument)]) -> (Vec<Plan>, Vec<Feature>) {
    let mut plans = Vec::new();
    for (plan_id, _) in docs {
        let mut plan = Plan::new(plan_id.clone(), plan_name_from_id(plan_id));
        plan.is_active = true;
        plans.push(plan);
    }
    sort_plans(&mut plans);

    let keys: std::collections::BTreeSet<String> = docs
        .iter()
        .flat_map(|(_, doc)| doc.keys().cloned())
        .collect();

    let features = keys
        .iter()
        .map(|key| {
            let mut feature = Feature::new(feature_id_from_key(key), display_name_from_key(key));
            for (plan_id, doc) in docs {
                feature
                    .plans
                    .insert(plan_id.clone(), doc.get(key).cloned().unwrap_or_default());
            }
            feature
        })
        .collect();

    info!(plans = plans.len(), features = keys.len(), "import merged");
    (plans, features)
}
