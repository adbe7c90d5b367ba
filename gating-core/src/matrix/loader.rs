use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use tracing::info;
use walkdir::WalkDir;

use super::error::{MatrixError, MatrixResult};
use super::models::{
    display_name_from_key, feature_id_from_key, plan_name_from_stem, Feature, Plan, PlanDocument,
};

/// Membership sets driving the `is_popular`/`is_active` flags of loaded
/// plans. Injectable so deployments can ship their own allow-lists via
/// config.
#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    popular: BTreeSet<String>,
    active: BTreeSet<String>,
}

impl PlanCatalog {
    pub fn new(
        popular: impl IntoIterator<Item = String>,
        active: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            popular: popular.into_iter().collect(),
            active: active.into_iter().collect(),
        }
    }

    pub fn is_popular(&self, plan_id: &str) -> bool {
        self.popular.contains(plan_id)
    }

    pub fn is_active(&self, plan_id: &str) -> bool {
        self.active.contains(plan_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedMatrix {
    pub plans: Vec<Plan>,
    pub features: Vec<Feature>,
}

/// Reads every top-level `*.json` document under `dir` and builds the
/// initial matrix. File order is normalized by sorting, so two loads of the
/// same directory produce identical output.
pub fn load_baseline(dir: &Path, catalog: &PlanCatalog) -> MatrixResult<LoadedMatrix> {
    let mut docs = Vec::new();
    let mut entries: Vec<_> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| MatrixError::Io(err.into()))?;
    entries.sort_by_key(|entry| entry.path().to_path_buf());

    for entry in entries {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let content = fs::read_to_string(path)?;
        let doc: PlanDocument =
            serde_json::from_str(&content).map_err(|source| MatrixError::ParseDocument {
                name: path.display().to_string(),
                source,
            })?;
        docs.push((stem.to_string(), doc));
    }

    let matrix = build_matrix(docs, catalog);
    info!(
        plans = matrix.plans.len(),
        features = matrix.features.len(),
        dir = %dir.display(),
        "baseline loaded"
    );
    Ok(matrix)
}

/// Builds the plan and feature collections from named documents. The caller
/// clones `features` once to obtain the immutable baseline used for diffing.
pub fn build_matrix(docs: Vec<(String, PlanDocument)>, catalog: &PlanCatalog) -> LoadedMatrix {
    let mut plans = Vec::new();
    let mut data: HashMap<String, PlanDocument> = HashMap::new();

    for (stem, doc) in docs {
        let plan_id = stem.to_lowercase();
        let mut plan = Plan::new(plan_id.clone(), plan_name_from_stem(&stem));
        plan.is_popular = catalog.is_popular(&plan_id);
        plan.is_active = catalog.is_active(&plan_id);
        plans.push(plan);
        data.insert(plan_id, doc);
    }

    sort_plans(&mut plans);

    let keys: BTreeSet<String> = data
        .values()
        .flat_map(|doc| doc.keys().cloned())
        .collect();

    let features = keys
        .iter()
        .map(|key| {
            let mut feature = Feature::new(feature_id_from_key(key), display_name_from_key(key));
            for plan in &plans {
                if let Some(value) = data.get(&plan.id).and_then(|doc| doc.get(key)) {
                    feature.plans.insert(plan.id.clone(), value.clone());
                }
            }
            feature
        })
        .collect();

    LoadedMatrix { plans, features }
}

/// Orders plans into tiers: active first, then NFR, then the rest,
/// alphabetically by name inside each tier. Total and stable for identical
/// input.
pub fn sort_plans(plans: &mut [Plan]) {
    plans.sort_by(|a, b| ordering_tier(a).cmp(&ordering_tier(b)).then_with(|| a.name.cmp(&b.name)));
}

fn ordering_tier(plan: &Plan) -> u8 {
    if plan.is_active {
        0
    } else if plan.is_nfr() {
        1
    } else {
        2
    }
}
