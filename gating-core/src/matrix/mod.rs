pub mod changelog;
pub mod diff;
pub mod error;
pub mod export;
pub mod import;
pub mod loader;
pub mod models;
pub mod revert;
pub mod session;

pub use changelog::{change_log_json, write_bundle, PageImage};
pub use diff::{
    compute_changes, ChangeSet, ChangeStatus, ChangedFeature, FieldChange, PlanChange,
    PlanSnapshot,
};
pub use error::{MatrixError, MatrixResult};
pub use export::{
    archive_file_name, export_to_path, plan_document, resolve_export_scope, write_archive,
};
pub use import::{merge_import, read_import_files};
pub use loader::{build_matrix, load_baseline, sort_plans, LoadedMatrix, PlanCatalog};
pub use models::{
    display_name_from_key, export_key_from_name, feature_id_from_key, plan_name_from_id,
    plan_name_from_stem, Feature, Plan, PlanDocument, PlanValue, PlanValueField,
};
pub use revert::{revert_feature, revert_plan};
pub use session::{
    EditorSession, FeatureDraft, ImportSummary, LongRunningAction, UpsellTarget,
};
