pub mod config;
pub mod error;
pub mod matrix;

pub use config::{load_gating_config, CatalogSection, GatingConfig, PathsSection};
pub use error::{ConfigError, Result};
pub use matrix::{
    archive_file_name, build_matrix, change_log_json, compute_changes, load_baseline,
    plan_document, resolve_export_scope, ChangeSet, ChangeStatus, ChangedFeature, EditorSession,
    read_import_files, Feature, FeatureDraft, ImportSummary, LoadedMatrix, LongRunningAction,
    MatrixError, MatrixResult, PageImage, Plan, PlanCatalog, PlanDocument, PlanValue,
    PlanValueField, UpsellTarget,
};
