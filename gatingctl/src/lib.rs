use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use gating_core::{
    archive_file_name, build_matrix, change_log_json, compute_changes, load_baseline,
    load_gating_config, read_import_files, resolve_export_scope, ChangeSet, EditorSession,
    GatingConfig, LoadedMatrix, Plan, PlanCatalog,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] gating_core::ConfigError),
    #[error("matrix error: {0}")]
    Matrix(#[from] gating_core::MatrixError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Feature-gating matrix control interface", long_about = None)]
pub struct Cli {
    /// Path to the main gating.toml
    #[arg(long, default_value = "configs/gating.toml")]
    pub config: PathBuf,
    /// Override for the baseline plans directory
    #[arg(long)]
    pub plans_dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show a summary of the loaded matrix
    Status,
    /// Plan catalog operations
    #[command(subcommand)]
    Plan(PlanCommands),
    /// Diff edited plan documents against the baseline
    Diff(DiffArgs),
    /// Export plan documents as a zip archive
    Export(ExportArgs),
    /// Validate plan documents and print the merged summary
    Import(ImportArgs),
    /// Write the change-log bundle for edited documents
    Changelog(ChangelogArgs),
}

#[derive(Subcommand, Debug)]
pub enum PlanCommands {
    /// List plans in display order
    List(PlanListArgs),
}

#[derive(Args, Debug)]
pub struct PlanListArgs {
    /// Case-insensitive substring filter on the plan name
    #[arg(long)]
    pub query: Option<String>,
}

#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Edited documents to compare: .json files and/or .zip archives
    #[arg(required = true)]
    pub current: Vec<PathBuf>,
    /// Write the change log to this file instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Edited documents; when given, the export scope follows the diff
    #[arg(long = "current")]
    pub current: Vec<PathBuf>,
    /// Include plans outside the visible set when new features exist
    #[arg(long)]
    pub all_plans: bool,
    /// Archive path (defaults to a timestamped name in the working dir)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Documents to import: .json files and/or .zip archives
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ChangelogArgs {
    /// Edited documents to compare: .json files and/or .zip archives
    #[arg(required = true)]
    pub current: Vec<PathBuf>,
    /// Bundle path
    #[arg(long, default_value = "change-logs.zip")]
    pub output: PathBuf,
}

pub fn run(cli: Cli) -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Status => {
            let status = context.gather_status()?;
            render(&status, cli.format)?;
        }
        Commands::Plan(PlanCommands::List(args)) => {
            let plans = context.plan_list(args)?;
            render(&plans, cli.format)?;
        }
        Commands::Diff(args) => {
            let report = context.diff(args)?;
            match &args.output {
                Some(path) => {
                    fs::write(path, serde_json::to_string_pretty(&report.change_log)?)?;
                    println!("change log written to {}", path.display());
                }
                None => render(&report, cli.format)?,
            }
        }
        Commands::Export(args) => {
            let report = context.export(args)?;
            render(&report, cli.format)?;
        }
        Commands::Import(args) => {
            let report = context.import(args)?;
            render(&report, cli.format)?;
        }
        Commands::Changelog(args) => {
            let report = context.changelog(args)?;
            render(&report, cli.format)?;
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: GatingConfig,
    plans_dir: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config = load_gating_config(&cli.config)?;
        let plans_dir = cli.plans_dir.clone().unwrap_or_else(|| config.plans_dir());
        Ok(Self { config, plans_dir })
    }

    fn catalog(&self) -> PlanCatalog {
        self.config.catalog()
    }

    fn load_matrix(&self) -> Result<LoadedMatrix> {
        if !self.plans_dir.is_dir() {
            return Err(AppError::MissingResource(format!(
                "plans directory {} does not exist",
                self.plans_dir.display()
            )));
        }
        Ok(load_baseline(&self.plans_dir, &self.catalog())?)
    }

    /// Loads the baseline and the edited documents, returning the current
    /// matrix, the diff against the baseline, and the plan ids present only
    /// in the edited set.
    fn load_comparison(&self, current: &[PathBuf]) -> Result<(LoadedMatrix, ChangeSet, Vec<String>)> {
        let baseline = self.load_matrix()?;
        let docs = read_import_files(current)?;
        let edited = build_matrix(docs, &self.catalog());

        let changes = compute_changes(&edited.features, &baseline.features, &edited.plans);
        let newly_added = edited
            .plans
            .iter()
            .filter(|plan| !baseline.plans.iter().any(|known| known.id == plan.id))
            .map(|plan| plan.id.clone())
            .collect();
        Ok((edited, changes, newly_added))
    }

    fn gather_status(&self) -> Result<StatusReport> {
        let matrix = self.load_matrix()?;
        let session = EditorSession::new(matrix);
        Ok(StatusReport {
            plans_dir: self.plans_dir.display().to_string(),
            plans: session.plans().len(),
            features: session.features().len(),
            active_plans: session.plans().iter().filter(|plan| plan.is_active).count(),
            popular_plans: session.plans().iter().filter(|plan| plan.is_popular).count(),
            visible_plans: session.visible_plans().len(),
        })
    }

    fn plan_list(&self, args: &PlanListArgs) -> Result<PlanListReport> {
        let matrix = self.load_matrix()?;
        let query = args.query.as_deref().unwrap_or("").to_lowercase();
        let rows = matrix
            .plans
            .iter()
            .filter(|plan| plan.name.to_lowercase().contains(&query))
            .map(PlanRow::from)
            .collect();
        Ok(PlanListReport { plans: rows })
    }

    fn diff(&self, args: &DiffArgs) -> Result<DiffReport> {
        let (edited, changes, newly_added) = self.load_comparison(&args.current)?;
        let change_log = change_log_json(&changes, &newly_added, &edited.plans, Utc::now());
        Ok(DiffReport {
            modified_features: changes.len(),
            newly_added_plans: newly_added,
            change_log,
        })
    }

    fn export(&self, args: &ExportArgs) -> Result<ExportReport> {
        let output = args
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(archive_file_name(Utc::now())));

        let (features, scope) = if args.current.is_empty() {
            let matrix = self.load_matrix()?;
            (matrix.features, matrix.plans)
        } else {
            let (edited, changes, newly_added) = self.load_comparison(&args.current)?;
            let scope = resolve_export_scope(
                &changes,
                &edited.plans,
                &newly_added,
                &edited.plans,
                args.all_plans,
            );
            (edited.features, scope)
        };

        if scope.is_empty() {
            return Err(AppError::MissingResource(
                "nothing to export: no plan is in scope".to_string(),
            ));
        }

        gating_core::matrix::export_to_path(&output, &features, &scope)?;
        Ok(ExportReport {
            archive: output.display().to_string(),
            plans: scope.into_iter().map(|plan| plan.id).collect(),
        })
    }

    fn import(&self, args: &ImportArgs) -> Result<ImportReport> {
        let docs = read_import_files(&args.files)?;
        if docs.is_empty() {
            return Err(AppError::MissingResource(
                "no plan documents found in the given files".to_string(),
            ));
        }
        let (plans, features) = gating_core::matrix::merge_import(&docs);
        Ok(ImportReport {
            plans: plans.len(),
            features: features.len(),
        })
    }

    fn changelog(&self, args: &ChangelogArgs) -> Result<ChangelogReport> {
        let (edited, changes, newly_added) = self.load_comparison(&args.current)?;
        let change_log = change_log_json(&changes, &newly_added, &edited.plans, Utc::now());
        let file = fs::File::create(&args.output)?;
        gating_core::matrix::write_bundle(file, Some(&change_log), &[])?;
        Ok(ChangelogReport {
            archive: args.output.display().to_string(),
            modified_features: changes.len(),
            newly_added_plans: newly_added.len(),
        })
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    plans_dir: String,
    plans: usize,
    features: usize,
    active_plans: usize,
    popular_plans: usize,
    visible_plans: usize,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        format!(
            "{} plan(s), {} feature(s) loaded from {} — {} active, {} popular, {} visible by default",
            self.plans,
            self.features,
            self.plans_dir,
            self.active_plans,
            self.popular_plans,
            self.visible_plans
        )
    }
}

#[derive(Debug, Serialize)]
struct PlanRow {
    id: String,
    name: String,
    is_popular: bool,
    is_active: bool,
    is_nfr: bool,
}

impl From<&Plan> for PlanRow {
    fn from(plan: &Plan) -> Self {
        Self {
            id: plan.id.clone(),
            name: plan.name.clone(),
            is_popular: plan.is_popular,
            is_active: plan.is_active,
            is_nfr: plan.is_nfr(),
        }
    }
}

#[derive(Debug, Serialize)]
struct PlanListReport {
    plans: Vec<PlanRow>,
}

impl DisplayFallback for PlanListReport {
    fn display(&self) -> String {
        if self.plans.is_empty() {
            return "no plans matched".to_string();
        }
        self.plans
            .iter()
            .map(|row| {
                let mut tags = Vec::new();
                if row.is_active {
                    tags.push("active");
                }
                if row.is_popular {
                    tags.push("popular");
                }
                if row.is_nfr {
                    tags.push("nfr");
                }
                let tags = if tags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", tags.join(", "))
                };
                format!("{} — {}{}", row.id, row.name, tags)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
struct DiffReport {
    modified_features: usize,
    newly_added_plans: Vec<String>,
    change_log: Value,
}

impl DisplayFallback for DiffReport {
    fn display(&self) -> String {
        format!(
            "{} changed feature(s), {} newly added plan(s)\n{}",
            self.modified_features,
            self.newly_added_plans.len(),
            serde_json::to_string_pretty(&self.change_log).unwrap_or_default()
        )
    }
}

#[derive(Debug, Serialize)]
struct ExportReport {
    archive: String,
    plans: Vec<String>,
}

impl DisplayFallback for ExportReport {
    fn display(&self) -> String {
        format!(
            "exported {} plan(s) to {}: {}",
            self.plans.len(),
            self.archive,
            self.plans.join(", ")
        )
    }
}

#[derive(Debug, Serialize)]
struct ImportReport {
    plans: usize,
    features: usize,
}

impl DisplayFallback for ImportReport {
    fn display(&self) -> String {
        format!(
            "import OK: {} plan(s), {} feature(s)",
            self.plans, self.features
        )
    }
}

#[derive(Debug, Serialize)]
struct ChangelogReport {
    archive: String,
    modified_features: usize,
    newly_added_plans: usize,
}

impl DisplayFallback for ChangelogReport {
    fn display(&self) -> String {
        format!(
            "change-log bundle written to {} ({} changed feature(s), {} new plan(s))",
            self.archive, self.modified_features, self.newly_added_plans
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn prepare_test_context() -> (TempDir, AppContext) {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let configs_dir = root.join("configs");
        fs::create_dir_all(&configs_dir).unwrap();
        let plans_dir = root.join("plans");
        fs::create_dir_all(&plans_dir).unwrap();

        fs::write(
            configs_dir.join("gating.toml"),
            format!(
                "[paths]\nbase_dir = {root:?}\nplans_dir = \"plans\"\n\n\
                 [catalog]\npopular = [\"prime_plus\"]\nactive = [\"starter\", \"prime_plus\"]\n",
                root = root.display().to_string()
            ),
        )
        .unwrap();
        fs::write(
            plans_dir.join("starter.json"),
            r#"{"FOO_BAR": {"canEnabled": true}, "AUDIT_LOG": {}}"#,
        )
        .unwrap();
        fs::write(
            plans_dir.join("prime_plus.json"),
            r#"{"FOO_BAR": {"canEnabled": true, "canEnabledInTrial": true}}"#,
        )
        .unwrap();

        let cli = Cli::parse_from([
            "gatingctl",
            "--config",
            configs_dir.join("gating.toml").to_str().unwrap(),
            "status",
        ]);
        let context = AppContext::new(&cli).unwrap();
        (temp, context)
    }

    #[test]
    fn status_counts_the_loaded_matrix() {
        let (_temp, context) = prepare_test_context();
        let status = context.gather_status().unwrap();
        assert_eq!(status.plans, 2);
        assert_eq!(status.features, 2);
        assert_eq!(status.active_plans, 2);
        assert_eq!(status.popular_plans, 1);
    }

    #[test]
    fn plan_list_filters_by_name() {
        let (_temp, context) = prepare_test_context();
        let report = context
            .plan_list(&PlanListArgs {
                query: Some("prime".to_string()),
            })
            .unwrap();
        assert_eq!(report.plans.len(), 1);
        assert_eq!(report.plans[0].id, "prime_plus");
    }

    #[test]
    fn diff_flags_edited_documents() {
        let (temp, context) = prepare_test_context();
        let edited = temp.path().join("starter.json");
        fs::write(
            &edited,
            r#"{"FOO_BAR": {"canEnabled": false}, "AUDIT_LOG": {}}"#,
        )
        .unwrap();

        let report = context
            .diff(&DiffArgs {
                current: vec![edited],
                output: None,
            })
            .unwrap();
        assert_eq!(report.modified_features, 1);
        assert!(report.change_log["changedFeatures"]["Foo Bar"]["changes"]["starter"]
            ["changes"]["canEnabled"]
            .is_object());
    }

    #[test]
    fn export_scopes_to_changed_columns() {
        let (temp, context) = prepare_test_context();
        let edited = temp.path().join("starter.json");
        fs::write(
            &edited,
            r#"{"FOO_BAR": {"canEnabled": true, "canEnabledWithFlag": true}, "AUDIT_LOG": {}}"#,
        )
        .unwrap();
        let output = temp.path().join("out.zip");

        let report = context
            .export(&ExportArgs {
                current: vec![edited],
                all_plans: false,
                output: Some(output.clone()),
            })
            .unwrap();
        assert_eq!(report.plans, vec!["starter".to_string()]);
        assert!(output.is_file());
    }

    #[test]
    fn import_summarizes_merged_documents() {
        let (temp, context) = prepare_test_context();
        let file = temp.path().join("premium-2024.json");
        fs::write(&file, r#"{"NEW_WORLD": {"canEnabled": true}}"#).unwrap();

        let report = context.import(&ImportArgs { files: vec![file] }).unwrap();
        assert_eq!(report.plans, 1);
        assert_eq!(report.features, 1);
    }
}
