use std::fs;
use std::io::Cursor;

use chrono::{TimeZone, Utc};
use gating_core::{
    build_matrix, compute_changes, load_baseline, read_import_files, resolve_export_scope,
    EditorSession, Feature, FeatureDraft, MatrixError, Plan, PlanCatalog, PlanDocument, PlanValue,
    PlanValueField,
};
use serde_json::Value;
use zip::ZipArchive;

fn document(entries: &[(&str, PlanValue)]) -> PlanDocument {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

fn enabled() -> PlanValue {
    PlanValue {
        can_enabled: true,
        ..PlanValue::default()
    }
}

fn plan(id: &str, name: &str) -> Plan {
    Plan::new(id, name)
}

fn feature(id: &str, name: &str, entries: &[(&str, PlanValue)]) -> Feature {
    let mut feature = Feature::new(id, name);
    for (plan_id, value) in entries {
        feature.plans.insert(plan_id.to_string(), value.clone());
    }
    feature
}

#[test]
fn new_features_widen_the_scope_to_visible_or_all_plans() {
    let all = vec![plan("starter", "Starter"), plan("hidden", "Hidden")];
    let visible = vec![all[0].clone()];
    let current = vec![feature("brand-new", "Brand New", &[])];
    let changes = compute_changes(&current, &[], &all);

    let scope = resolve_export_scope(&changes, &visible, &[], &all, false);
    assert_eq!(scope, visible);

    let scope = resolve_export_scope(&changes, &visible, &[], &all, true);
    assert_eq!(scope, all);
}

#[test]
fn newly_added_plans_narrow_the_scope_to_those_columns() {
    let all = vec![plan("starter", "Starter"), plan("planx", "Plan X")];
    let changes = compute_changes(&[], &[], &all);
    let newly_added = vec!["planx".to_string()];

    let scope = resolve_export_scope(&changes, &all, &newly_added, &all, false);
    assert_eq!(scope.len(), 1);
    assert_eq!(scope[0].id, "planx");
}

#[test]
fn modified_features_narrow_the_scope_to_changed_columns() {
    let all = vec![plan("planx", "Plan X"), plan("plany", "Plan Y")];
    let baseline = vec![feature(
        "sso",
        "Sso",
        &[("planx", enabled()), ("plany", enabled())],
    )];
    let mut edited = enabled();
    edited.can_enabled_with_flag = true;
    let current = vec![feature(
        "sso",
        "Sso",
        &[("planx", enabled()), ("plany", edited)],
    )];
    let changes = compute_changes(&current, &baseline, &all);

    let scope = resolve_export_scope(&changes, &all, &[], &all, false);
    assert_eq!(scope.len(), 1);
    assert_eq!(scope[0].id, "plany");
}

#[test]
fn export_then_import_round_trips_every_value() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = PlanCatalog::new(vec![], vec!["starter".to_string()]);
    let docs = vec![
        (
            "starter".to_string(),
            document(&[("FOO_BAR", enabled()), ("AUDIT_LOG", PlanValue::default())]),
        ),
        ("pro".to_string(), document(&[("FOO_BAR", enabled())])),
    ];
    let mut session = EditorSession::new(build_matrix(docs, &catalog));
    session.set_all_columns(true);

    let archive_path = dir.path().join("export.zip");
    let exported = session
        .export_full(fs::File::create(&archive_path).unwrap())
        .unwrap()
        .expect("export should not be busy");
    assert_eq!(exported.len(), 2);

    let imported = read_import_files(&[archive_path]).unwrap();
    assert_eq!(imported.len(), 2);
    let mut reimported = EditorSession::new(build_matrix(
        imported,
        &PlanCatalog::default(),
    ));
    reimported.set_all_columns(true);

    for original in session.features() {
        let counterpart = reimported
            .features()
            .iter()
            .find(|feature| feature.name == original.name)
            .expect("feature must survive the round trip");
        for plan in session.plans() {
            assert_eq!(
                counterpart.value_or_default(&plan.id),
                original.value_or_default(&plan.id),
                "value mismatch for {} under {}",
                original.name,
                plan.id
            );
        }
    }
}

#[test]
fn exported_documents_are_pretty_printed_and_default_filled() {
    let plans = vec![plan("starter", "Starter")];
    let features = vec![feature("sso", "Single Sign On", &[])];
    let mut buffer = Cursor::new(Vec::new());
    gating_core::matrix::write_archive(&mut buffer, &features, &plans).unwrap();

    let mut archive = ZipArchive::new(Cursor::new(buffer.into_inner())).unwrap();
    let mut entry = archive.by_name("starter.json").unwrap();
    let mut content = String::new();
    std::io::Read::read_to_string(&mut entry, &mut content).unwrap();

    assert!(content.contains("\n  \"SINGLE_SIGN_ON\""));
    let parsed: Value = serde_json::from_str(&content).unwrap();
    assert_eq!(parsed["SINGLE_SIGN_ON"]["canEnabled"], Value::Bool(false));
    assert_eq!(parsed["SINGLE_SIGN_ON"]["upsellAddonId"], Value::Null);
}

#[test]
fn baseline_loads_are_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("Standard-RMM-2024.json"),
        r#"{"FOO_BAR": {"canEnabled": true}}"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("partner-nfr.json"),
        r#"{"FOO_BAR": {"canEnabled": false}, "AUDIT_LOG": {}}"#,
    )
    .unwrap();
    fs::write(dir.path().join("legacy.json"), r#"{}"#).unwrap();
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let catalog = PlanCatalog::new(vec![], vec!["standard-rmm-2024".to_string()]);
    let first = load_baseline(dir.path(), &catalog).unwrap();
    let second = load_baseline(dir.path(), &catalog).unwrap();
    assert_eq!(first, second);

    let ids: Vec<_> = first.plans.iter().map(|plan| plan.id.as_str()).collect();
    assert_eq!(ids, vec!["standard-rmm-2024", "partner-nfr", "legacy"]);
    assert_eq!(first.plans[0].name, "Standard RMM 2024");

    let names: Vec<_> = first
        .features
        .iter()
        .map(|feature| feature.name.as_str())
        .collect();
    assert_eq!(names, vec!["Audit Log", "Foo Bar"]);
}

#[test]
fn malformed_documents_fail_the_whole_import() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("starter.json");
    let bad = dir.path().join("broken.json");
    fs::write(&good, r#"{"FOO_BAR": {"canEnabled": true}}"#).unwrap();
    fs::write(&bad, "{not json").unwrap();

    let result = read_import_files(&[good, bad]);
    assert!(matches!(result, Err(MatrixError::ParseDocument { .. })));
}

#[test]
fn unsupported_import_files_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    fs::write(&path, "hello").unwrap();
    assert!(matches!(
        read_import_files(&[path]),
        Err(MatrixError::UnsupportedImport { .. })
    ));
}

#[test]
fn change_log_bundle_contains_json_and_pages() {
    let catalog = PlanCatalog::new(vec![], vec!["starter".to_string()]);
    let docs = vec![("starter".to_string(), document(&[("FOO_BAR", enabled())]))];
    let mut session = EditorSession::new(build_matrix(docs, &catalog));
    let draft = FeatureDraft {
        name: "Session Replay".to_string(),
        ..FeatureDraft::default()
    };
    session.add_feature(&draft).unwrap();
    session.toggle_value("foo-bar", "starter", PlanValueField::CanEnabledWithFlag);

    let page = gating_core::PageImage {
        width: 4,
        height: 2,
        pixels: vec![255; 4 * 2 * 4],
    };
    let timestamp = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let mut buffer = Cursor::new(Vec::new());
    session
        .export_change_log(&mut buffer, std::slice::from_ref(&page), timestamp)
        .unwrap()
        .expect("change-log export should not be busy");

    let mut archive = ZipArchive::new(Cursor::new(buffer.into_inner())).unwrap();

    let mut json = String::new();
    std::io::Read::read_to_string(&mut archive.by_name("change-logs.json").unwrap(), &mut json)
        .unwrap();
    let parsed: Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["summary"]["modifiedFeatures"], Value::from(2));
    assert_eq!(parsed["changedFeatures"]["Session Replay"]["status"], "NEW");
    assert_eq!(
        parsed["changedFeatures"]["Foo Bar"]["status"],
        "MODIFIED"
    );

    let mut png = Vec::new();
    std::io::Read::read_to_end(
        &mut archive.by_name("change-logs-page-1.png").unwrap(),
        &mut png,
    )
    .unwrap();
    assert_eq!(&png[1..4], b"PNG");
}
