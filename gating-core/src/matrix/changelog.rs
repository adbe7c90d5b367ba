use std::io::{Cursor, Seek, Write};

use chrono::{DateTime, SecondsFormat, Utc};
use image::{DynamicImage, ImageOutputFormat, RgbaImage};
use serde_json::{Map, Value};
use tracing::info;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::diff::ChangeSet;
use super::error::{MatrixError, MatrixResult};
use super::models::Plan;

/// One pre-rasterized change-log page, handed over by the external
/// renderer as a raw RGBA buffer. The engine only encodes and bundles it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Builds the `change-logs.json` payload: timestamp, summary counts, the
/// name-keyed diff, and the newly-added-plan records. Unknown plan ids keep
/// a null `planName` rather than failing.
pub fn change_log_json(
    changes: &ChangeSet,
    newly_added_plans: &[String],
    all_plans: &[Plan],
    timestamp: DateTime<Utc>,
) -> Value {
    let mut summary = Map::new();
    summary.insert("modifiedFeatures".into(), Value::from(changes.len()));
    summary.insert("newlyAddedPlans".into(), Value::from(newly_added_plans.len()));

    let new_plans: Vec<Value> = newly_added_plans
        .iter()
        .map(|plan_id| {
            let plan_name = all_plans
                .iter()
                .find(|plan| &plan.id == plan_id)
                .map(|plan| Value::String(plan.name.clone()))
                .unwrap_or(Value::Null);
            let mut record = Map::new();
            record.insert("planId".into(), Value::String(plan_id.clone()));
            record.insert("planName".into(), plan_name);
            Value::Object(record)
        })
        .collect();

    let mut root = Map::new();
    root.insert(
        "timestamp".into(),
        Value::String(timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    root.insert("summary".into(), Value::Object(summary));
    root.insert("changedFeatures".into(), Value::Object(changes.by_name()));
    root.insert("newlyAddedPlans".into(), Value::Array(new_plans));
    Value::Object(root)
}

/// Writes the change-log bundle: the JSON payload (when given) and one
/// numbered PNG per page.
pub fn write_bundle<W: Write + Seek>(
    writer: W,
    json: Option<&Value>,
    pages: &[PageImage],
) -> MatrixResult<()> {
    let mut archive = ZipWriter::new(writer);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    if let Some(json) = json {
        archive.start_file("change-logs.json", options)?;
        archive.write_all(serde_json::to_string_pretty(json)?.as_bytes())?;
    }

    for (index, page) in pages.iter().enumerate() {
        let png = encode_page(page)?;
        archive.start_file(format!("change-logs-page-{}.png", index + 1), options)?;
        archive.write_all(&png)?;
    }

    archive.finish()?;
    info!(pages = pages.len(), "change-log bundle written");
    Ok(())
}

fn encode_page(page: &PageImage) -> MatrixResult<Vec<u8>> {
    let image = RgbaImage::from_raw(page.width, page.height, page.pixels.clone()).ok_or(
        MatrixError::InvalidPage {
            width: page.width,
            height: page.height,
            len: page.pixels.len(),
        },
    )?;
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image).write_to(&mut buffer, ImageOutputFormat::Png)?;
    Ok(buffer.into_inner())
}
