use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One plan document as it appears on the wire: a mapping from
/// SCREAMING_SNAKE_CASE feature keys to gating values.
pub type PlanDocument = BTreeMap<String, PlanValue>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_popular: bool,
    #[serde(default)]
    pub is_active: bool,
}

impl Plan {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price: None,
            description: None,
            is_popular: false,
            is_active: false,
        }
    }

    /// "Not for resale" plans form their own ordering and visibility tier.
    pub fn is_nfr(&self) -> bool {
        self.name.to_lowercase().contains("nfr") || self.id.to_lowercase().contains("not-for-resale")
    }
}

/// Gating settings for one feature under one plan.
///
/// This is the canonical shape: booleans are always concrete (documents with
/// missing fields normalize to false on deserialization) and the upsell
/// targets are explicit nulls rather than absent keys. An *entire* missing
/// entry in [`Feature::plans`] is still meaningful and is kept distinct from
/// a present entry holding these defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanValue {
    pub can_enabled: bool,
    pub can_enabled_with_flag: bool,
    pub can_enabled_in_trial: bool,
    pub upsell_plan_id: Option<String>,
    pub upsell_addon_id: Option<String>,
}

impl PlanValue {
    pub fn field(&self, field: PlanValueField) -> Value {
        match field {
            PlanValueField::CanEnabled => Value::Bool(self.can_enabled),
            PlanValueField::CanEnabledWithFlag => Value::Bool(self.can_enabled_with_flag),
            PlanValueField::CanEnabledInTrial => Value::Bool(self.can_enabled_in_trial),
            PlanValueField::UpsellPlanId => self
                .upsell_plan_id
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
            PlanValueField::UpsellAddonId => self
                .upsell_addon_id
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        }
    }

    /// Flips a boolean sub-column and returns the new state. Upsell fields
    /// are not toggleable; the value is left untouched.
    pub fn toggle(&mut self, field: PlanValueField) -> Option<bool> {
        let slot = match field {
            PlanValueField::CanEnabled => &mut self.can_enabled,
            PlanValueField::CanEnabledWithFlag => &mut self.can_enabled_with_flag,
            PlanValueField::CanEnabledInTrial => &mut self.can_enabled_in_trial,
            PlanValueField::UpsellPlanId | PlanValueField::UpsellAddonId => return None,
        };
        *slot = !*slot;
        Some(*slot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanValueField {
    CanEnabled,
    CanEnabledWithFlag,
    CanEnabledInTrial,
    UpsellPlanId,
    UpsellAddonId,
}

impl PlanValueField {
    pub const ALL: [PlanValueField; 5] = [
        PlanValueField::CanEnabled,
        PlanValueField::CanEnabledWithFlag,
        PlanValueField::CanEnabledInTrial,
        PlanValueField::UpsellPlanId,
        PlanValueField::UpsellAddonId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanValueField::CanEnabled => "canEnabled",
            PlanValueField::CanEnabledWithFlag => "canEnabledWithFlag",
            PlanValueField::CanEnabledInTrial => "canEnabledInTrial",
            PlanValueField::UpsellPlanId => "upsellPlanId",
            PlanValueField::UpsellAddonId => "upsellAddonId",
        }
    }

    pub fn is_toggle(&self) -> bool {
        matches!(
            self,
            PlanValueField::CanEnabled
                | PlanValueField::CanEnabledWithFlag
                | PlanValueField::CanEnabledInTrial
        )
    }
}

impl fmt::Display for PlanValueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feature {
    pub id: String,
    pub name: String,
    pub plans: BTreeMap<String, PlanValue>,
}

impl Feature {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            plans: BTreeMap::new(),
        }
    }

    pub fn value_for(&self, plan_id: &str) -> Option<&PlanValue> {
        self.plans.get(plan_id)
    }

    /// The stored value for a plan, or the canonical default when the plan
    /// has no entry for this feature.
    pub fn value_or_default(&self, plan_id: &str) -> PlanValue {
        self.plans.get(plan_id).cloned().unwrap_or_default()
    }

    /// The SCREAMING_SNAKE_CASE key this feature serializes under.
    pub fn export_key(&self) -> String {
        export_key_from_name(&self.name)
    }
}

/// Normalizes a raw document key into a feature id: lowercased, with
/// non-alphanumeric runs collapsed to single hyphens.
pub fn feature_id_from_key(key: &str) -> String {
    let separators = Regex::new("[^a-z0-9]+").expect("valid regex");
    separators.replace_all(&key.to_lowercase(), "-").into_owned()
}

/// Builds a display name from a raw document key: tokens are capitalized
/// (first letter upper, rest lower) and joined with single spaces.
pub fn display_name_from_key(key: &str) -> String {
    let separators = Regex::new("[^a-zA-Z0-9]+").expect("valid regex");
    separators
        .replace_all(key, " ")
        .split_whitespace()
        .map(capitalize_lowering_rest)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Builds a plan display name from a document file stem. Unlike feature
/// names, the tail of each word keeps its original casing.
pub fn plan_name_from_stem(stem: &str) -> String {
    let separators = Regex::new("[^a-zA-Z0-9]+").expect("valid regex");
    separators
        .replace_all(stem, " ")
        .split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Plan display name used by the import path: the id is split on hyphens
/// only, each word capitalized.
pub fn plan_name_from_id(id: &str) -> String {
    id.split('-').map(capitalize).collect::<Vec<_>>().join(" ")
}

/// Derives the wire key for a feature name: uppercased, whitespace runs
/// replaced with underscores.
pub fn export_key_from_name(name: &str) -> String {
    let whitespace = Regex::new(r"\s+").expect("valid regex");
    whitespace
        .replace_all(&name.to_uppercase(), "_")
        .into_owned()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn capitalize_lowering_rest(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => {
            first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
        }
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_id_collapses_separator_runs() {
        assert_eq!(feature_id_from_key("FOO_BAR"), "foo-bar");
        assert_eq!(feature_id_from_key("API__RATE--LIMIT"), "api-rate-limit");
        assert_eq!(feature_id_from_key("SSO"), "sso");
    }

    #[test]
    fn display_name_title_cases_tokens() {
        assert_eq!(display_name_from_key("FOO_BAR"), "Foo Bar");
        assert_eq!(display_name_from_key("REMOTE_ACCESS_2FA"), "Remote Access 2fa");
    }

    #[test]
    fn plan_name_preserves_word_tails() {
        assert_eq!(plan_name_from_stem("standard-rmm-2024"), "Standard Rmm 2024");
        assert_eq!(plan_name_from_stem("super_plus"), "Super Plus");
        assert_eq!(plan_name_from_id("premium-2024"), "Premium 2024");
        assert_eq!(plan_name_from_id("super_plus"), "Super_plus");
    }

    #[test]
    fn export_key_round_trips_display_names() {
        assert_eq!(export_key_from_name("Foo Bar"), "FOO_BAR");
        assert_eq!(export_key_from_name("Remote  Access"), "REMOTE_ACCESS");
    }

    #[test]
    fn missing_document_fields_normalize_to_defaults() {
        let value: PlanValue = serde_json::from_str(r#"{"canEnabled":true}"#).unwrap();
        assert!(value.can_enabled);
        assert!(!value.can_enabled_with_flag);
        assert_eq!(value.upsell_plan_id, None);
    }

    #[test]
    fn upsell_fields_are_not_toggleable() {
        let mut value = PlanValue::default();
        assert_eq!(value.toggle(PlanValueField::CanEnabled), Some(true));
        assert_eq!(value.toggle(PlanValueField::CanEnabled), Some(false));
        assert_eq!(value.toggle(PlanValueField::UpsellPlanId), None);
    }

    #[test]
    fn nfr_detection_matches_name_and_id() {
        assert!(Plan::new("internal", "Partner NFR").is_nfr());
        assert!(Plan::new("legacy-not-for-resale", "Legacy").is_nfr());
        assert!(!Plan::new("starter", "Starter").is_nfr());
    }
}
