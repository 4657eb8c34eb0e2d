//! Per-event wallet configuration, in the JSON shape the admin tool stores.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::fields::{self, FieldMappingConfig, InformationRow, TemplateToggle};
use crate::record::{FIELD_BIB, FIELD_COLOUR_SIGN, RunnerRecord};

pub const DEFAULT_BARCODE_FORMAT: &str = "PKBarcodeFormatQR";

/// The `apple_wallet_config` section.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppleWalletConfig {
    #[serde(default, deserialize_with = "non_blank")]
    pub pass_type_id: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub team_id: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub organization_name: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub foreground_color: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub background_color: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub label_color: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub logo_text: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub icon_uri: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub logo_uri: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub strip_image_uri: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub relevant_date: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub expiration_date: Option<String>,
    #[serde(default, deserialize_with = "coordinate")]
    pub event_latitude: Option<f64>,
    #[serde(default, deserialize_with = "coordinate")]
    pub event_longitude: Option<f64>,
    #[serde(default, deserialize_with = "non_blank")]
    pub relevant_text: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub barcode_format: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub barcode_value_source: Option<String>,
    #[serde(rename = "field_mappings", default, deserialize_with = "field_mapping_config")]
    pub field_mappings: FieldMappingConfig,
}

impl AppleWalletConfig {
    pub fn barcode_format(&self) -> &str {
        self.barcode_format.as_deref().unwrap_or(DEFAULT_BARCODE_FORMAT)
    }

    pub fn barcode_value_source(&self) -> &str {
        self.barcode_value_source.as_deref().unwrap_or(FIELD_BIB)
    }

    /// Latitude and longitude, only when both are usable numbers.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.event_latitude?, self.event_longitude?))
    }
}

/// `{ enabled, sourceColumn }` naming the runner field behind the Google barcode.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceColumn {
    pub enabled: bool,
    pub source_column: String,
}

impl SourceColumn {
    pub fn active_column(&self) -> Option<&str> {
        (self.enabled && !self.source_column.is_empty()).then_some(self.source_column.as_str())
    }
}

/// A Google text module: static header plus a templated body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextModule {
    pub id: String,
    pub header: String,
    pub body_template: String,
}

/// Field mappings of the Google generic card.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GoogleFieldMappings {
    pub header: Option<TemplateToggle>,
    pub subheader: Option<TemplateToggle>,
    pub barcode_value: Option<SourceColumn>,
    pub text_modules: Vec<TextModule>,
    pub information_rows: Vec<InformationRow>,
}

impl GoogleFieldMappings {
    /// Reads the stored JSON leniently; malformed sections become empty.
    pub fn from_value(value: &JsonValue) -> Self {
        let object = match value {
            JsonValue::Object(object) => object,
            JsonValue::String(encoded) => {
                return match serde_json::from_str::<JsonValue>(encoded) {
                    Ok(decoded @ JsonValue::Object(_)) => Self::from_value(&decoded),
                    _ => {
                        warn!("google field_mappings string is not a JSON object");
                        Self::default()
                    }
                };
            }
            _ => return Self::default(),
        };

        let text = |entry: &serde_json::Map<String, JsonValue>, name: &str| {
            entry
                .get(name)
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let barcode_value = object
            .get("barcodeValue")
            .and_then(JsonValue::as_object)
            .map(|entry| SourceColumn {
                enabled: entry
                    .get("enabled")
                    .and_then(JsonValue::as_bool)
                    .unwrap_or(false),
                source_column: text(entry, "sourceColumn"),
            });
        let text_modules = object
            .get("textModules")
            .and_then(JsonValue::as_array)
            .map(|modules| {
                modules
                    .iter()
                    .filter_map(JsonValue::as_object)
                    .map(|entry| TextModule {
                        id: text(entry, "id"),
                        header: text(entry, "header"),
                        body_template: text(entry, "bodyTemplate"),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            header: object.get("header").and_then(TemplateToggle::from_value),
            subheader: object.get("subheader").and_then(TemplateToggle::from_value),
            barcode_value,
            text_modules,
            information_rows: fields::information_rows(object.get("informationRows")),
        }
    }
}

/// Google Wallet columns of the configuration row.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GoogleWalletConfig {
    #[serde(default, deserialize_with = "non_blank")]
    pub issuer_id: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub class_suffix: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub hex_background_color: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub logo_uri: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub card_title: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub hero_image_uri: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub official_website_uri: Option<String>,
    #[serde(rename = "eventLatitude", default, deserialize_with = "coordinate")]
    pub event_latitude: Option<f64>,
    #[serde(rename = "eventLongitude", default, deserialize_with = "coordinate")]
    pub event_longitude: Option<f64>,
    #[serde(default, deserialize_with = "google_field_mappings")]
    pub field_mappings: GoogleFieldMappings,
}

impl GoogleWalletConfig {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.event_latitude?, self.event_longitude?))
    }
}

/// A cohort whose passes get a fixed background (and Google hero image).
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CohortOverride {
    pub value: String,
    pub background_color: String,
    #[serde(default)]
    pub hero_image_uri: Option<String>,
}

/// Runner-field driven colour overrides. Empty unless a deployment configures it.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct CohortPalette {
    #[serde(default = "default_cohort_field")]
    pub field: String,
    #[serde(default)]
    pub overrides: Vec<CohortOverride>,
}

impl Default for CohortPalette {
    fn default() -> Self {
        Self {
            field: default_cohort_field(),
            overrides: Vec::new(),
        }
    }
}

fn default_cohort_field() -> String {
    FIELD_COLOUR_SIGN.to_string()
}

impl CohortPalette {
    pub fn with_override(mut self, value: &str, background_color: &str) -> Self {
        self.overrides.push(CohortOverride {
            value: value.to_string(),
            background_color: background_color.to_string(),
            hero_image_uri: None,
        });
        self
    }

    pub fn lookup(&self, record: &RunnerRecord) -> Option<&CohortOverride> {
        let cohort = record.text(&self.field)?;
        self.overrides.iter().find(|entry| entry.value == cohort)
    }
}

/// One configuration row: Google columns, the Apple section and the cohort palette.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct WalletConfig {
    #[serde(flatten)]
    pub google: GoogleWalletConfig,
    #[serde(default, deserialize_with = "lenient_section")]
    pub apple_wallet_config: Option<AppleWalletConfig>,
    #[serde(default, deserialize_with = "lenient_section")]
    pub cohort_palette: CohortPalette,
}

fn non_blank<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        Some(JsonValue::String(text)) if !text.trim().is_empty() => Some(text),
        Some(JsonValue::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

/// Deserializes a whole section, falling back to its default when the stored
/// value has the wrong shape.
fn lenient_section<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(JsonValue::Null) => T::default(),
        Some(value) => serde_json::from_value(value).unwrap_or_else(|err| {
            warn!(error = %err, "ignoring malformed wallet config section");
            T::default()
        }),
    })
}

fn coordinate<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    let parsed = match value {
        Some(JsonValue::Number(number)) => number.as_f64(),
        Some(JsonValue::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(parsed.filter(|coordinate| coordinate.is_finite()))
}

fn field_mapping_config<'de, D>(deserializer: D) -> Result<FieldMappingConfig, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value
        .map(|value| FieldMappingConfig::from_value(&value))
        .unwrap_or_default())
}

fn google_field_mappings<'de, D>(deserializer: D) -> Result<GoogleFieldMappings, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value
        .map(|value| GoogleFieldMappings::from_value(&value))
        .unwrap_or_default())
}
