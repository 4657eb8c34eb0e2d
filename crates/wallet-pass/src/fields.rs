use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};

use crate::error::{PassError, Result};
use crate::record::RunnerRecord;
use crate::template::fill;

/// Apple allows at most two primary fields on a generic pass.
pub const MAX_PRIMARY_FIELDS: usize = 2;

pub const HEADER_KEY: &str = "google_header";
pub const SUBHEADER_KEY: &str = "google_subheader";

/// One configured field: `{ key?, label, valueTemplate }`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldMapping {
    pub key: Option<String>,
    pub label: String,
    pub value_template: String,
}

impl FieldMapping {
    pub fn new(key: &str, label: &str, value_template: &str) -> Self {
        Self {
            key: Some(key.to_string()),
            label: label.to_string(),
            value_template: value_template.to_string(),
        }
    }

    fn from_value(value: &JsonValue) -> Option<Self> {
        let object = value.as_object()?;
        Some(Self {
            key: string_member(object, "key").filter(|key| !key.is_empty()),
            label: string_member(object, "label").unwrap_or_default(),
            value_template: string_member(object, "valueTemplate").unwrap_or_default(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldGroup {
    Header,
    Primary,
    Secondary,
    Auxiliary,
    Back,
}

impl FieldGroup {
    pub const ALL: [FieldGroup; 5] = [
        FieldGroup::Header,
        FieldGroup::Primary,
        FieldGroup::Secondary,
        FieldGroup::Auxiliary,
        FieldGroup::Back,
    ];

    pub fn json_name(self) -> &'static str {
        match self {
            FieldGroup::Header => "headerFields",
            FieldGroup::Primary => "primaryFields",
            FieldGroup::Secondary => "secondaryFields",
            FieldGroup::Auxiliary => "auxiliaryFields",
            FieldGroup::Back => "backFields",
        }
    }
}

/// The five Apple field groups as configured.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldGroups {
    pub header_fields: Vec<FieldMapping>,
    pub primary_fields: Vec<FieldMapping>,
    pub secondary_fields: Vec<FieldMapping>,
    pub auxiliary_fields: Vec<FieldMapping>,
    pub back_fields: Vec<FieldMapping>,
}

impl FieldGroups {
    pub fn group(&self, group: FieldGroup) -> &[FieldMapping] {
        match group {
            FieldGroup::Header => &self.header_fields,
            FieldGroup::Primary => &self.primary_fields,
            FieldGroup::Secondary => &self.secondary_fields,
            FieldGroup::Auxiliary => &self.auxiliary_fields,
            FieldGroup::Back => &self.back_fields,
        }
    }

    fn group_mut(&mut self, group: FieldGroup) -> &mut Vec<FieldMapping> {
        match group {
            FieldGroup::Header => &mut self.header_fields,
            FieldGroup::Primary => &mut self.primary_fields,
            FieldGroup::Secondary => &mut self.secondary_fields,
            FieldGroup::Auxiliary => &mut self.auxiliary_fields,
            FieldGroup::Back => &mut self.back_fields,
        }
    }

    fn from_object(object: &Map<String, JsonValue>) -> Self {
        let mut groups = FieldGroups::default();
        for group in FieldGroup::ALL {
            let entries = match object.get(group.json_name()) {
                None | Some(JsonValue::Null) => continue,
                Some(JsonValue::Array(entries)) => entries,
                Some(other) => {
                    warn!(group = group.json_name(), found = json_kind(other), "field group is not an array");
                    continue;
                }
            };
            let parsed = groups.group_mut(group);
            for (index, entry) in entries.iter().enumerate() {
                match FieldMapping::from_value(entry) {
                    Some(mapping) => parsed.push(mapping),
                    None => warn!(group = group.json_name(), index, "skipping invalid field entry"),
                }
            }
        }
        groups
    }
}

/// `{ enabled, template }` as used by the header and subheader.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemplateToggle {
    pub enabled: bool,
    pub template: String,
}

impl TemplateToggle {
    pub fn enabled(template: &str) -> Self {
        Self {
            enabled: true,
            template: template.to_string(),
        }
    }

    pub(crate) fn from_value(value: &JsonValue) -> Option<Self> {
        let object = value.as_object()?;
        Some(Self {
            enabled: object
                .get("enabled")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false),
            template: string_member(object, "template").unwrap_or_default(),
        })
    }

    /// The template when enabled and non-empty.
    pub fn active_template(&self) -> Option<&str> {
        (self.enabled && !self.template.is_empty()).then_some(self.template.as_str())
    }
}

/// One cell of an information row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InfoCell {
    pub label: String,
    pub value: Option<String>,
}

impl InfoCell {
    pub fn new(label: &str, value: Option<&str>) -> Self {
        Self {
            label: label.to_string(),
            value: value.map(str::to_string),
        }
    }

    fn from_value(value: &JsonValue) -> Option<Self> {
        let object = value.as_object()?;
        Some(Self {
            label: string_member(object, "label").unwrap_or_default(),
            value: string_member(object, "value").filter(|value| !value.is_empty()),
        })
    }

    /// Filled `(label, value)` when the label resolves to visible text.
    ///
    /// A cell with no value shows its label as the body and an empty label.
    pub fn resolve(&self, record: &RunnerRecord) -> Option<ResolvedCell> {
        if self.label.is_empty() {
            return None;
        }
        let label = fill(&self.label, record);
        if label.trim().is_empty() {
            return None;
        }
        let value = self
            .value
            .as_deref()
            .map(|template| fill(template, record))
            .unwrap_or_default();
        Some(if value.trim().is_empty() {
            ResolvedCell {
                label: String::new(),
                value: label,
            }
        } else {
            ResolvedCell { label, value }
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedCell {
    pub label: String,
    pub value: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellPosition {
    Left,
    Middle,
    Right,
}

impl CellPosition {
    pub const ALL: [CellPosition; 3] = [CellPosition::Left, CellPosition::Middle, CellPosition::Right];

    pub fn as_str(self) -> &'static str {
        match self {
            CellPosition::Left => "left",
            CellPosition::Middle => "middle",
            CellPosition::Right => "right",
        }
    }
}

/// Synthetic identifier shared by the Apple field key and the Google text module.
pub fn info_row_id(row: usize, position: CellPosition) -> String {
    format!("info_row_{row}_{}", position.as_str())
}

/// A three-column information row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InformationRow {
    pub left: Option<InfoCell>,
    pub middle: Option<InfoCell>,
    pub right: Option<InfoCell>,
}

impl InformationRow {
    pub fn cell(&self, position: CellPosition) -> Option<&InfoCell> {
        match position {
            CellPosition::Left => self.left.as_ref(),
            CellPosition::Middle => self.middle.as_ref(),
            CellPosition::Right => self.right.as_ref(),
        }
    }

    fn from_value(value: &JsonValue) -> Option<Self> {
        let object = value.as_object()?;
        let cell = |name: &str| object.get(name).and_then(InfoCell::from_value);
        Some(Self {
            left: cell("left"),
            middle: cell("middle"),
            right: cell("right"),
        })
    }
}

pub(crate) fn information_rows(value: Option<&JsonValue>) -> Vec<InformationRow> {
    match value {
        Some(JsonValue::Array(rows)) => rows.iter().filter_map(InformationRow::from_value).collect(),
        Some(JsonValue::Null) | None => Vec::new(),
        Some(other) => {
            warn!(found = json_kind(other), "informationRows is not an array");
            Vec::new()
        }
    }
}

/// The header/subheader/informationRows shape shared with the Google card.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LegacyLayout {
    pub header: Option<TemplateToggle>,
    pub subheader: Option<TemplateToggle>,
    pub information_rows: Vec<InformationRow>,
}

impl LegacyLayout {
    fn from_object(object: &Map<String, JsonValue>) -> Option<Self> {
        let header = object.get("header").and_then(TemplateToggle::from_value);
        let subheader = object.get("subheader").and_then(TemplateToggle::from_value);
        let information_rows = information_rows(object.get("informationRows"));
        if header.is_none() && subheader.is_none() && information_rows.is_empty() {
            return None;
        }
        Some(Self {
            header,
            subheader,
            information_rows,
        })
    }
}

/// Field-mapping configuration in either of its stored shapes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldMappingConfig {
    Modern(FieldGroups),
    /// Legacy layout, plus whatever modern groups were stored alongside it.
    Legacy {
        layout: LegacyLayout,
        groups: FieldGroups,
    },
}

impl Default for FieldMappingConfig {
    fn default() -> Self {
        FieldMappingConfig::Modern(FieldGroups::default())
    }
}

impl FieldMappingConfig {
    /// Reads the stored JSON, which may itself be a JSON-encoded string.
    ///
    /// Anything unreadable degrades to an empty configuration.
    pub fn from_value(value: &JsonValue) -> Self {
        match value {
            JsonValue::Object(object) => {
                let groups = FieldGroups::from_object(object);
                match LegacyLayout::from_object(object) {
                    Some(layout) => FieldMappingConfig::Legacy { layout, groups },
                    None => FieldMappingConfig::Modern(groups),
                }
            }
            JsonValue::String(encoded) => match serde_json::from_str::<JsonValue>(encoded) {
                Ok(decoded @ JsonValue::Object(_)) => Self::from_value(&decoded),
                Ok(other) => {
                    warn!(found = json_kind(&other), "encoded field_mappings is not an object");
                    Self::default()
                }
                Err(err) => {
                    warn!(error = %err, "field_mappings string is not valid JSON");
                    Self::default()
                }
            },
            JsonValue::Null => Self::default(),
            other => {
                warn!(found = json_kind(other), "field_mappings is not an object");
                Self::default()
            }
        }
    }

    pub fn groups(&self) -> &FieldGroups {
        match self {
            FieldMappingConfig::Modern(groups) => groups,
            FieldMappingConfig::Legacy { groups, .. } => groups,
        }
    }

    pub fn layout(&self) -> Option<&LegacyLayout> {
        match self {
            FieldMappingConfig::Modern(_) => None,
            FieldMappingConfig::Legacy { layout, .. } => Some(layout),
        }
    }
}

/// A field as it appears in `pass.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResolvedField {
    pub key: String,
    pub label: String,
    pub value: String,
}

impl ResolvedField {
    fn new(key: impl Into<String>, label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            value: value.into(),
        }
    }
}

/// The `generic` block of `pass.json`. `primaryFields` always holds one or two entries.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedFields {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub header_fields: Vec<ResolvedField>,
    pub primary_fields: Vec<ResolvedField>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub secondary_fields: Vec<ResolvedField>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub auxiliary_fields: Vec<ResolvedField>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub back_fields: Vec<ResolvedField>,
}

impl ResolvedFields {
    pub fn group(&self, group: FieldGroup) -> &[ResolvedField] {
        match group {
            FieldGroup::Header => &self.header_fields,
            FieldGroup::Primary => &self.primary_fields,
            FieldGroup::Secondary => &self.secondary_fields,
            FieldGroup::Auxiliary => &self.auxiliary_fields,
            FieldGroup::Back => &self.back_fields,
        }
    }

    fn group_mut(&mut self, group: FieldGroup) -> &mut Vec<ResolvedField> {
        match group {
            FieldGroup::Header => &mut self.header_fields,
            FieldGroup::Primary => &mut self.primary_fields,
            FieldGroup::Secondary => &mut self.secondary_fields,
            FieldGroup::Auxiliary => &mut self.auxiliary_fields,
            FieldGroup::Back => &mut self.back_fields,
        }
    }
}

/// Fills every configured field against `record` and enforces Apple's group rules.
pub fn resolve(config: &FieldMappingConfig, record: &RunnerRecord) -> Result<ResolvedFields> {
    let mut resolved = ResolvedFields::default();
    for group in FieldGroup::ALL {
        let target = resolved.group_mut(group);
        for (index, mapping) in config.groups().group(group).iter().enumerate() {
            target.push(resolve_mapping(mapping, index, record));
        }
    }

    if let Some(layout) = config.layout() {
        append_legacy(layout, record, &mut resolved);
    }

    for group in FieldGroup::ALL {
        if group == FieldGroup::Primary {
            continue;
        }
        let entries = resolved.group_mut(group);
        let before = entries.len();
        entries.retain(|field| !field.value.is_empty());
        if entries.len() != before {
            debug!(
                group = group.json_name(),
                dropped = before - entries.len(),
                "dropped fields with empty values"
            );
        }
    }

    let primary = &mut resolved.primary_fields;
    if primary.len() > MAX_PRIMARY_FIELDS {
        warn!(
            configured = primary.len(),
            kept = MAX_PRIMARY_FIELDS,
            "primaryFields exceeds the Apple Wallet limit; extra fields dropped"
        );
        primary.truncate(MAX_PRIMARY_FIELDS);
    }
    if primary.is_empty() {
        return Err(PassError::Validation("missing primary field".to_string()));
    }
    Ok(resolved)
}

fn resolve_mapping(mapping: &FieldMapping, index: usize, record: &RunnerRecord) -> ResolvedField {
    let filled_label = fill(&mapping.label, record);
    let label = if filled_label.is_empty() {
        mapping.label.clone()
    } else {
        filled_label
    };
    let key = mapping
        .key
        .clone()
        .unwrap_or_else(|| format!("field_{index}"));
    ResolvedField::new(key, label, fill(&mapping.value_template, record))
}

fn append_legacy(layout: &LegacyLayout, record: &RunnerRecord, resolved: &mut ResolvedFields) {
    let synthesize = |toggle: Option<&TemplateToggle>, key: &str| {
        let template = toggle.and_then(TemplateToggle::active_template)?;
        let value = fill(template, record);
        (!value.trim().is_empty()).then(|| ResolvedField::new(key, "", value))
    };
    resolved
        .header_fields
        .extend(synthesize(layout.header.as_ref(), HEADER_KEY));
    resolved
        .primary_fields
        .extend(synthesize(layout.subheader.as_ref(), SUBHEADER_KEY));

    for (row_index, row) in layout.information_rows.iter().enumerate() {
        for position in CellPosition::ALL {
            let Some(cell) = row.cell(position).and_then(|cell| cell.resolve(record)) else {
                continue;
            };
            resolved.auxiliary_fields.push(ResolvedField::new(
                info_row_id(row_index, position),
                cell.label,
                cell.value,
            ));
        }
    }
}

fn string_member(object: &Map<String, JsonValue>, name: &str) -> Option<String> {
    object.get(name).and_then(JsonValue::as_str).map(str::to_string)
}

pub(crate) fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn runner() -> RunnerRecord {
        RunnerRecord::new()
            .with("bib", "1024")
            .with("first_name", "Somchai")
            .with("last_name", "Jaidee")
            .with("block", "B")
            .with("race_kit", "Kit A")
            .with("shirt", "L")
    }

    fn config(value: JsonValue) -> FieldMappingConfig {
        FieldMappingConfig::from_value(&value)
    }

    #[test]
    fn modern_groups_are_filled() {
        let cfg = config(json!({
            "primaryFields": [{"key": "bib", "label": "BIB", "valueTemplate": "{bib}"}],
            "secondaryFields": [
                {"key": "name", "label": "NAME", "valueTemplate": "{first_name} {last_name}"},
                {"key": "pace", "label": "PACE", "valueTemplate": "{pace}"}
            ],
            "auxiliaryFields": [{"label": "{race_kit}", "valueTemplate": "{shirt}"}]
        }));
        assert!(matches!(cfg, FieldMappingConfig::Modern(_)));

        let fields = resolve(&cfg, &runner()).unwrap();
        assert_eq!(fields.primary_fields, vec![ResolvedField::new("bib", "BIB", "1024")]);
        assert_eq!(
            fields.secondary_fields,
            vec![ResolvedField::new("name", "NAME", "Somchai Jaidee")]
        );
        assert_eq!(
            fields.auxiliary_fields,
            vec![ResolvedField::new("field_0", "Kit A", "L")]
        );
        assert!(fields.header_fields.is_empty());
    }

    #[test]
    fn label_that_fills_empty_keeps_raw_text() {
        let cfg = config(json!({
            "primaryFields": [{"key": "k", "label": "{unknown}", "valueTemplate": "{bib}"}]
        }));
        let fields = resolve(&cfg, &runner()).unwrap();
        assert_eq!(fields.primary_fields[0].label, "{unknown}");
    }

    #[test]
    fn empty_primary_values_are_kept() {
        let cfg = config(json!({
            "primaryFields": [{"key": "k", "label": "L", "valueTemplate": "{nothing}"}]
        }));
        let fields = resolve(&cfg, &runner()).unwrap();
        assert_eq!(fields.primary_fields.len(), 1);
        assert_eq!(fields.primary_fields[0].value, "");
    }

    #[test]
    fn primary_fields_are_truncated_to_two() {
        let entries: Vec<JsonValue> = (0..5)
            .map(|i| json!({"key": format!("p{i}"), "label": "", "valueTemplate": "{bib}"}))
            .collect();
        let fields = resolve(&config(json!({ "primaryFields": entries })), &runner()).unwrap();
        let keys: Vec<&str> = fields.primary_fields.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["p0", "p1"]);
    }

    #[test]
    fn primary_cardinality_holds_for_any_count() {
        for count in 0..6 {
            let entries: Vec<JsonValue> = (0..count)
                .map(|_| json!({"label": "x", "valueTemplate": ""}))
                .collect();
            let outcome = resolve(&config(json!({ "primaryFields": entries })), &runner());
            match outcome {
                Ok(fields) => assert!((1..=2).contains(&fields.primary_fields.len())),
                Err(err) => {
                    assert_eq!(count, 0);
                    assert!(matches!(err, PassError::Validation(_)));
                }
            }
        }
    }

    #[test]
    fn missing_primary_is_a_validation_error() {
        let err = resolve(&config(json!({"secondaryFields": []})), &runner()).unwrap_err();
        assert_eq!(err.to_string(), "validation error: missing primary field");
        assert!(err.is_tenant_error());
    }

    #[test]
    fn malformed_sections_degrade_to_empty() {
        let cfg = config(json!({
            "primaryFields": [{"key": "bib", "label": "BIB", "valueTemplate": "{bib}"}, 7, "x"],
            "secondaryFields": "not an array",
            "backFields": null
        }));
        let fields = resolve(&cfg, &runner()).unwrap();
        assert_eq!(fields.primary_fields.len(), 1);
        assert!(fields.secondary_fields.is_empty());

        assert_eq!(config(json!(42)), FieldMappingConfig::default());
        assert_eq!(config(json!("{not json")), FieldMappingConfig::default());
    }

    #[test]
    fn json_encoded_string_is_accepted() {
        let encoded = json!({"primaryFields": [{"key": "bib", "label": "BIB", "valueTemplate": "{bib}"}]})
            .to_string();
        let fields = resolve(&config(JsonValue::String(encoded)), &runner()).unwrap();
        assert_eq!(fields.primary_fields[0].value, "1024");
    }

    #[test]
    fn legacy_layout_is_converted() {
        let cfg = config(json!({
            "primaryFields": [{"key": "bib", "label": "BIB", "valueTemplate": "{bib}"}],
            "header": {"enabled": true, "template": "Bangsaen 21"},
            "subheader": {"enabled": true, "template": "{first_name} {last_name}"},
            "informationRows": [
                {
                    "left": {"label": "BLOCK", "value": "{block}"},
                    "middle": {"label": "{race_kit}"},
                    "right": {"label": "WAVE", "value": "{wave}"}
                },
                {"left": {"label": "{missing}", "value": "x"}}
            ]
        }));
        assert!(cfg.layout().is_some());

        let fields = resolve(&cfg, &runner()).unwrap();
        assert_eq!(
            fields.header_fields,
            vec![ResolvedField::new(HEADER_KEY, "", "Bangsaen 21")]
        );
        assert_eq!(
            fields.primary_fields,
            vec![
                ResolvedField::new("bib", "BIB", "1024"),
                ResolvedField::new(SUBHEADER_KEY, "", "Somchai Jaidee"),
            ]
        );
        assert_eq!(
            fields.auxiliary_fields,
            vec![
                ResolvedField::new("info_row_0_left", "BLOCK", "B"),
                ResolvedField::new("info_row_0_middle", "", "Kit A"),
                ResolvedField::new("info_row_0_right", "", "WAVE"),
            ]
        );
    }

    #[test]
    fn disabled_or_blank_legacy_header_is_skipped() {
        let cfg = config(json!({
            "primaryFields": [{"key": "bib", "label": "BIB", "valueTemplate": "{bib}"}],
            "header": {"enabled": false, "template": "Hidden"},
            "subheader": {"enabled": true, "template": "{missing}"}
        }));
        let fields = resolve(&cfg, &runner()).unwrap();
        assert!(fields.header_fields.is_empty());
        assert_eq!(fields.primary_fields.len(), 1);
    }

    #[test]
    fn subheader_alone_satisfies_primary_requirement() {
        let cfg = config(json!({
            "subheader": {"enabled": true, "template": "{first_name}"}
        }));
        let fields = resolve(&cfg, &runner()).unwrap();
        assert_eq!(fields.primary_fields[0].key, SUBHEADER_KEY);
    }

    #[test]
    fn generic_block_skips_empty_groups() {
        let cfg = config(json!({
            "primaryFields": [{"key": "bib", "label": "BIB", "valueTemplate": "{bib}"}]
        }));
        let fields = resolve(&cfg, &runner()).unwrap();
        let value = serde_json::to_value(&fields).unwrap();
        assert_eq!(
            value,
            json!({"primaryFields": [{"key": "bib", "label": "BIB", "value": "1024"}]})
        );
    }
}
