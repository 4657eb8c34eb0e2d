use serde::Serialize;
use tracing::debug;

use crate::error::{PassError, Result};
use crate::fields::{CellPosition, TemplateToggle, info_row_id};
use crate::record::{FIELD_ACCESS_KEY, RunnerRecord};
use crate::template::{fill, fill_opt};
use crate::wallet_config::{CohortPalette, GoogleWalletConfig};

pub const GENERIC_TYPE: &str = "GENERIC_TYPE_UNSPECIFIED";
pub const DEFAULT_OFFICIAL_LINK: &str = "https://pay.google.com/gp/v/card/";
pub const OFFICIAL_LINK_ID: &str = "officialLink";
pub const OFFICIAL_LINK_DESCRIPTION: &str = "Official Website";
pub const LAT_LONG_KIND: &str = "walletobjects#latLongPoint";
pub const BARCODE_TYPE: &str = "QR_CODE";
const LANGUAGE: &str = "en";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LocalizedString {
    #[serde(rename = "defaultValue")]
    pub default_value: TranslatedString,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TranslatedString {
    pub language: String,
    pub value: String,
}

impl LocalizedString {
    pub fn english(value: impl Into<String>) -> Self {
        Self {
            default_value: TranslatedString {
                language: LANGUAGE.to_string(),
                value: value.into(),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Image {
    #[serde(rename = "sourceUri")]
    pub source_uri: ImageUri,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ImageUri {
    pub uri: String,
}

impl Image {
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self {
            source_uri: ImageUri { uri: uri.into() },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Barcode {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LatLongPoint {
    pub kind: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LinksModuleData {
    pub uris: Vec<LinkUri>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LinkUri {
    pub uri: String,
    pub description: String,
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TextModuleData {
    pub id: String,
    pub header: String,
    pub body: String,
}

/// `genericObject` resource as sent to the REST API and embedded in save links.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericObject {
    pub id: String,
    pub class_id: String,
    pub generic_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hex_background_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<Image>,
    pub card_title: LocalizedString,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<LocalizedString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subheader: Option<LocalizedString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barcode: Option<Barcode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hero_image: Option<Image>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<LatLongPoint>,
    pub links_module_data: LinksModuleData,
    pub text_modules_data: Vec<TextModuleData>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldReference {
    #[serde(rename = "fieldPath")]
    pub field_path: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldSelector {
    pub fields: Vec<FieldReference>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TemplateItem {
    #[serde(rename = "firstValue")]
    pub first_value: FieldSelector,
}

impl TemplateItem {
    /// Points a card row slot at a text module.
    pub fn text_module(id: &str) -> Self {
        Self {
            first_value: FieldSelector {
                fields: vec![FieldReference {
                    field_path: format!("object.textModulesData['{id}']"),
                }],
            },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowItems {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_item: Option<TemplateItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_item: Option<TemplateItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_item: Option<TemplateItem>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CardRowTemplateInfo {
    ThreeItems(RowItems),
    TwoItems(RowItems),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardTemplateOverride {
    pub card_row_template_infos: Vec<CardRowTemplateInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassTemplateInfo {
    pub card_template_override: CardTemplateOverride,
}

/// `genericClass` carrying only the card row layout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericClass {
    pub id: String,
    pub class_template_info: ClassTemplateInfo,
}

/// A generic object plus the class layout it needs, if any.
#[derive(Clone, Debug, PartialEq)]
pub struct GenericPass {
    pub object: GenericObject,
    pub class: Option<GenericClass>,
}

impl GenericPass {
    pub fn object_id(&self) -> &str {
        &self.object.id
    }

    pub fn class_id(&self) -> &str {
        &self.object.class_id
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| PassError::config(field, "is required for Google Wallet passes"))
}

fn toggle_text(toggle: Option<&TemplateToggle>, record: &RunnerRecord) -> Option<LocalizedString> {
    toggle
        .filter(|toggle| toggle.enabled)
        .map(|toggle| LocalizedString::english(fill(&toggle.template, record)))
}

/// Builds the generic object (and row-template class) for one runner.
pub fn build_generic_object(
    config: &GoogleWalletConfig,
    palette: &CohortPalette,
    record: &RunnerRecord,
) -> Result<GenericPass> {
    let issuer_id = required(config.issuer_id.as_deref(), "issuer_id")?;
    let class_suffix = required(config.class_suffix.as_deref(), "class_suffix")?;
    let access_key = record
        .non_blank(FIELD_ACCESS_KEY)
        .ok_or_else(|| PassError::config(FIELD_ACCESS_KEY, "runner has no access key"))?;

    let object_id = format!("{issuer_id}.{access_key}");
    let class_id = format!("{issuer_id}.{class_suffix}");
    let cohort = palette.lookup(record);
    if let Some(cohort) = cohort {
        debug!(cohort = %cohort.value, "applying cohort palette");
    }

    let mappings = &config.field_mappings;
    let barcode = mappings
        .barcode_value
        .as_ref()
        .and_then(|source| source.active_column())
        .map(|column| Barcode {
            kind: BARCODE_TYPE.to_string(),
            value: record.text(column).unwrap_or_default(),
        });

    let mut text_modules: Vec<TextModuleData> = mappings
        .text_modules
        .iter()
        .map(|module| TextModuleData {
            id: module.id.clone(),
            header: module.header.clone(),
            body: fill(&module.body_template, record),
        })
        .collect();

    let mut rows = Vec::new();
    for (row_index, row) in mappings.information_rows.iter().enumerate() {
        let mut slots = [None, None, None];
        for (slot, position) in slots.iter_mut().zip(CellPosition::ALL) {
            let Some(cell) = row.cell(position).and_then(|cell| cell.resolve(record)) else {
                continue;
            };
            let id = info_row_id(row_index, position);
            *slot = Some(TemplateItem::text_module(&id));
            text_modules.push(TextModuleData {
                id,
                header: cell.label,
                body: cell.value,
            });
        }
        let [start_item, middle_item, end_item] = slots;
        let complete = middle_item.is_some();
        if start_item.is_none() || end_item.is_none() {
            continue;
        }
        let items = RowItems {
            start_item,
            middle_item,
            end_item,
        };
        rows.push(if complete {
            CardRowTemplateInfo::ThreeItems(items)
        } else {
            CardRowTemplateInfo::TwoItems(items)
        });
    }

    let class = (!rows.is_empty()).then(|| GenericClass {
        id: class_id.clone(),
        class_template_info: ClassTemplateInfo {
            card_template_override: CardTemplateOverride {
                card_row_template_infos: rows,
            },
        },
    });

    let hero_image = cohort
        .and_then(|cohort| cohort.hero_image_uri.clone())
        .or_else(|| config.hero_image_uri.clone())
        .map(Image::from_uri);

    let object = GenericObject {
        id: object_id,
        class_id,
        generic_type: GENERIC_TYPE.to_string(),
        hex_background_color: cohort
            .map(|cohort| cohort.background_color.clone())
            .or_else(|| config.hex_background_color.clone()),
        logo: config.logo_uri.clone().map(Image::from_uri),
        card_title: LocalizedString::english(fill_opt(config.card_title.as_deref(), record)),
        header: toggle_text(mappings.header.as_ref(), record),
        subheader: toggle_text(mappings.subheader.as_ref(), record),
        barcode,
        hero_image,
        locations: config
            .coordinates()
            .map(|(latitude, longitude)| LatLongPoint {
                kind: LAT_LONG_KIND.to_string(),
                latitude,
                longitude,
            })
            .into_iter()
            .collect(),
        links_module_data: LinksModuleData {
            uris: vec![LinkUri {
                uri: config
                    .official_website_uri
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OFFICIAL_LINK.to_string()),
                description: OFFICIAL_LINK_DESCRIPTION.to_string(),
                id: OFFICIAL_LINK_ID.to_string(),
            }],
        },
        text_modules_data: text_modules,
    };

    Ok(GenericPass { object, class })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{InfoCell, InformationRow};
    use crate::wallet_config::{CohortOverride, SourceColumn, TextModule, WalletConfig};
    use serde_json::json;

    fn runner() -> RunnerRecord {
        RunnerRecord::new()
            .with("access_key", "k-77")
            .with("bib", 1024)
            .with("first_name", "Somchai")
            .with("distance", "21K")
            .with("colour_sign", "VIP")
    }

    fn config() -> GoogleWalletConfig {
        let row: WalletConfig = serde_json::from_value(json!({
            "issuer_id": "3388000000022",
            "class_suffix": "bangsaen21",
            "hex_background_color": "#112233",
            "logo_uri": "https://cdn.example.com/logo.png",
            "card_title": "Bangsaen 21 / {distance}",
            "eventLatitude": "13.28",
            "eventLongitude": 100.92,
        }))
        .unwrap();
        row.google
    }

    #[test]
    fn object_carries_identity_and_defaults() {
        let pass = build_generic_object(&config(), &CohortPalette::default(), &runner()).unwrap();
        assert_eq!(pass.object_id(), "3388000000022.k-77");
        assert_eq!(pass.class_id(), "3388000000022.bangsaen21");
        assert!(pass.class.is_none());

        let json = serde_json::to_value(&pass.object).unwrap();
        assert_eq!(json["genericType"], GENERIC_TYPE);
        assert_eq!(json["hexBackgroundColor"], "#112233");
        assert_eq!(json["logo"]["sourceUri"]["uri"], "https://cdn.example.com/logo.png");
        assert_eq!(json["cardTitle"]["defaultValue"]["value"], "Bangsaen 21 / 21K");
        assert_eq!(json["cardTitle"]["defaultValue"]["language"], "en");
        assert_eq!(json["linksModuleData"]["uris"][0]["uri"], DEFAULT_OFFICIAL_LINK);
        assert_eq!(json["linksModuleData"]["uris"][0]["id"], "officialLink");
        assert_eq!(json["locations"][0]["kind"], LAT_LONG_KIND);
        assert_eq!(json["locations"][0]["latitude"], 13.28);
        assert_eq!(json["textModulesData"], json!([]));
        assert!(json.get("heroImage").is_none());
        assert!(json.get("barcode").is_none());
        assert!(json.get("header").is_none());
    }

    #[test]
    fn header_barcode_and_text_modules() {
        let mut config = config();
        config.field_mappings.header = Some(TemplateToggle::enabled("{first_name}"));
        config.field_mappings.subheader = Some(TemplateToggle {
            enabled: false,
            template: "hidden".into(),
        });
        config.field_mappings.barcode_value = Some(SourceColumn {
            enabled: true,
            source_column: "bib".into(),
        });
        config.field_mappings.text_modules = vec![TextModule {
            id: "distance".into(),
            header: "Distance".into(),
            body_template: "{distance} course".into(),
        }];

        let pass = build_generic_object(&config, &CohortPalette::default(), &runner()).unwrap();
        let json = serde_json::to_value(&pass.object).unwrap();
        assert_eq!(json["header"]["defaultValue"]["value"], "Somchai");
        assert!(json.get("subheader").is_none());
        assert_eq!(json["barcode"], json!({"type": "QR_CODE", "value": "1024"}));
        assert_eq!(
            json["textModulesData"],
            json!([{"id": "distance", "header": "Distance", "body": "21K course"}])
        );
    }

    #[test]
    fn information_rows_become_modules_and_row_templates() {
        let mut config = config();
        config.field_mappings.text_modules = vec![TextModule {
            id: "notes".into(),
            header: "Notes".into(),
            body_template: "Bring ID".into(),
        }];
        config.field_mappings.information_rows = vec![
            InformationRow {
                left: Some(InfoCell::new("Bib", Some("{bib}"))),
                middle: Some(InfoCell::new("Distance", Some("{distance}"))),
                right: Some(InfoCell::new("{first_name}", None)),
            },
            InformationRow {
                left: Some(InfoCell::new("Gate", Some("A"))),
                middle: None,
                right: Some(InfoCell::new("Wave", Some("2"))),
            },
            InformationRow {
                left: Some(InfoCell::new("Alone", Some("x"))),
                middle: None,
                right: None,
            },
        ];

        let pass = build_generic_object(&config, &CohortPalette::default(), &runner()).unwrap();
        let modules: Vec<&str> = pass
            .object
            .text_modules_data
            .iter()
            .map(|module| module.id.as_str())
            .collect();
        assert_eq!(
            modules,
            [
                "notes",
                "info_row_0_left",
                "info_row_0_middle",
                "info_row_0_right",
                "info_row_1_left",
                "info_row_1_right",
                "info_row_2_left"
            ]
        );
        let label_only = &pass.object.text_modules_data[3];
        assert_eq!(label_only.header, "");
        assert_eq!(label_only.body, "Somchai");

        let class = serde_json::to_value(pass.class.unwrap()).unwrap();
        assert_eq!(class["id"], "3388000000022.bangsaen21");
        let rows = &class["classTemplateInfo"]["cardTemplateOverride"]["cardRowTemplateInfos"];
        assert_eq!(rows.as_array().unwrap().len(), 2);
        assert_eq!(
            rows[0]["threeItems"]["middleItem"]["firstValue"]["fields"][0]["fieldPath"],
            "object.textModulesData['info_row_0_middle']"
        );
        assert!(rows[1]["twoItems"].get("middleItem").is_none());
        assert_eq!(
            rows[1]["twoItems"]["endItem"]["firstValue"]["fields"][0]["fieldPath"],
            "object.textModulesData['info_row_1_right']"
        );
    }

    #[test]
    fn cohort_override_swaps_colour_and_hero() {
        let mut config = config();
        config.hero_image_uri = Some("https://cdn.example.com/hero.png".into());
        let palette = CohortPalette {
            field: "colour_sign".into(),
            overrides: vec![CohortOverride {
                value: "VIP".into(),
                background_color: "#70a8a7".into(),
                hero_image_uri: Some("https://cdn.example.com/vip.png".into()),
            }],
        };

        let pass = build_generic_object(&config, &palette, &runner()).unwrap();
        assert_eq!(pass.object.hex_background_color.as_deref(), Some("#70a8a7"));
        assert_eq!(
            pass.object.hero_image,
            Some(Image::from_uri("https://cdn.example.com/vip.png"))
        );

        let regular = runner().with("colour_sign", "Full");
        let pass = build_generic_object(&config, &palette, &regular).unwrap();
        assert_eq!(pass.object.hex_background_color.as_deref(), Some("#112233"));
        assert_eq!(
            pass.object.hero_image,
            Some(Image::from_uri("https://cdn.example.com/hero.png"))
        );
    }

    #[test]
    fn missing_identity_is_config_error() {
        let mut config = config();
        config.issuer_id = None;
        let err = build_generic_object(&config, &CohortPalette::default(), &runner()).unwrap_err();
        assert!(matches!(err, PassError::Config { ref field, .. } if field == "issuer_id"));

        let anonymous = RunnerRecord::new().with("bib", 1);
        let err = build_generic_object(&self::config(), &CohortPalette::default(), &anonymous)
            .unwrap_err();
        assert!(matches!(err, PassError::Config { ref field, .. } if field == "access_key"));
    }
}
