use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::{info, warn};

use crate::error::{PassError, Result};
use crate::fields::{self, ResolvedFields};
use crate::record::{FIELD_ACCESS_KEY, FIELD_ID, RunnerRecord};
use crate::wallet_config::{AppleWalletConfig, CohortPalette};

pub const FORMAT_VERSION: u8 = 1;
pub const DEFAULT_FOREGROUND: &str = "rgb(255, 255, 255)";
pub const DEFAULT_BACKGROUND: &str = "rgb(0, 0, 0)";
pub const DEFAULT_LABEL: &str = "rgb(255, 255, 255)";
pub const BARCODE_ENCODING: &str = "utf-8";
pub const DEFAULT_EXPIRY: Duration = Duration::days(365);

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|err| panic!("descriptor regex `{pattern}`: {err}"))
}

static RGB: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)^rgb\(\s*(\d{1,3})\s*,\s*(\d{1,3})\s*,\s*(\d{1,3})\s*\)$")
});
static HEX: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^#([0-9A-Fa-f]{2})([0-9A-Fa-f]{2})([0-9A-Fa-f]{2})$"));
static PASS_TYPE_ID: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)^pass\.([a-z0-9-]+\.)+[a-z]{2,}$"));
static TEAM_ID: LazyLock<Regex> = LazyLock::new(|| compile(r"^[A-Za-z0-9]{10}$"));

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Barcode {
    pub message: String,
    pub format: String,
    pub message_encoding: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevant_text: Option<String>,
}

/// The `pass.json` document of a generic pass.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassDescriptor {
    pub format_version: u8,
    pub pass_type_identifier: String,
    pub serial_number: String,
    pub team_identifier: String,
    pub organization_name: String,
    pub description: String,
    pub foreground_color: String,
    pub background_color: String,
    pub label_color: String,
    pub generic: ResolvedFields,
    pub barcodes: Vec<Barcode>,
    /// Singular form read by older Wallet versions.
    pub barcode: Barcode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevant_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<Location>>,
}

impl PassDescriptor {
    /// Pretty-printed JSON with two-space indentation. These exact bytes are hashed.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|err| PassError::Packaging(format!("failed to encode pass.json: {err}")))
    }
}

/// Assembles `pass.json` for `record` at generation instant `now`.
pub fn build_descriptor(
    config: &AppleWalletConfig,
    palette: &CohortPalette,
    record: &RunnerRecord,
    now: OffsetDateTime,
) -> Result<PassDescriptor> {
    let pass_type_identifier = required(config.pass_type_id.as_deref(), "passTypeId")?;
    let team_identifier = required(config.team_id.as_deref(), "teamId")?;
    let organization_name = required(config.organization_name.as_deref(), "organizationName")?;
    let description = required(config.description.as_deref(), "description")?;
    warn_on_identifier_format(&pass_type_identifier, &team_identifier);

    let generic = fields::resolve(&config.field_mappings, record)?;

    let serial_number = record
        .non_blank(FIELD_ACCESS_KEY)
        .or_else(|| record.non_blank(FIELD_ID))
        .map(|serial| serial.trim().to_string())
        .ok_or_else(|| {
            PassError::Validation("runner must have an access_key or id for the serial number".into())
        })?;

    let source = config.barcode_value_source();
    let message = match record.non_blank(source) {
        Some(value) => value.trim().to_string(),
        None => {
            warn!(source, "barcode source field is empty; using the serial number");
            serial_number.clone()
        }
    };
    let barcode = Barcode {
        message,
        format: config.barcode_format().to_string(),
        message_encoding: BARCODE_ENCODING.to_string(),
    };

    let background_color = match palette.lookup(record) {
        Some(cohort) => {
            info!(cohort = %cohort.value, color = %cohort.background_color, "cohort background override");
            parse_color(&cohort.background_color, "cohort_palette.backgroundColor")?
        }
        None => color_or(config.background_color.as_deref(), DEFAULT_BACKGROUND, "backgroundColor")?,
    };

    let locations = config.coordinates().map(|(latitude, longitude)| {
        vec![Location {
            latitude,
            longitude,
            relevant_text: config.relevant_text.clone(),
        }]
    });

    Ok(PassDescriptor {
        format_version: FORMAT_VERSION,
        pass_type_identifier,
        serial_number,
        team_identifier,
        organization_name,
        description,
        foreground_color: color_or(config.foreground_color.as_deref(), DEFAULT_FOREGROUND, "foregroundColor")?,
        background_color,
        label_color: color_or(config.label_color.as_deref(), DEFAULT_LABEL, "labelColor")?,
        generic,
        barcodes: vec![barcode.clone()],
        barcode,
        logo_text: config.logo_text.clone(),
        relevant_date: relevant_date(config.relevant_date.as_deref(), now),
        expiration_date: expiration_date(config.expiration_date.as_deref(), now),
        locations,
    })
}

fn required(value: Option<&str>, field: &str) -> Result<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PassError::Validation(format!("{field} is required")))
}

fn warn_on_identifier_format(pass_type_identifier: &str, team_identifier: &str) {
    if !PASS_TYPE_ID.is_match(pass_type_identifier) {
        warn!(
            pass_type_identifier,
            "passTypeId does not look like pass.<reverse-domain>"
        );
    }
    if !TEAM_ID.is_match(team_identifier) {
        warn!(team_identifier, "teamId is not 10 alphanumeric characters");
    }
}

fn relevant_date(raw: Option<&str>, now: OffsetDateTime) -> Option<String> {
    let raw = raw?;
    let Some(instant) = parse_date(raw) else {
        warn!(relevant_date = raw, "ignoring unparseable relevantDate");
        return None;
    };
    if instant < now {
        warn!(
            relevant_date = %format_date(instant),
            "relevantDate is in the past and would mark the pass expired; omitting it"
        );
        return None;
    }
    Some(format_date(instant))
}

fn expiration_date(raw: Option<&str>, now: OffsetDateTime) -> Option<String> {
    match raw {
        None => Some(format_date(now + DEFAULT_EXPIRY)),
        Some(raw) => match parse_date(raw) {
            Some(instant) => Some(format_date(instant)),
            None => {
                warn!(expiration_date = raw, "ignoring unparseable expirationDate");
                None
            }
        },
    }
}

/// Parses RFC 3339, or the offset-less `YYYY-MM-DDTHH:MM[:SS]` and
/// `YYYY-MM-DD` forms as UTC.
pub fn parse_date(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if let Ok(instant) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(instant);
    }
    let with_seconds = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    let minutes = format_description!("[year]-[month]-[day]T[hour]:[minute]");
    if let Ok(local) = PrimitiveDateTime::parse(raw, with_seconds)
        .or_else(|_| PrimitiveDateTime::parse(raw, minutes))
    {
        return Some(local.assume_utc());
    }
    let date_only = format_description!("[year]-[month]-[day]");
    time::Date::parse(raw, date_only)
        .ok()
        .map(|date| date.midnight().assume_utc())
}

/// RFC 3339 in UTC at second precision, e.g. `2026-05-28T12:00:00Z`.
pub fn format_date(instant: OffsetDateTime) -> String {
    let utc = instant.to_offset(UtcOffset::UTC);
    let truncated = utc.replace_nanosecond(0).unwrap_or(utc);
    truncated
        .format(&Rfc3339)
        .unwrap_or_else(|_| truncated.unix_timestamp().to_string())
}

fn color_or(value: Option<&str>, default: &str, field: &str) -> Result<String> {
    match value {
        Some(raw) => parse_color(raw, field),
        None => Ok(default.to_string()),
    }
}

/// Accepts `rgb(r, g, b)` or `#rrggbb` and renders `rgb(r, g, b)`.
pub fn parse_color(raw: &str, field: &str) -> Result<String> {
    let raw = raw.trim();
    let channels: Option<[u8; 3]> = if let Some(caps) = RGB.captures(raw) {
        let channel = |idx: usize| caps[idx].parse::<u8>().ok();
        channel(1).zip(channel(2)).zip(channel(3)).map(|((r, g), b)| [r, g, b])
    } else if let Some(caps) = HEX.captures(raw) {
        let channel = |idx: usize| u8::from_str_radix(&caps[idx], 16).ok();
        channel(1).zip(channel(2)).zip(channel(3)).map(|((r, g), b)| [r, g, b])
    } else {
        None
    };
    let [r, g, b] = channels.ok_or_else(|| {
        PassError::config(field, format!("`{raw}` is not an rgb(r, g, b) or #rrggbb colour"))
    })?;
    Ok(format!("rgb({r}, {g}, {b})"))
}
