use std::sync::LazyLock;

use regex::Regex;

use crate::error::{PassError, Result};

const LINE_WIDTH: usize = 64;

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|err| panic!("pem regex `{pattern}`: {err}"))
}

static SURROUNDING_QUOTE: LazyLock<Regex> = LazyLock::new(|| compile(r#"^["']|["']$"#));
static HEADER: LazyLock<Regex> = LazyLock::new(|| compile(r"-----BEGIN ([A-Z\s]+)-----"));
static FOOTER: LazyLock<Regex> = LazyLock::new(|| compile(r"-----END ([A-Z\s]+)-----"));

/// Repairs PEM text mangled by secret stores into strict PEM.
///
/// Handles literal `\n` sequences, one layer of surrounding quotes, escaped
/// quotes and arbitrary whitespace inside the base64 body. The result is
/// `HEADER\n<body wrapped at 64 columns>\nFOOTER`. `label` names the secret in
/// errors.
pub fn normalize(raw: &str, label: &str) -> Result<String> {
    let unescaped = raw.trim().replace("\\n", "\n");
    let unquoted = SURROUNDING_QUOTE
        .replace_all(&unescaped, "")
        .replace("\\\"", "\"")
        .replace("\\'", "'");

    let header_caps = HEADER
        .captures(&unquoted)
        .ok_or_else(|| PassError::config(label, "missing -----BEGIN ...----- header"))?;
    let footer_caps = FOOTER
        .captures(&unquoted)
        .ok_or_else(|| PassError::config(label, "missing -----END ...----- footer"))?;
    let (Some(header), Some(footer)) = (header_caps.get(0), footer_caps.get(0)) else {
        return Err(PassError::config(label, "malformed PEM armour"));
    };
    if footer.start() < header.end() {
        return Err(PassError::config(label, "END footer appears before BEGIN header"));
    }
    let kind = |caps: &regex::Captures<'_>| caps.get(1).map(|m| m.as_str().trim().to_string());
    let (begin_kind, end_kind) = (kind(&header_caps), kind(&footer_caps));
    if begin_kind != end_kind {
        return Err(PassError::config(
            label,
            format!(
                "footer `END {}` does not match header `BEGIN {}`",
                end_kind.unwrap_or_default(),
                begin_kind.unwrap_or_default()
            ),
        ));
    }

    let body: String = unquoted[header.end()..footer.start()]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if body.is_empty() {
        return Err(PassError::config(label, "PEM body is empty"));
    }
    if let Some(bad) = body
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=')))
    {
        return Err(PassError::config(
            label,
            format!("PEM body contains non-base64 character {bad:?}"),
        ));
    }

    let mut out = String::with_capacity(body.len() + body.len() / LINE_WIDTH + 128);
    out.push_str(header.as_str());
    out.push('\n');
    for (idx, chunk) in body.as_bytes().chunks(LINE_WIDTH).enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        // body is ASCII-only past the alphabet check
        out.push_str(&String::from_utf8_lossy(chunk));
    }
    out.push('\n');
    out.push_str(footer.as_str());
    Ok(out)
}

/// The base64 body of a normalized PEM, without armour or line breaks.
pub(crate) fn body(normalized: &str) -> String {
    normalized
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect()
}
