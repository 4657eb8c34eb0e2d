use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

use crate::record::RunnerRecord;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z0-9_]+)\}").unwrap_or_else(|err| panic!("placeholder regex: {err}"))
});

/// Substitutes `{field_name}` placeholders with values from `record`.
///
/// Missing fields become the empty string. Braces that do not wrap an
/// identifier are left untouched and substituted values are never expanded
/// again.
pub fn fill(template: &str, record: &RunnerRecord) -> String {
    if template.is_empty() {
        return String::new();
    }
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match record.text(&caps[1]) {
            Some(value) => value,
            None => {
                debug!(placeholder = &caps[0], "template placeholder not found on runner");
                String::new()
            }
        })
        .into_owned()
}

/// Like [`fill`], for optional templates.
pub fn fill_opt(template: Option<&str>, record: &RunnerRecord) -> String {
    template.map(|t| fill(t, record)).unwrap_or_default()
}
