//! Google Wallet generic passes: object layout, JWT signing and the REST client.

pub mod jwt;
pub mod object;
pub mod rest;

use std::fmt;

use jsonwebtoken::EncodingKey;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{PassError, Result};
use crate::pem;

pub const SERVICE_ACCOUNT_NAME: &str = "service account";
pub const SAVE_URL_PREFIX: &str = "https://pay.google.com/gp/v/save/";

#[derive(Deserialize)]
struct RawServiceAccount {
    #[serde(default)]
    client_email: Option<String>,
    #[serde(default)]
    private_key: Option<String>,
}

/// Issuer identity used to sign save links and OAuth assertions.
#[derive(Clone)]
pub struct GoogleServiceAccount {
    client_email: String,
    encoding_key: EncodingKey,
}

impl fmt::Debug for GoogleServiceAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleServiceAccount")
            .field("client_email", &self.client_email)
            .field("encoding_key", &"<redacted>")
            .finish()
    }
}

impl GoogleServiceAccount {
    /// Parses service-account credentials JSON.
    ///
    /// Accepts the JSON object itself or a JSON string containing it, which is
    /// what secret stores tend to hand back.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(raw.trim()).map_err(|err| {
            PassError::config(SERVICE_ACCOUNT_NAME, format!("credentials are not JSON: {err}"))
        })?;
        let value = match value {
            JsonValue::String(inner) => serde_json::from_str(&inner).map_err(|err| {
                PassError::config(
                    SERVICE_ACCOUNT_NAME,
                    format!("encoded credentials are not JSON: {err}"),
                )
            })?,
            other => other,
        };
        let parsed: RawServiceAccount = serde_json::from_value(value).map_err(|err| {
            PassError::config(SERVICE_ACCOUNT_NAME, format!("unexpected credentials shape: {err}"))
        })?;

        let client_email = parsed
            .client_email
            .filter(|email| !email.trim().is_empty())
            .ok_or_else(|| PassError::config(SERVICE_ACCOUNT_NAME, "client_email is missing"))?;
        let private_key = parsed
            .private_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| PassError::config(SERVICE_ACCOUNT_NAME, "private_key is missing"))?;
        Self::from_parts(client_email, &private_key)
    }

    pub fn from_parts(client_email: impl Into<String>, private_key_pem: &str) -> Result<Self> {
        let label = format!("{SERVICE_ACCOUNT_NAME} private_key");
        let normalized = pem::normalize(private_key_pem, &label)?;
        let encoding_key = EncodingKey::from_rsa_pem(normalized.as_bytes())
            .map_err(|err| PassError::config(label, format!("not an RSA private key: {err}")))?;
        Ok(Self {
            client_email: client_email.into(),
            encoding_key,
        })
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }
}

/// Response of the Google path: the save link plus bookkeeping for the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleSaveLink {
    pub save_to_google_wallet_link: String,
    pub object_id: String,
    pub message: String,
}

impl GoogleSaveLink {
    pub fn new(jwt: &str, object_id: impl Into<String>, updated: bool) -> Self {
        Self {
            save_to_google_wallet_link: format!("{SAVE_URL_PREFIX}{jwt}"),
            object_id: object_id.into(),
            message: if updated { "Pass updated" } else { "Pass created" }.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = include_str!("../../tests/fixtures/service-account.key");

    fn credentials() -> String {
        serde_json::json!({
            "type": "service_account",
            "client_email": "issuer@race-wallet.iam.gserviceaccount.com",
            "private_key": KEY.replace('\n', "\\n"),
        })
        .to_string()
    }

    #[test]
    fn reads_plain_credentials() {
        let account = GoogleServiceAccount::from_json(&credentials()).unwrap();
        assert_eq!(account.client_email(), "issuer@race-wallet.iam.gserviceaccount.com");
    }

    #[test]
    fn reads_double_encoded_credentials() {
        let encoded = serde_json::to_string(&credentials()).unwrap();
        let account = GoogleServiceAccount::from_json(&encoded).unwrap();
        assert_eq!(account.client_email(), "issuer@race-wallet.iam.gserviceaccount.com");
    }

    #[test]
    fn missing_members_are_config_errors() {
        let err = GoogleServiceAccount::from_json(r#"{"private_key": "x"}"#).unwrap_err();
        assert!(matches!(err, PassError::Config { ref reason, .. } if reason.contains("client_email")));
        assert!(!err.is_tenant_error());

        let err = GoogleServiceAccount::from_json(r#"{"client_email": "a@b"}"#).unwrap_err();
        assert!(err.to_string().contains("private_key is missing"));
    }

    #[test]
    fn debug_output_hides_key() {
        let account = GoogleServiceAccount::from_json(&credentials()).unwrap();
        let rendered = format!("{account:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("BEGIN"));
    }

    #[test]
    fn save_link_message_tracks_update() {
        let created = GoogleSaveLink::new("abc.def.ghi", "3388.key", false);
        assert_eq!(
            created.save_to_google_wallet_link,
            "https://pay.google.com/gp/v/save/abc.def.ghi"
        );
        assert_eq!(created.message, "Pass created");
        assert_eq!(GoogleSaveLink::new("t", "o", true).message, "Pass updated");
        let json = serde_json::to_value(&created).unwrap();
        assert_eq!(json["objectId"], "3388.key");
    }
}
