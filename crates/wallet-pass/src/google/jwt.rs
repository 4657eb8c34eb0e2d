use jsonwebtoken::{Algorithm, Header};
use serde::Serialize;
use time::OffsetDateTime;

use super::GoogleServiceAccount;
use super::object::{GenericClass, GenericObject, GenericPass};
use crate::error::{PassError, Result};

pub const SAVE_AUDIENCE: &str = "google";
pub const SAVE_TYPE: &str = "savetowallet";
pub const WALLET_SCOPE: &str = "https://www.googleapis.com/auth/wallet_object.issuer";
pub const ASSERTION_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePayload<'a> {
    pub generic_objects: Vec<&'a GenericObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generic_classes: Option<Vec<&'a GenericClass>>,
}

#[derive(Debug, Serialize)]
pub struct SaveClaims<'a> {
    pub iss: &'a str,
    pub aud: &'static str,
    pub origins: Vec<String>,
    pub typ: &'static str,
    pub iat: i64,
    pub payload: SavePayload<'a>,
}

#[derive(Debug, Serialize)]
pub struct AssertionClaims<'a> {
    pub iss: &'a str,
    pub scope: &'static str,
    pub aud: &'a str,
    pub exp: i64,
    pub iat: i64,
}

fn sign<T: Serialize>(account: &GoogleServiceAccount, claims: &T) -> Result<String> {
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), claims, account.encoding_key())
        .map_err(|err| PassError::Signing(format!("failed to sign JWT: {err}")))
}

/// Save-to-wallet token embedding the object and, when present, its class.
pub fn sign_save_token(
    account: &GoogleServiceAccount,
    pass: &GenericPass,
    issued_at: OffsetDateTime,
) -> Result<String> {
    let claims = SaveClaims {
        iss: account.client_email(),
        aud: SAVE_AUDIENCE,
        origins: Vec::new(),
        typ: SAVE_TYPE,
        iat: issued_at.unix_timestamp(),
        payload: SavePayload {
            generic_objects: vec![&pass.object],
            generic_classes: pass.class.as_ref().map(|class| vec![class]),
        },
    };
    sign(account, &claims)
}

/// OAuth2 JWT-bearer assertion exchanged for an access token at `token_url`.
pub fn sign_assertion(
    account: &GoogleServiceAccount,
    token_url: &str,
    issued_at: OffsetDateTime,
) -> Result<String> {
    let iat = issued_at.unix_timestamp();
    let claims = AssertionClaims {
        iss: account.client_email(),
        scope: WALLET_SCOPE,
        aud: token_url,
        exp: iat + ASSERTION_LIFETIME_SECS,
        iat,
    };
    sign(account, &claims)
}
