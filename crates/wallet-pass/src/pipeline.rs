use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, warn};

use crate::assets::{ImageSource, fetch_pass_images};
use crate::builder::{PassBundle, PassPackager};
use crate::certs::SigningIdentity;
use crate::descriptor::build_descriptor;
use crate::error::{PassError, Result};
use crate::google::jwt::sign_save_token;
use crate::google::object::{GenericPass, build_generic_object};
use crate::google::rest::WalletRestClient;
use crate::google::{GoogleSaveLink, GoogleServiceAccount};
use crate::record::RunnerRecord;
use crate::wallet_config::WalletConfig;

/// Everything needed to issue one Apple pass.
#[derive(Clone, Debug)]
pub struct ApplePassRequest {
    pub runner: RunnerRecord,
    pub config: WalletConfig,
    pub identity: Arc<SigningIdentity>,
    /// Generation instant; drives date rules, the signing time and the file name.
    pub now: OffsetDateTime,
}

impl ApplePassRequest {
    pub fn new(runner: RunnerRecord, config: WalletConfig, identity: Arc<SigningIdentity>) -> Self {
        Self {
            runner,
            config,
            identity,
            now: OffsetDateTime::now_utc(),
        }
    }

    pub fn at(mut self, now: OffsetDateTime) -> Self {
        self.now = now;
        self
    }
}

/// Resolves fields, builds `pass.json`, fetches artwork, signs and zips.
pub async fn build_apple_pass(request: ApplePassRequest, images: &dyn ImageSource) -> Result<PassBundle> {
    let apple = request
        .config
        .apple_wallet_config
        .as_ref()
        .ok_or_else(|| PassError::config("apple_wallet_config", "Apple Wallet is not configured"))?;
    let descriptor = build_descriptor(apple, &request.config.cohort_palette, &request.runner, request.now)?;
    let pass_json = descriptor.to_json_bytes()?;
    info!(serial = %descriptor.serial_number, "building apple pass");

    let artwork = fetch_pass_images(images, apple).await;
    PassPackager::new(descriptor.serial_number, pass_json)
        .with_images(&artwork)
        .build(request.identity.as_ref(), request.now)
}

/// Everything needed to issue one Google Wallet save link.
#[derive(Clone, Debug)]
pub struct GooglePassRequest {
    pub runner: RunnerRecord,
    pub config: WalletConfig,
    pub account: Arc<GoogleServiceAccount>,
    /// Push the object to Google as well, for passes already saved by the runner.
    pub update: bool,
    pub now: OffsetDateTime,
}

impl GooglePassRequest {
    pub fn new(runner: RunnerRecord, config: WalletConfig, account: Arc<GoogleServiceAccount>) -> Self {
        Self {
            runner,
            config,
            account,
            update: false,
            now: OffsetDateTime::now_utc(),
        }
    }

    pub fn updating(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    pub fn at(mut self, now: OffsetDateTime) -> Self {
        self.now = now;
        self
    }
}

/// Builds the generic object, syncs it with Google when a client is given,
/// and signs the save link. REST failures are logged and ignored.
pub async fn issue_google_pass(
    request: GooglePassRequest,
    rest: Option<&WalletRestClient>,
) -> Result<GoogleSaveLink> {
    let pass = build_generic_object(&request.config.google, &request.config.cohort_palette, &request.runner)?;
    info!(object_id = %pass.object_id(), update = request.update, "issuing google pass");

    if let Some(rest) = rest {
        sync_with_google(rest, &request, &pass).await;
    }

    let jwt = sign_save_token(&request.account, &pass, request.now)?;
    Ok(GoogleSaveLink::new(&jwt, pass.object_id(), request.update))
}

async fn sync_with_google(rest: &WalletRestClient, request: &GooglePassRequest, pass: &GenericPass) {
    if pass.class.is_none() && !request.update {
        return;
    }
    let token = match rest.access_token(&request.account, request.now).await {
        Ok(token) => token,
        Err(err) => {
            warn!(error = %err, "google access token unavailable; skipping REST updates");
            return;
        }
    };
    if let Some(class) = &pass.class
        && let Err(err) = rest.put_class(&token, class).await
    {
        warn!(class_id = %class.id, error = %err, "generic class update failed");
    }
    if request.update
        && let Err(err) = rest.patch_object(&token, &pass.object).await
    {
        warn!(object_id = %pass.object_id(), error = %err, "generic object patch failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::CertificateBundle;
    use crate::reader::open_pass;
    use async_trait::async_trait;
    use serde_json::json;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-03-01 08:00:00 UTC);

    struct NoImages;

    #[async_trait]
    impl ImageSource for NoImages {
        async fn fetch(&self, _url: &str) -> Option<Vec<u8>> {
            None
        }
    }

    fn identity() -> Arc<SigningIdentity> {
        Arc::new(
            SigningIdentity::from_bundle(&CertificateBundle {
                signer_cert: include_str!("../tests/fixtures/signer.pem").to_string(),
                signer_key: include_str!("../tests/fixtures/signer.key").to_string(),
                wwdr_cert: include_str!("../tests/fixtures/wwdr.pem").to_string(),
            })
            .unwrap(),
        )
    }

    fn config() -> WalletConfig {
        serde_json::from_value(json!({
            "issuer_id": "3388",
            "class_suffix": "race",
            "apple_wallet_config": {
                "passTypeId": "pass.com.example.race",
                "teamId": "ABCDE12345",
                "organizationName": "Example Runners",
                "description": "Example race pass",
                "field_mappings": {
                    "primaryFields": [{"key": "name", "label": "Runner", "valueTemplate": "{first_name}"}]
                }
            }
        }))
        .unwrap()
    }

    fn runner() -> RunnerRecord {
        RunnerRecord::new()
            .with("access_key", "k-1")
            .with("bib", "1024")
            .with("first_name", "Somchai")
    }

    #[tokio::test]
    async fn apple_pipeline_produces_verifiable_bundle() {
        let request = ApplePassRequest::new(runner(), config(), identity()).at(NOW);
        let bundle = build_apple_pass(request, &NoImages).await.unwrap();
        assert_eq!(bundle.serial_number, "k-1");
        assert!(bundle.file_name.starts_with("pass_k-1_"));

        let inspection = open_pass(&bundle.bytes).unwrap();
        assert_eq!(inspection.pass_json["generic"]["primaryFields"][0]["value"], "Somchai");
        assert_eq!(inspection.pass_json["barcode"]["message"], "1024");
    }

    #[tokio::test]
    async fn apple_pipeline_requires_apple_section() {
        let mut config = config();
        config.apple_wallet_config = None;
        let request = ApplePassRequest::new(runner(), config, identity()).at(NOW);
        let err = build_apple_pass(request, &NoImages).await.unwrap_err();
        assert!(matches!(err, PassError::Config { ref field, .. } if field == "apple_wallet_config"));
        assert!(err.is_tenant_error());
    }

    #[tokio::test]
    async fn google_pipeline_without_rest_client() {
        let account = GoogleServiceAccount::from_parts(
            "issuer@race-wallet.iam.gserviceaccount.com",
            include_str!("../tests/fixtures/service-account.key"),
        )
        .unwrap();
        let request = GooglePassRequest::new(runner(), config(), Arc::new(account))
            .updating(true)
            .at(NOW);
        let link = issue_google_pass(request, None).await.unwrap();
        assert_eq!(link.object_id, "3388.k-1");
        assert_eq!(link.message, "Pass updated");
        assert!(link.save_to_google_wallet_link.starts_with("https://pay.google.com/gp/v/save/ey"));
    }
}
