#![forbid(unsafe_code)]

pub mod assets;
pub mod builder;
pub mod certs;
pub mod descriptor;
pub mod error;
pub mod fields;
pub mod google;
pub mod pem;
pub mod pipeline;
pub mod reader;
pub mod record;
pub mod signing;
pub mod template;
pub mod wallet_config;

pub use assets::{HttpImageSource, ImageFetchOptions, ImageSource, PassImages};
pub use builder::{ManifestSigner, PassBundle, PassPackager};
pub use certs::{CertificateBundle, SigningIdentity};
pub use error::{PassError, Result};
pub use google::{GoogleSaveLink, GoogleServiceAccount};
pub use pipeline::*;
pub use reader::{PassInspection, open_pass};
pub use record::{FieldValue, RunnerRecord};
pub use wallet_config::{AppleWalletConfig, CohortPalette, GoogleWalletConfig, WalletConfig};
