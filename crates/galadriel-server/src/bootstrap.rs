//! key manager and onboarding ca construction from configuration.

use std::fs;
use std::sync::Arc;

use galadriel_crypto::{DiskKeyManager, Error, KeyManager, MemoryKeyManager, Result, X509Ca};
use galadriel_types::{KeyManagerConfig, KeyManagerKind, KeyType, X509CaConfig, X509CaKind};
use tracing::info;

use crate::CA_KEY_ID;

/// common name of the self-signed in-memory ca.
pub const CA_COMMON_NAME: &str = "Galadriel Server CA";

/// open the configured key manager.
pub fn open_key_manager(config: &KeyManagerConfig) -> Result<Arc<dyn KeyManager>> {
    match config.kind {
        KeyManagerKind::Memory => {
            info!("using in-memory key manager");
            Ok(Arc::new(MemoryKeyManager::new()))
        }
        KeyManagerKind::Disk => {
            let path = config.keys_path.as_ref().ok_or_else(|| {
                Error::KeyStore("key_manager.keys_path is required for the disk key manager".into())
            })?;
            let key_manager = DiskKeyManager::open(path)?;
            info!(path = %path.display(), "using disk key manager");
            Ok(Arc::new(key_manager))
        }
    }
}

/// build the configured onboarding ca.
///
/// the memory ca self-signs a root from a key manager key and, when
/// `ca_cert_output_path` is set, writes the root pem there.
pub fn load_x509_ca(
    config: &X509CaConfig,
    key_manager: &dyn KeyManager,
    key_type: KeyType,
) -> Result<X509Ca> {
    let ca = match config.kind {
        X509CaKind::Memory => {
            let key = key_manager.get_or_generate(CA_KEY_ID, key_type)?;
            X509Ca::self_signed(&key, CA_COMMON_NAME, config.ca_ttl)?
        }
        X509CaKind::Disk => {
            let (Some(cert), Some(key)) = (&config.cert_file_path, &config.key_file_path) else {
                return Err(Error::Certificate(
                    "x509_ca.cert_file_path and x509_ca.key_file_path are required".into(),
                ));
            };
            X509Ca::load(cert, key, config.bundle_file_path.as_deref())?
        }
    };

    if let Some(path) = &config.ca_cert_output_path {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, ca.certificate_pem())?;
        info!(path = %path.display(), "wrote ca certificate");
    }
    Ok(ca)
}
