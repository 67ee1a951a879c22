//! the harvester's key and client certificate.
//!
//! the rsa key lives in a disk key manager under `data_dir/keys.json`, the
//! certificate issued for it in `data_dir/harvester.crt`. a stored certificate
//! is reused while it is valid for this trust domain; otherwise a join token is
//! needed to onboard again. a certificate is only valid together with the key
//! it was issued for.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use galadriel_crypto::{DiskKeyManager, KeyEntry, KeyManager, harvester_csr, x509};
use galadriel_types::{KeyType, TrustDomainName};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{ClientError, GaladrielClient};

/// key manager id of the harvester key
pub const HARVESTER_KEY_ID: &str = "harvester";

const KEYS_FILE: &str = "keys.json";
const CERTIFICATE_FILE: &str = "harvester.crt";

/// wait between failed renewal attempts
const RENEW_RETRY: Duration = Duration::from_secs(60);

/// errors loading or obtaining credentials.
#[derive(Debug, Error)]
pub enum CredentialsError {
    /// nothing to reuse and nothing to onboard with.
    #[error("no valid certificate at {0:?}; run with --join-token to onboard")]
    JoinTokenRequired(PathBuf),

    /// the server issued a certificate for another identity.
    #[error("issued certificate is for {0}, expected {1}")]
    WrongIdentity(String, String),

    /// the certificate was issued for a different key.
    #[error("certificate does not match the harvester key")]
    KeyMismatch,

    /// key or certificate handling failed.
    #[error(transparent)]
    Crypto(#[from] galadriel_crypto::Error),

    /// the server refused or could not be reached.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// the data directory is not usable.
    #[error("failed to access {path:?}: {source}")]
    Io {
        /// offending path
        path: PathBuf,
        /// underlying error
        source: std::io::Error,
    },
}

/// a key with a certificate issued for it.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// harvester private key
    pub key: Arc<KeyEntry>,
    /// pem client certificate
    pub certificate_pem: String,
    /// start of validity
    pub not_before: DateTime<Utc>,
    /// end of validity
    pub not_after: DateTime<Utc>,
}

impl Credentials {
    /// when the certificate should be replaced: at half its lifetime.
    pub fn renew_at(&self) -> DateTime<Utc> {
        self.not_before + (self.not_after - self.not_before) / 2
    }
}

/// the harvester's data directory.
pub struct CredentialStore {
    dir: PathBuf,
    trust_domain: TrustDomainName,
    keys: DiskKeyManager,
}

impl CredentialStore {
    /// open `dir`, creating it if needed.
    pub fn open(
        dir: impl Into<PathBuf>,
        trust_domain: TrustDomainName,
    ) -> Result<Self, CredentialsError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| CredentialsError::Io {
            path: dir.clone(),
            source,
        })?;
        let keys = DiskKeyManager::open(dir.join(KEYS_FILE))?;
        Ok(Self {
            dir,
            trust_domain,
            keys,
        })
    }

    /// path of the stored client certificate.
    pub fn certificate_path(&self) -> PathBuf {
        self.dir.join(CERTIFICATE_FILE)
    }

    /// trust domain the credentials belong to.
    pub fn trust_domain(&self) -> &TrustDomainName {
        &self.trust_domain
    }

    /// the harvester key, generated on first use.
    pub fn key(&self) -> Result<Arc<KeyEntry>, CredentialsError> {
        Ok(self.keys.get_or_generate(HARVESTER_KEY_ID, KeyType::Rsa2048)?)
    }

    /// the stored certificate, if it is present, unexpired and ours.
    pub fn load(&self, key: &Arc<KeyEntry>) -> Result<Option<Credentials>, CredentialsError> {
        let path = self.certificate_path();
        let pem = match std::fs::read_to_string(&path) {
            Ok(pem) => pem,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CredentialsError::Io { path, source }),
        };

        let credentials = match self.parse(key, pem) {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(path = ?path, error = %e, "ignoring unusable stored certificate");
                return Ok(None);
            }
        };
        if credentials.not_after <= Utc::now() {
            info!(path = ?path, not_after = %credentials.not_after, "stored certificate expired");
            return Ok(None);
        }
        Ok(Some(credentials))
    }

    /// persist a newly issued certificate.
    pub fn store(&self, key: &Arc<KeyEntry>, pem: &str) -> Result<Credentials, CredentialsError> {
        let credentials = self.parse(key, pem.to_string())?;
        let path = self.certificate_path();
        std::fs::write(&path, pem).map_err(|source| CredentialsError::Io { path, source })?;
        Ok(credentials)
    }

    fn parse(&self, key: &Arc<KeyEntry>, pem: String) -> Result<Credentials, CredentialsError> {
        let der = x509::certificates_from_pem(pem.as_bytes())?.remove(0);
        let id = x509::spiffe_id(&der)?;
        let expected = self.trust_domain.harvester_id();
        if id != expected {
            return Err(CredentialsError::WrongIdentity(
                id.to_string(),
                expected.to_string(),
            ));
        }
        if !x509::certifies_key(&der, key.public_key())? {
            return Err(CredentialsError::KeyMismatch);
        }
        Ok(Credentials {
            key: key.clone(),
            not_before: x509::not_before(&der)?,
            not_after: x509::not_after(&der)?,
            certificate_pem: pem,
        })
    }
}

/// load or obtain a client certificate and install it in `client`.
pub async fn bootstrap(
    store: &CredentialStore,
    client: &GaladrielClient,
    join_token: Option<&str>,
) -> Result<Credentials, CredentialsError> {
    let key = store.key()?;
    let credentials = match store.load(&key)? {
        Some(credentials) => {
            info!(not_after = %credentials.not_after, "reusing stored harvester certificate");
            credentials
        }
        None => {
            let token = join_token
                .ok_or_else(|| CredentialsError::JoinTokenRequired(store.certificate_path()))?;
            let csr = harvester_csr(&key, store.trust_domain())?;
            let issued = client.onboard(token, csr).await?;
            let credentials = store.store(&key, &issued.certificate)?;
            info!(
                trust_domain = %store.trust_domain(),
                not_after = %credentials.not_after,
                "onboarded with join token"
            );
            credentials
        }
    };
    client.set_identity(&credentials.key, &credentials.certificate_pem)?;
    Ok(credentials)
}

/// exchange the current certificate for a new one and install it.
pub async fn renew(
    store: &CredentialStore,
    client: &GaladrielClient,
    current: &Credentials,
) -> Result<Credentials, CredentialsError> {
    let csr = harvester_csr(&current.key, store.trust_domain())?;
    let issued = client.renew_certificate(csr).await?;
    let credentials = store.store(&current.key, &issued.certificate)?;
    client.set_identity(&credentials.key, &credentials.certificate_pem)?;
    Ok(credentials)
}

/// renew the certificate at half-life until cancelled.
pub async fn renew_loop(
    store: Arc<CredentialStore>,
    client: Arc<GaladrielClient>,
    mut current: Credentials,
    cancel: CancellationToken,
) {
    loop {
        let wait = (current.renew_at() - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        match renew(&store, &client, &current).await {
            Ok(renewed) => {
                info!(not_after = %renewed.not_after, "renewed harvester certificate");
                current = renewed;
            }
            Err(e) => {
                warn!(operation = "renew_certificate", error = %e, "certificate renewal failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RENEW_RETRY) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galadriel_crypto::{LeafParams, X509Ca};

    fn ca() -> X509Ca {
        let key = KeyEntry::generate("ca", KeyType::Rsa2048).unwrap();
        X509Ca::self_signed(&key, "test ca", Duration::from_secs(3600)).unwrap()
    }

    fn issue(ca: &X509Ca, key: &KeyEntry, name: &str) -> String {
        let td = TrustDomainName::new(name).unwrap();
        let csr = harvester_csr(key, &td).unwrap();
        ca.sign_csr(&csr, &LeafParams::harvester(&td, Duration::from_secs(3600)))
            .unwrap()
            .pem
    }

    #[test]
    fn test_key_is_stable_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let td = TrustDomainName::new("a.test").unwrap();
        let first = CredentialStore::open(dir.path(), td.clone()).unwrap().key().unwrap();
        let second = CredentialStore::open(dir.path(), td).unwrap().key().unwrap();
        assert_eq!(
            first.private_key_pem().unwrap(),
            second.private_key_pem().unwrap()
        );
    }

    #[test]
    fn test_store_and_reload_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            CredentialStore::open(dir.path(), TrustDomainName::new("a.test").unwrap()).unwrap();
        let key = store.key().unwrap();
        assert!(store.load(&key).unwrap().is_none());

        let pem = issue(&ca(), &key, "a.test");
        let stored = store.store(&key, &pem).unwrap();
        assert!(store.certificate_path().is_file());

        let loaded = store.load(&key).unwrap().expect("certificate should be reused");
        assert_eq!(loaded.not_after, stored.not_after);
        assert!(loaded.renew_at() > loaded.not_before);
        assert!(loaded.renew_at() < loaded.not_after);
    }

    #[test]
    fn test_certificate_for_other_trust_domain_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            CredentialStore::open(dir.path(), TrustDomainName::new("a.test").unwrap()).unwrap();
        let key = store.key().unwrap();
        let pem = issue(&ca(), &key, "b.test");

        assert!(matches!(
            store.store(&key, &pem),
            Err(CredentialsError::WrongIdentity(..))
        ));

        // a foreign certificate left on disk is not reused
        std::fs::write(store.certificate_path(), &pem).unwrap();
        assert!(store.load(&key).unwrap().is_none());
    }

    #[test]
    fn test_certificate_for_replaced_key_is_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let td = TrustDomainName::new("a.test").unwrap();
        let store = CredentialStore::open(dir.path(), td.clone()).unwrap();
        let key = store.key().unwrap();
        store.store(&key, &issue(&ca(), &key, "a.test")).unwrap();

        // keys.json regenerated while the certificate stayed behind
        std::fs::remove_file(dir.path().join(KEYS_FILE)).unwrap();
        let store = CredentialStore::open(dir.path(), td).unwrap();
        let replaced = store.key().unwrap();
        assert!(store.load(&replaced).unwrap().is_none());

        let pem = std::fs::read_to_string(store.certificate_path()).unwrap();
        assert!(matches!(
            store.store(&replaced, &pem),
            Err(CredentialsError::KeyMismatch)
        ));
    }
}
