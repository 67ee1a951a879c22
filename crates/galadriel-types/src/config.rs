//! configuration types for the server and the harvester.
//!
//! both are decoded from toml; durations are humantime strings such as `"30s"`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, TrustDomainName};

/// rsa key sizes supported by the key manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum KeyType {
    /// 2048-bit rsa
    #[default]
    #[serde(rename = "rsa-2048")]
    Rsa2048,
    /// 4096-bit rsa
    #[serde(rename = "rsa-4096")]
    Rsa4096,
}

impl KeyType {
    /// modulus size in bits.
    pub fn bits(&self) -> usize {
        match self {
            Self::Rsa2048 => 2048,
            Self::Rsa4096 => 4096,
        }
    }
}

/// where the key manager keeps private keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyManagerKind {
    /// process lifetime only
    #[default]
    Memory,
    /// json file of pkcs#8 pem keys
    Disk,
}

/// key manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyManagerConfig {
    /// storage backend
    pub kind: KeyManagerKind,
    /// size of generated keys
    pub key_type: KeyType,
    /// key file for the disk backend
    pub keys_path: Option<PathBuf>,
}

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self {
            kind: KeyManagerKind::Memory,
            key_type: KeyType::Rsa2048,
            keys_path: None,
        }
    }
}

/// where the onboarding ca gets its root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum X509CaKind {
    /// self-signed root generated at startup
    #[default]
    Memory,
    /// root certificate and key loaded from pem files
    Disk,
}

/// onboarding certificate authority configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct X509CaConfig {
    /// ca backend
    pub kind: X509CaKind,
    /// pem ca certificate (disk)
    pub cert_file_path: Option<PathBuf>,
    /// pem ca private key (disk)
    pub key_file_path: Option<PathBuf>,
    /// pem bundle the ca certificate must chain to (disk, optional)
    pub bundle_file_path: Option<PathBuf>,
    /// write the generated root here so harvesters can trust it (memory)
    pub ca_cert_output_path: Option<PathBuf>,
    /// lifetime of the generated root (memory)
    #[serde(with = "humantime_serde")]
    pub ca_ttl: Duration,
}

impl Default for X509CaConfig {
    fn default() -> Self {
        Self {
            kind: X509CaKind::Memory,
            cert_file_path: None,
            key_file_path: None,
            bundle_file_path: None,
            ca_cert_output_path: None,
            ca_ttl: Duration::from_secs(365 * 24 * 60 * 60),
        }
    }
}

/// configuration for the galadriel server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// public tls address of the harvester surface.
    pub listen_address: String,

    /// local address of the admin surface.
    pub admin_listen_address: String,

    /// dns names and ip addresses in the serving certificate.
    pub server_names: Vec<String>,

    /// datastore connection string; the scheme selects the engine.
    pub datastore: String,

    /// audiences placed in issued jwts and required on validation.
    pub jwt_audience: Vec<String>,

    /// lifetime of issued jwts.
    #[serde(with = "humantime_serde")]
    pub jwt_ttl: Duration,

    /// lifetime of harvester client certificates.
    #[serde(with = "humantime_serde")]
    pub client_certificate_ttl: Duration,

    /// lifetime of the tls serving certificate, rotated at half-life.
    #[serde(with = "humantime_serde")]
    pub server_certificate_ttl: Duration,

    /// bound on draining in-flight requests during shutdown.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// key manager configuration.
    pub key_manager: KeyManagerConfig,

    /// onboarding ca configuration.
    pub x509_ca: X509CaConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8443".to_string(),
            admin_listen_address: "127.0.0.1:8085".to_string(),
            server_names: vec!["localhost".to_string(), "127.0.0.1".to_string()],
            datastore: "sqlite:///var/lib/galadriel/datastore.sqlite3".to_string(),
            jwt_audience: vec!["galadriel-server".to_string()],
            jwt_ttl: Duration::from_secs(10 * 60),
            client_certificate_ttl: Duration::from_secs(24 * 60 * 60),
            server_certificate_ttl: Duration::from_secs(2 * 60 * 60),
            shutdown_timeout: Duration::from_secs(15),
            log_level: "INFO".to_string(),
            key_manager: KeyManagerConfig::default(),
            x509_ca: X509CaConfig::default(),
        }
    }
}

impl ServerConfig {
    /// reject configurations the server cannot start with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.jwt_audience.is_empty() {
            return Err(Error::InvalidConfig(
                "jwt_audience must name at least one audience".to_string(),
            ));
        }
        if self.server_names.is_empty() {
            return Err(Error::InvalidConfig(
                "server_names must not be empty".to_string(),
            ));
        }
        if self.key_manager.kind == KeyManagerKind::Disk && self.key_manager.keys_path.is_none()
        {
            return Err(Error::InvalidConfig(
                "key_manager.keys_path is required for the disk key manager".to_string(),
            ));
        }
        if self.x509_ca.kind == X509CaKind::Disk
            && (self.x509_ca.cert_file_path.is_none() || self.x509_ca.key_file_path.is_none())
        {
            return Err(Error::InvalidConfig(
                "x509_ca.cert_file_path and x509_ca.key_file_path are required for the disk ca"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// disk-key bundle signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSignerConfig {
    /// pem rsa private key
    pub private_key_path: PathBuf,
    /// pem certificate for the key, shipped alongside signatures
    pub certificate_path: PathBuf,
}

/// disk-certificate bundle verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskVerifierConfig {
    /// pem bundle of certificates trusted to sign peer bundles
    pub trust_bundle_path: PathBuf,
}

/// verifier that accepts every bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoopVerifierConfig {}

/// `providers.BundleSigner.<kind>`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleSignerConfig {
    /// sign with a key on disk
    pub disk: Option<DiskSignerConfig>,
}

/// `providers.BundleVerifier.<kind>`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleVerifierConfig {
    /// verify against a trust bundle on disk
    pub disk: Option<DiskVerifierConfig>,
    /// accept everything
    pub noop: Option<NoopVerifierConfig>,
}

impl BundleVerifierConfig {
    /// true when no verifier is configured.
    pub fn is_empty(&self) -> bool {
        self.disk.is_none() && self.noop.is_none()
    }
}

/// plugin configuration blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// bundle signer plugins
    #[serde(rename = "BundleSigner")]
    pub bundle_signer: BundleSignerConfig,
    /// bundle verifier plugins
    #[serde(rename = "BundleVerifier")]
    pub bundle_verifier: BundleVerifierConfig,
}

/// configuration for the harvester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvesterConfig {
    /// trust domain of the colocated spire server (required).
    pub trust_domain: Option<TrustDomainName>,

    /// unix socket of the local admin api.
    pub harvester_socket_path: PathBuf,

    /// unix socket of the spire server api.
    pub spire_socket_path: PathBuf,

    /// host:port of the galadriel server harvester surface.
    pub galadriel_server_address: String,

    /// pem bundle used to verify the server's tls certificate.
    pub server_trust_bundle_path: Option<PathBuf>,

    /// period of the federated bundle loop.
    #[serde(with = "humantime_serde")]
    pub federated_bundles_poll_interval: Duration,

    /// period of the self bundle loop.
    #[serde(with = "humantime_serde")]
    pub spire_bundle_poll_interval: Duration,

    /// deadline of every request to the server.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// directory holding the harvester key and certificate.
    pub data_dir: PathBuf,

    /// verify peer bundle signatures when a verifier is configured.
    pub verify_bundle_signatures: bool,

    /// signer and verifier plugins.
    pub providers: ProvidersConfig,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            trust_domain: None,
            harvester_socket_path: PathBuf::from("/tmp/galadriel-harvester/api.sock"),
            spire_socket_path: PathBuf::from("/tmp/spire-server/private/api.sock"),
            galadriel_server_address: "localhost:8443".to_string(),
            server_trust_bundle_path: None,
            federated_bundles_poll_interval: Duration::from_secs(2 * 60),
            spire_bundle_poll_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            log_level: "INFO".to_string(),
            data_dir: PathBuf::from("/var/lib/galadriel-harvester"),
            verify_bundle_signatures: true,
            providers: ProvidersConfig::default(),
        }
    }
}

impl HarvesterConfig {
    /// the configured trust domain, or an error if it is missing.
    pub fn trust_domain(&self) -> Result<&TrustDomainName, Error> {
        self.trust_domain
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("trust_domain is required".to_string()))
    }

    /// reject configurations the harvester cannot start with.
    pub fn validate(&self) -> Result<(), Error> {
        self.trust_domain()?;
        if self.galadriel_server_address.is_empty() {
            return Err(Error::InvalidConfig(
                "galadriel_server_address is required".to_string(),
            ));
        }
        if self.federated_bundles_poll_interval.is_zero()
            || self.spire_bundle_poll_interval.is_zero()
        {
            return Err(Error::InvalidConfig(
                "poll intervals must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
