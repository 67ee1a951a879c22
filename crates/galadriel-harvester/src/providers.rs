//! bundle signer and verifier plugins resolved from `providers`.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use galadriel_crypto::{BundleSigner, BundleVerifier, DiskSigner, DiskVerifier, NoopVerifier};
use galadriel_types::api::BundleUpdate;
use galadriel_types::{BundleSignerConfig, BundleVerifierConfig, HarvesterConfig};
use thiserror::Error;
use tracing::{debug, info};

/// a peer bundle no verifier accepted.
#[derive(Debug, Error)]
#[error("bundle rejected: {0}")]
pub struct Rejected(String);

/// the configured signer, if any.
pub fn load_signer(
    config: &BundleSignerConfig,
) -> Result<Option<Arc<dyn BundleSigner>>, galadriel_crypto::Error> {
    let Some(disk) = &config.disk else {
        return Ok(None);
    };
    let signer = DiskSigner::load(&disk.private_key_path, &disk.certificate_path)?;
    info!(key = ?disk.private_key_path, "loaded disk bundle signer");
    Ok(Some(Arc::new(signer)))
}

/// every configured verifier.
pub fn load_verifiers(
    config: &BundleVerifierConfig,
) -> Result<Vec<Arc<dyn BundleVerifier>>, galadriel_crypto::Error> {
    let mut verifiers: Vec<Arc<dyn BundleVerifier>> = Vec::new();
    if let Some(disk) = &config.disk {
        verifiers.push(Arc::new(DiskVerifier::load(&disk.trust_bundle_path)?));
        info!(trust_bundle = ?disk.trust_bundle_path, "loaded disk bundle verifier");
    }
    if config.noop.is_some() {
        verifiers.push(Arc::new(NoopVerifier));
        info!("noop bundle verifier configured, peer bundles are accepted unverified");
    }
    Ok(verifiers)
}

/// decides which peer bundles may be installed.
///
/// with enforcement on and at least one verifier, an update is accepted as
/// soon as any verifier accepts it. otherwise every update is accepted.
#[derive(Clone)]
pub struct VerificationPolicy {
    verifiers: Vec<Arc<dyn BundleVerifier>>,
    enforce: bool,
}

impl VerificationPolicy {
    /// policy over explicit verifiers.
    pub fn new(verifiers: Vec<Arc<dyn BundleVerifier>>, enforce: bool) -> Self {
        Self { verifiers, enforce }
    }

    /// policy from `verify_bundle_signatures` and `providers.BundleVerifier`.
    pub fn from_config(config: &HarvesterConfig) -> Result<Self, galadriel_crypto::Error> {
        Ok(Self::new(
            load_verifiers(&config.providers.bundle_verifier)?,
            config.verify_bundle_signatures,
        ))
    }

    /// true when updates are checked at all.
    pub fn is_enforced(&self) -> bool {
        self.enforce && !self.verifiers.is_empty()
    }

    /// accept or reject one peer bundle.
    pub fn check(&self, update: &BundleUpdate) -> Result<(), Rejected> {
        if !self.is_enforced() {
            return Ok(());
        }

        let signature = update
            .signature
            .as_deref()
            .map(|s| STANDARD.decode(s))
            .transpose()
            .map_err(|e| Rejected(format!("malformed signature: {e}")))?;
        let certificate = update.signing_certificate.as_deref().map(str::as_bytes);

        let mut reasons = Vec::with_capacity(self.verifiers.len());
        for verifier in &self.verifiers {
            match verifier.verify(
                update.trust_bundle.as_bytes(),
                signature.as_deref(),
                certificate,
            ) {
                Ok(()) => {
                    debug!(peer = %update.trust_domain, verifier = verifier.name(), "bundle accepted");
                    return Ok(());
                }
                Err(e) => reasons.push(format!("{}: {e}", verifier.name())),
            }
        }
        Err(Rejected(reasons.join("; ")))
    }
}
