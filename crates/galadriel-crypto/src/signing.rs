//! detached rsa signatures over trust bundles.
//!
//! signatures are pkcs#1 v1.5 with sha-256 over the exact bundle bytes. the
//! signing certificate travels with the bundle so peers can check it against
//! their own trust bundle.

use std::fs;
use std::path::Path;

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::{Error, Result, x509};

/// signature and certificate produced for a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBundle {
    /// raw signature bytes
    pub signature: Vec<u8>,
    /// pem certificate of the signing key
    pub signing_certificate: Vec<u8>,
}

/// produces signatures for the local bundle.
pub trait BundleSigner: Send + Sync {
    /// sign bundle bytes.
    fn sign(&self, data: &[u8]) -> Result<SignedBundle>;
}

/// decides whether a peer bundle may be installed.
pub trait BundleVerifier: Send + Sync {
    /// short name used in logs.
    fn name(&self) -> &'static str;

    /// accept or reject a bundle with its optional signature material.
    fn verify(
        &self,
        data: &[u8],
        signature: Option<&[u8]>,
        signing_certificate: Option<&[u8]>,
    ) -> Result<()>;
}

/// check that `signature` over `data` was made by the key in the pem certificate.
pub fn verify_bundle_signature(
    data: &[u8],
    signature: &[u8],
    signing_certificate: &[u8],
) -> Result<()> {
    let der = x509::certificates_from_pem(signing_certificate)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Signature("empty signing certificate".to_string()))?;
    let cert = x509::parse(&der)?;
    let public_key = RsaPublicKey::from_public_key_der(cert.public_key().raw)
        .map_err(|e| Error::Signature(format!("signing key is not rsa: {e}")))?;

    let signature =
        Signature::try_from(signature).map_err(|e| Error::Signature(e.to_string()))?;
    VerifyingKey::<Sha256>::new(public_key)
        .verify(data, &signature)
        .map_err(|e| Error::Signature(e.to_string()))
}

/// signs with an rsa key and certificate read from disk.
pub struct DiskSigner {
    key: SigningKey<Sha256>,
    certificate_pem: Vec<u8>,
}

impl DiskSigner {
    /// load the key (pkcs#8 or pkcs#1 pem) and its certificate.
    pub fn load(private_key_path: &Path, certificate_path: &Path) -> Result<Self> {
        let key_pem = fs::read_to_string(private_key_path)?;
        let certificate_pem = fs::read(certificate_path)?;
        Self::from_pem(&key_pem, certificate_pem)
    }

    /// build a signer from pem material.
    pub fn from_pem(key_pem: &str, certificate_pem: Vec<u8>) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(key_pem))
            .map_err(|e| Error::Key(e.to_string()))?;

        // the certificate must describe this key or peers could never verify
        let der = x509::certificates_from_pem(&certificate_pem)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Certificate("empty signing certificate".to_string()))?;
        let cert = x509::parse(&der)?;
        let cert_key = RsaPublicKey::from_public_key_der(cert.public_key().raw)
            .map_err(|e| Error::Certificate(e.to_string()))?;
        if cert_key != key.to_public_key() {
            return Err(Error::Certificate(
                "signing certificate does not match the private key".to_string(),
            ));
        }

        Ok(Self {
            key: SigningKey::<Sha256>::new(key),
            certificate_pem,
        })
    }
}

impl BundleSigner for DiskSigner {
    fn sign(&self, data: &[u8]) -> Result<SignedBundle> {
        let signature = self.key.sign(data);
        Ok(SignedBundle {
            signature: signature.to_vec(),
            signing_certificate: self.certificate_pem.clone(),
        })
    }
}

/// accepts bundles signed by a certificate chaining to a trust bundle on disk.
pub struct DiskVerifier {
    roots: Vec<Vec<u8>>,
}

impl DiskVerifier {
    /// load the pem trust bundle.
    pub fn load(trust_bundle_path: &Path) -> Result<Self> {
        Self::from_pem(&fs::read(trust_bundle_path)?)
    }

    /// build a verifier from a pem trust bundle.
    pub fn from_pem(trust_bundle: &[u8]) -> Result<Self> {
        Ok(Self {
            roots: x509::certificates_from_pem(trust_bundle)?,
        })
    }
}

impl BundleVerifier for DiskVerifier {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn verify(
        &self,
        data: &[u8],
        signature: Option<&[u8]>,
        signing_certificate: Option<&[u8]>,
    ) -> Result<()> {
        let (Some(signature), Some(signing_certificate)) = (signature, signing_certificate) else {
            return Err(Error::Signature("bundle is not signed".to_string()));
        };

        let der = x509::certificates_from_pem(signing_certificate)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Signature("empty signing certificate".to_string()))?;
        if !x509::parse(&der)?.validity().is_valid() {
            return Err(Error::Signature(
                "signing certificate is not currently valid".to_string(),
            ));
        }
        if !x509::chains_to(&der, &self.roots)? {
            return Err(Error::Chain(
                "signing certificate is not trusted".to_string(),
            ));
        }
        verify_bundle_signature(data, signature, signing_certificate)
    }
}

/// accepts every bundle, signed or not.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVerifier;

impl BundleVerifier for NoopVerifier {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn verify(&self, _: &[u8], _: Option<&[u8]>, _: Option<&[u8]>) -> Result<()> {
        Ok(())
    }
}
