//! the onboarding certificate authority.
//!
//! every leaf is backdated by 30 seconds for clock drift, is not a ca, carries
//! key usages `{digitalSignature, keyEncipherment, keyAgreement}` and extended
//! key usages `{serverAuth, clientAuth}`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateSigningRequestParams,
    DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
    PublicKeyData, SanType, SerialNumber,
};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};

use galadriel_types::{SpiffeId, TrustDomainName};

use crate::{Error, KeyEntry, Result, x509};

/// clock-drift allowance applied to every leaf's not-before.
pub const BACKDATE: Duration = Duration::from_secs(30);

const ORGANIZATION: &str = "Galadriel";

/// subject and lifetime of a certificate to issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafParams {
    /// subject common name
    pub common_name: String,
    /// uri san, if any
    pub spiffe_id: Option<SpiffeId>,
    /// dns names and ip addresses to include as sans
    pub dns_names: Vec<String>,
    /// lifetime from now
    pub ttl: Duration,
}

impl LeafParams {
    /// client certificate for the harvester of a trust domain.
    pub fn harvester(trust_domain: &TrustDomainName, ttl: Duration) -> Self {
        Self {
            common_name: trust_domain.to_string(),
            spiffe_id: Some(trust_domain.harvester_id()),
            dns_names: Vec::new(),
            ttl,
        }
    }

    /// tls serving certificate for the given names.
    pub fn server(names: &[String], ttl: Duration) -> Self {
        Self {
            common_name: names.first().cloned().unwrap_or_default(),
            spiffe_id: None,
            dns_names: names.to_vec(),
            ttl,
        }
    }
}

/// a signed leaf certificate.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// der encoding
    pub der: Vec<u8>,
    /// pem encoding
    pub pem: String,
    /// start of validity
    pub not_before: DateTime<Utc>,
    /// end of validity
    pub not_after: DateTime<Utc>,
}

/// certificate authority that signs leaves with a root key.
pub struct X509Ca {
    // rcgen needs issuer params to sign; rebuilt from the real ca certificate
    issuer: Certificate,
    issuer_key: KeyPair,
    cert_der: Vec<u8>,
}

impl std::fmt::Debug for X509Ca {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X509Ca").finish_non_exhaustive()
    }
}

impl X509Ca {
    /// generate a self-signed root from a key manager key.
    pub fn self_signed(key: &KeyEntry, common_name: &str, ttl: Duration) -> Result<Self> {
        let issuer_key = key.rcgen_key_pair()?;

        let mut params = CertificateParams::new(Vec::<String>::new())?;
        params.distinguished_name = distinguished_name(common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let (not_before, not_after) = validity(ttl)?;
        params.not_before = not_before;
        params.not_after = not_after;
        params.serial_number = Some(random_serial());

        let issuer = params.self_signed(&issuer_key)?;
        let cert_der = issuer.der().to_vec();
        tracing::info!(common_name, "generated self-signed ca");
        Ok(Self {
            issuer,
            issuer_key,
            cert_der,
        })
    }

    /// build a ca from pem material, checking it chains to `bundle` if given.
    pub fn from_pem(cert_pem: &str, key_pem: &str, bundle: Option<&[u8]>) -> Result<Self> {
        let cert_der = x509::certificates_from_pem(cert_pem.as_bytes())?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Certificate("empty ca certificate".to_string()))?;

        let parsed = x509::parse(&cert_der)?;
        if !parsed.validity().is_valid() {
            return Err(Error::Certificate(
                "ca certificate is not currently valid".to_string(),
            ));
        }
        if !parsed.is_ca() {
            return Err(Error::Certificate(
                "certificate is not a ca certificate".to_string(),
            ));
        }

        if let Some(bundle) = bundle {
            let roots = x509::certificates_from_pem(bundle)?;
            if !x509::chains_to(&cert_der, &roots)? {
                return Err(Error::Chain(
                    "ca certificate does not chain to the trust bundle".to_string(),
                ));
            }
        }

        let issuer_key = key_pair_from_pem(key_pem)?;
        if issuer_key.public_key_der() != parsed.public_key().raw {
            return Err(Error::Certificate(
                "ca private key does not match the certificate".to_string(),
            ));
        }

        let params = CertificateParams::from_ca_cert_pem(cert_pem)?;
        let issuer = params.self_signed(&issuer_key)?;
        Ok(Self {
            issuer,
            issuer_key,
            cert_der,
        })
    }

    /// load a ca from pem files.
    pub fn load(cert_path: &Path, key_path: &Path, bundle_path: Option<&Path>) -> Result<Self> {
        let cert_pem = fs::read_to_string(cert_path)?;
        let key_pem = fs::read_to_string(key_path)?;
        let bundle = bundle_path.map(fs::read).transpose()?;
        let ca = Self::from_pem(&cert_pem, &key_pem, bundle.as_deref())?;
        tracing::info!(cert = %cert_path.display(), "loaded ca from disk");
        Ok(ca)
    }

    /// the ca certificate, der.
    pub fn certificate_der(&self) -> &[u8] {
        &self.cert_der
    }

    /// the ca certificate, pem.
    pub fn certificate_pem(&self) -> String {
        x509::certificates_to_pem([self.cert_der.as_slice()])
    }

    /// sign a leaf for the public key of a pem pkcs#10 request.
    ///
    /// only the key is taken from the request; subject and sans come from `leaf`.
    pub fn sign_csr(&self, csr_pem: &str, leaf: &LeafParams) -> Result<IssuedCertificate> {
        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| Error::InvalidCsr(e.to_string()))?;
        let (params, not_before, not_after) = leaf_params(leaf)?;
        csr.params = params;
        let cert = csr.signed_by(&self.issuer, &self.issuer_key)?;
        Ok(IssuedCertificate {
            der: cert.der().to_vec(),
            pem: cert.pem(),
            not_before,
            not_after,
        })
    }

    /// sign a leaf for a public key.
    pub fn sign_public_key(
        &self,
        public_key: &impl PublicKeyData,
        leaf: &LeafParams,
    ) -> Result<IssuedCertificate> {
        let (params, not_before, not_after) = leaf_params(leaf)?;
        let cert = params.signed_by(public_key, &self.issuer, &self.issuer_key)?;
        Ok(IssuedCertificate {
            der: cert.der().to_vec(),
            pem: cert.pem(),
            not_before,
            not_after,
        })
    }
}

/// build a pem certificate signing request for the harvester of a trust domain.
pub fn harvester_csr(key: &KeyEntry, trust_domain: &TrustDomainName) -> Result<String> {
    let key_pair = key.rcgen_key_pair()?;
    let mut params = CertificateParams::new(Vec::<String>::new())?;
    params.distinguished_name = distinguished_name(trust_domain.as_str());
    params.subject_alt_names = vec![uri_san(&trust_domain.harvester_id())?];
    let csr = params.serialize_request(&key_pair)?;
    Ok(csr.pem()?)
}

fn leaf_params(leaf: &LeafParams) -> Result<(CertificateParams, DateTime<Utc>, DateTime<Utc>)> {
    let mut params = CertificateParams::new(leaf.dns_names.clone())?;
    params.distinguished_name = distinguished_name(&leaf.common_name);
    if let Some(id) = &leaf.spiffe_id {
        params.subject_alt_names.push(uri_san(id)?);
    }
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::KeyAgreement,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    params.use_authority_key_identifier_extension = true;
    params.serial_number = Some(random_serial());

    let now = Utc::now().timestamp();
    let not_before = now - BACKDATE.as_secs() as i64;
    let not_after = now + leaf.ttl.as_secs() as i64;
    params.not_before = offset(not_before)?;
    params.not_after = offset(not_after)?;

    Ok((params, timestamp(not_before)?, timestamp(not_after)?))
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, ORGANIZATION);
    dn
}

fn uri_san(id: &SpiffeId) -> Result<SanType> {
    let uri = id
        .to_string()
        .try_into()
        .map_err(|e: rcgen::Error| Error::Certificate(e.to_string()))?;
    Ok(SanType::URI(uri))
}

fn random_serial() -> SerialNumber {
    let mut bytes: [u8; 16] = rand::random();
    // keep the der integer positive
    bytes[0] &= 0x7f;
    SerialNumber::from_slice(&bytes)
}

fn validity(ttl: Duration) -> Result<(time::OffsetDateTime, time::OffsetDateTime)> {
    let now = Utc::now().timestamp();
    Ok((
        offset(now - BACKDATE.as_secs() as i64)?,
        offset(now + ttl.as_secs() as i64)?,
    ))
}

fn offset(ts: i64) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(ts).map_err(|e| Error::Certificate(e.to_string()))
}

fn timestamp(ts: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| Error::Certificate("timestamp out of range".to_string()))
}

/// parse a pkcs#8 key, accepting legacy pkcs#1 rsa keys as well.
fn key_pair_from_pem(key_pem: &str) -> Result<KeyPair> {
    if key_pem.contains("BEGIN RSA PRIVATE KEY") {
        let rsa = rsa::RsaPrivateKey::from_pkcs1_pem(key_pem)
            .map_err(|e| Error::Key(e.to_string()))?;
        let pkcs8 = rsa
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| Error::Key(e.to_string()))?;
        return Ok(KeyPair::from_pem_and_sign_algo(
            &pkcs8,
            &rcgen::PKCS_RSA_SHA256,
        )?);
    }
    Ok(KeyPair::from_pem(key_pem)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use galadriel_types::KeyType;
    use x509_parser::extensions::ParsedExtension;

    fn test_ca() -> X509Ca {
        let key = KeyEntry::generate("ca", KeyType::Rsa2048).unwrap();
        X509Ca::self_signed(&key, "Galadriel Server CA", Duration::from_secs(3600)).unwrap()
    }

    #[test]
    fn test_harvester_leaf_properties() {
        let ca = test_ca();
        let td = TrustDomainName::new("example.org").unwrap();
        let key = KeyEntry::generate("harvester", KeyType::Rsa2048).unwrap();
        let csr = harvester_csr(&key, &td).unwrap();

        let ttl = Duration::from_secs(600);
        let issued = ca.sign_csr(&csr, &LeafParams::harvester(&td, ttl)).unwrap();

        let cert = x509::parse(&issued.der).unwrap();
        let cn: Vec<_> = cert
            .subject()
            .iter_common_name()
            .filter_map(|cn| cn.as_str().ok())
            .collect();
        assert_eq!(cn, vec!["example.org"]);

        // not-after minus not-before is ttl plus the backdate
        let validity = cert.validity();
        let span = validity.not_after.timestamp() - validity.not_before.timestamp();
        assert_eq!(span as u64, ttl.as_secs() + BACKDATE.as_secs());
        assert!(issued.not_before < Utc::now());

        assert_eq!(
            x509::spiffe_id(&issued.der).unwrap().to_string(),
            "spiffe://example.org/harvester"
        );

        // the certificate carries the csr's key
        let key_der = rcgen::KeyPair::from_pem_and_sign_algo(
            &key.private_key_pem().unwrap(),
            &rcgen::PKCS_RSA_SHA256,
        )
        .unwrap()
        .public_key_der();
        assert_eq!(cert.public_key().raw, key_der.as_slice());

        assert!(x509::chains_to(&issued.der, &[ca.certificate_der().to_vec()]).unwrap());
    }

    #[test]
    fn test_leaf_extensions() {
        let ca = test_ca();
        let server_key = rcgen::KeyPair::generate().unwrap();
        let issued = ca
            .sign_public_key(
                &server_key,
                &LeafParams::server(&["localhost".to_string()], Duration::from_secs(60)),
            )
            .unwrap();
        let cert = x509::parse(&issued.der).unwrap();

        assert!(!cert.is_ca());
        let mut saw_ku = false;
        let mut saw_eku = false;
        for ext in cert.extensions() {
            match ext.parsed_extension() {
                ParsedExtension::KeyUsage(ku) => {
                    saw_ku = true;
                    assert!(ku.digital_signature());
                    assert!(ku.key_encipherment());
                    assert!(ku.key_agreement());
                    assert!(!ku.key_cert_sign());
                }
                ParsedExtension::ExtendedKeyUsage(eku) => {
                    saw_eku = true;
                    assert!(eku.server_auth);
                    assert!(eku.client_auth);
                }
                ParsedExtension::BasicConstraints(bc) => assert!(!bc.ca),
                _ => {}
            }
        }
        assert!(saw_ku && saw_eku);
    }

    #[test]
    fn test_rejects_garbage_csr() {
        let ca = test_ca();
        let td = TrustDomainName::new("example.org").unwrap();
        let err = ca
            .sign_csr("not a csr", &LeafParams::harvester(&td, Duration::from_secs(60)))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCsr(_)));
    }

    #[test]
    fn test_from_pem_round_trip_and_bundle_check() {
        let key = KeyEntry::generate("ca", KeyType::Rsa2048).unwrap();
        let generated =
            X509Ca::self_signed(&key, "Galadriel Server CA", Duration::from_secs(3600)).unwrap();
        let cert_pem = generated.certificate_pem();
        let key_pem = key.private_key_pem().unwrap();

        let loaded = X509Ca::from_pem(&cert_pem, &key_pem, Some(cert_pem.as_bytes())).unwrap();
        assert_eq!(loaded.certificate_der(), generated.certificate_der());

        // leaves from the loaded ca verify against the original certificate
        let td = TrustDomainName::new("a.test").unwrap();
        let leaf_key = KeyEntry::generate("leaf", KeyType::Rsa2048).unwrap();
        let csr = harvester_csr(&leaf_key, &td).unwrap();
        let issued = loaded
            .sign_csr(&csr, &LeafParams::harvester(&td, Duration::from_secs(60)))
            .unwrap();
        assert!(x509::chains_to(&issued.der, &[generated.certificate_der().to_vec()]).unwrap());

        // a bundle that does not contain the ca is rejected
        let other_key = KeyEntry::generate("other", KeyType::Rsa2048).unwrap();
        let other = X509Ca::self_signed(&other_key, "Other CA", Duration::from_secs(3600)).unwrap();
        let err = X509Ca::from_pem(
            &cert_pem,
            &key_pem,
            Some(other.certificate_pem().as_bytes()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Chain(_)));
    }

    #[test]
    fn test_from_pem_rejects_mismatched_key() {
        let key = KeyEntry::generate("ca", KeyType::Rsa2048).unwrap();
        let ca = X509Ca::self_signed(&key, "CA", Duration::from_secs(3600)).unwrap();
        let wrong = KeyEntry::generate("wrong", KeyType::Rsa2048).unwrap();
        let err = X509Ca::from_pem(
            &ca.certificate_pem(),
            &wrong.private_key_pem().unwrap(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Certificate(_)));
    }
}
