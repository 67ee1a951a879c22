//! certificate parsing helpers.

use chrono::{DateTime, Utc};
use rsa::RsaPublicKey;
use rsa::pkcs8::EncodePublicKey;
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

use galadriel_types::SpiffeId;

use crate::{Error, Result};

/// decode every `CERTIFICATE` block of a pem bundle into der.
pub fn certificates_from_pem(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let blocks = pem::parse_many(data).map_err(|e| Error::Certificate(e.to_string()))?;
    let certs: Vec<Vec<u8>> = blocks
        .into_iter()
        .filter(|p| p.tag() == "CERTIFICATE")
        .map(|p| p.into_contents())
        .collect();
    if certs.is_empty() {
        return Err(Error::Certificate("no certificates in pem".to_string()));
    }
    Ok(certs)
}

/// encode der certificates as a pem bundle with lf line endings.
pub fn certificates_to_pem<'a>(ders: impl IntoIterator<Item = &'a [u8]>) -> String {
    let blocks: Vec<pem::Pem> = ders
        .into_iter()
        .map(|der| pem::Pem::new("CERTIFICATE", der.to_vec()))
        .collect();
    pem::encode_many_config(
        &blocks,
        pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
    )
}

/// parse a der certificate.
pub fn parse(der: &[u8]) -> Result<X509Certificate<'_>> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|e| Error::Certificate(e.to_string()))?;
    Ok(cert)
}

/// the spiffe id carried in the uri san of a certificate.
///
/// exactly one `spiffe://` uri san is expected.
pub fn spiffe_id(der: &[u8]) -> Result<SpiffeId> {
    let cert = parse(der)?;
    let san = cert
        .subject_alternative_name()
        .map_err(|e| Error::Certificate(e.to_string()))?
        .ok_or_else(|| Error::Certificate("certificate has no subject alternative name".into()))?;

    let mut ids = san.value.general_names.iter().filter_map(|name| match name {
        GeneralName::URI(uri) if uri.starts_with("spiffe://") => Some(*uri),
        _ => None,
    });

    let uri = ids
        .next()
        .ok_or_else(|| Error::Certificate("certificate has no spiffe id".to_string()))?;
    if ids.next().is_some() {
        return Err(Error::Certificate(
            "certificate has more than one spiffe id".to_string(),
        ));
    }
    SpiffeId::parse(uri).map_err(|e| Error::Certificate(e.to_string()))
}

/// not-after of a certificate.
pub fn not_after(der: &[u8]) -> Result<DateTime<Utc>> {
    let cert = parse(der)?;
    DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
        .ok_or_else(|| Error::Certificate("not-after out of range".to_string()))
}

/// not-before of a certificate.
pub fn not_before(der: &[u8]) -> Result<DateTime<Utc>> {
    let cert = parse(der)?;
    DateTime::from_timestamp(cert.validity().not_before.timestamp(), 0)
        .ok_or_else(|| Error::Certificate("not-before out of range".to_string()))
}

/// true if the certificate's subject public key is `key`.
pub fn certifies_key(der: &[u8], key: &RsaPublicKey) -> Result<bool> {
    let cert = parse(der)?;
    let spki = key
        .to_public_key_der()
        .map_err(|e| Error::Key(e.to_string()))?;
    Ok(cert.public_key().raw == spki.as_bytes())
}

/// true if `der` is one of `roots` or is directly signed by one of them.
pub fn chains_to(der: &[u8], roots: &[Vec<u8>]) -> Result<bool> {
    let cert = parse(der)?;
    for root_der in roots {
        if root_der.as_slice() == der {
            return Ok(true);
        }
        let root = parse(root_der)?;
        if cert.issuer() == root.subject()
            && cert.verify_signature(Some(root.public_key())).is_ok()
        {
            return Ok(true);
        }
    }
    Ok(false)
}
