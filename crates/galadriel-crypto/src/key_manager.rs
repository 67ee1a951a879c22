//! named rsa keypairs for certificate and token signing.
//!
//! two implementations share the [`KeyManager`] trait:
//! - [`MemoryKeyManager`]: keys live for the lifetime of the process
//! - [`DiskKeyManager`]: keys are persisted as a json map of `kid -> pkcs#8 pem`
//!   with file mode 0600

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};

use galadriel_types::KeyType;

use crate::{Error, Result};

/// a named rsa keypair.
///
/// the jwt signing and verification keys are derived once, on construction.
pub struct KeyEntry {
    id: String,
    key_type: KeyType,
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl KeyEntry {
    /// generate a fresh keypair.
    pub fn generate(id: impl Into<String>, key_type: KeyType) -> Result<Self> {
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), key_type.bits())
            .map_err(|e| Error::Key(e.to_string()))?;
        Self::assemble(id.into(), key_type, private_key)
    }

    /// load a keypair from a pkcs#8 pem private key.
    pub fn from_pkcs8_pem(id: impl Into<String>, pem: &str) -> Result<Self> {
        let private_key =
            RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| Error::Key(e.to_string()))?;
        let key_type = if private_key.size() * 8 >= KeyType::Rsa4096.bits() {
            KeyType::Rsa4096
        } else {
            KeyType::Rsa2048
        };
        Self::assemble(id.into(), key_type, private_key)
    }

    fn assemble(id: String, key_type: KeyType, private_key: RsaPrivateKey) -> Result<Self> {
        let public_key = private_key.to_public_key();
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| Error::Key(e.to_string()))?;
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| Error::Key(e.to_string()))?;
        Ok(Self {
            id,
            key_type,
            encoding_key: EncodingKey::from_rsa_pem(private_pem.as_bytes())?,
            decoding_key: DecodingKey::from_rsa_pem(public_pem.as_bytes())?,
            private_key,
            public_key,
        })
    }

    /// key id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// key size.
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// the rsa private key.
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// the rsa public key.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// private key as pkcs#8 pem.
    pub fn private_key_pem(&self) -> Result<String> {
        let pem = self
            .private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| Error::Key(e.to_string()))?;
        Ok(pem.to_string())
    }

    /// public key as spki pem.
    pub fn public_key_pem(&self) -> Result<String> {
        self.public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| Error::Key(e.to_string()))
    }

    /// jwt signing key.
    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    /// jwt verification key.
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// the keypair in the form rcgen signs certificates with.
    pub fn rcgen_key_pair(&self) -> Result<rcgen::KeyPair> {
        Ok(rcgen::KeyPair::from_pem_and_sign_algo(
            &self.private_key_pem()?,
            &rcgen::PKCS_RSA_SHA256,
        )?)
    }
}

impl fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyEntry")
            .field("id", &self.id)
            .field("key_type", &self.key_type)
            .finish_non_exhaustive()
    }
}

/// a store of named keypairs.
///
/// safe for concurrent reads; writes are serialized internally.
pub trait KeyManager: Send + Sync {
    /// generate and store a keypair. fails if the id is taken.
    fn generate_key(&self, id: &str, key_type: KeyType) -> Result<Arc<KeyEntry>>;

    /// get a keypair by id.
    fn get_key(&self, id: &str) -> Option<Arc<KeyEntry>>;

    /// all keypairs, ordered by id.
    fn get_keys(&self) -> Vec<Arc<KeyEntry>>;

    /// get a keypair, generating it on first use.
    fn get_or_generate(&self, id: &str, key_type: KeyType) -> Result<Arc<KeyEntry>> {
        if let Some(key) = self.get_key(id) {
            return Ok(key);
        }
        match self.generate_key(id, key_type) {
            // lost a race with another generator
            Err(Error::KeyExists(_)) => self.get_key(id).ok_or_else(|| Error::KeyNotFound(id.to_string())),
            other => other,
        }
    }
}

/// key manager holding keys in memory only.
#[derive(Debug, Default)]
pub struct MemoryKeyManager {
    keys: RwLock<BTreeMap<String, Arc<KeyEntry>>>,
}

impl MemoryKeyManager {
    /// create an empty key manager.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyManager for MemoryKeyManager {
    fn generate_key(&self, id: &str, key_type: KeyType) -> Result<Arc<KeyEntry>> {
        if self.get_key(id).is_some() {
            return Err(Error::KeyExists(id.to_string()));
        }
        // rsa generation is slow; keep it outside the lock
        let entry = Arc::new(KeyEntry::generate(id, key_type)?);
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        match keys.entry(id.to_string()) {
            Entry::Occupied(_) => Err(Error::KeyExists(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(entry.clone());
                tracing::debug!(kid = id, ?key_type, "generated key");
                Ok(entry)
            }
        }
    }

    fn get_key(&self, id: &str) -> Option<Arc<KeyEntry>> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn get_keys(&self) -> Vec<Arc<KeyEntry>> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

/// key manager persisting keys to a json file.
#[derive(Debug)]
pub struct DiskKeyManager {
    path: PathBuf,
    keys: RwLock<BTreeMap<String, Arc<KeyEntry>>>,
}

impl DiskKeyManager {
    /// open the key file at `path`, creating it on first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let keys = if path.exists() {
            Self::load(&path)?
        } else {
            BTreeMap::new()
        };
        tracing::debug!(path = %path.display(), count = keys.len(), "opened key store");
        Ok(Self {
            path,
            keys: RwLock::new(keys),
        })
    }

    /// path of the key file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<BTreeMap<String, Arc<KeyEntry>>> {
        let contents = fs::read(path)?;
        let pems: BTreeMap<String, String> = serde_json::from_slice(&contents)
            .map_err(|e| Error::KeyStore(format!("{}: {}", path.display(), e)))?;
        pems.into_iter()
            .map(|(id, pem)| {
                let entry = KeyEntry::from_pkcs8_pem(id.clone(), &pem)?;
                Ok((id, Arc::new(entry)))
            })
            .collect()
    }

    fn persist(&self, keys: &BTreeMap<String, Arc<KeyEntry>>) -> Result<()> {
        let pems = keys
            .iter()
            .map(|(id, entry)| Ok((id.clone(), entry.private_key_pem()?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let contents =
            serde_json::to_vec_pretty(&pems).map_err(|e| Error::KeyStore(e.to_string()))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        // write then rename so a crash never leaves a truncated key file
        let tmp = self.path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp)?;
        file.write_all(&contents)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyManager for DiskKeyManager {
    fn generate_key(&self, id: &str, key_type: KeyType) -> Result<Arc<KeyEntry>> {
        if self.get_key(id).is_some() {
            return Err(Error::KeyExists(id.to_string()));
        }
        let entry = Arc::new(KeyEntry::generate(id, key_type)?);
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        if keys.contains_key(id) {
            return Err(Error::KeyExists(id.to_string()));
        }
        let mut next = keys.clone();
        next.insert(id.to_string(), entry.clone());
        self.persist(&next)?;
        *keys = next;
        tracing::debug!(kid = id, ?key_type, path = %self.path.display(), "generated key");
        Ok(entry)
    }

    fn get_key(&self, id: &str) -> Option<Arc<KeyEntry>> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn get_keys(&self) -> Vec<Arc<KeyEntry>> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
