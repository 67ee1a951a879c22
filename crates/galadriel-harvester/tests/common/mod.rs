//! shared fakes for harvester integration tests

#![allow(dead_code)] // not every test file uses every helper

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use galadriel_crypto::{KeyEntry, X509Ca};
use galadriel_harvester::client::{ClientError, ServerApi};
use galadriel_harvester::spire::{
    BatchItem, FederationRelationship, SpireBundle, SpireError, SpireServer,
};
use galadriel_types::api::{DigestMap, HarvesterRelationship, PutBundleRequest, SyncResponse};
use galadriel_types::{ConsentStatus, HarvesterConfig, KeyType, RelationshipId, TrustDomainName};
use reqwest::StatusCode;

/// a self-signed der certificate, usable as an x509 authority.
pub fn authority(name: &str) -> Vec<u8> {
    let key = KeyEntry::generate(name, KeyType::Rsa2048).unwrap();
    X509Ca::self_signed(&key, name, Duration::from_secs(3600))
        .unwrap()
        .certificate_der()
        .to_vec()
}

/// a bundle for `trust_domain` with the given authorities.
pub fn bundle(trust_domain: &str, authorities: &[Vec<u8>]) -> SpireBundle {
    SpireBundle {
        trust_domain: trust_domain.to_string(),
        x509_authorities: authorities.to_vec(),
    }
}

/// a harvester config for `trust_domain` with short timeouts.
pub fn config(trust_domain: &str) -> HarvesterConfig {
    HarvesterConfig {
        trust_domain: Some(TrustDomainName::new(trust_domain).unwrap()),
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

pub fn api_error(status: StatusCode, code: &str) -> ClientError {
    ClientError::Api {
        status,
        code: Some(code.to_string()),
        message: format!("{code} from fake server"),
    }
}

// ─── Fake Spire ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct SpireState {
    pub bundle: Option<SpireBundle>,
    pub relationships: BTreeMap<String, FederationRelationship>,
    pub fail_get_bundle: bool,
    pub fail_list: bool,
    /// peers spire refuses to create, with the grpc code returned
    pub refuse: BTreeMap<String, i32>,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
}

/// in-memory spire server.
#[derive(Default)]
pub struct FakeSpire {
    pub state: Mutex<SpireState>,
}

impl FakeSpire {
    pub fn with_bundle(bundle: SpireBundle) -> Self {
        let spire = Self::default();
        spire.state.lock().unwrap().bundle = Some(bundle);
        spire
    }

    pub fn set_bundle(&self, bundle: SpireBundle) {
        self.state.lock().unwrap().bundle = Some(bundle);
    }

    pub fn install(&self, relationship: FederationRelationship) {
        self.state
            .lock()
            .unwrap()
            .relationships
            .insert(relationship.trust_domain.clone(), relationship);
    }

    pub fn installed(&self) -> BTreeMap<String, FederationRelationship> {
        self.state.lock().unwrap().relationships.clone()
    }
}

impl SpireServer for FakeSpire {
    async fn get_bundle(&self) -> Result<SpireBundle, SpireError> {
        let state = self.state.lock().unwrap();
        if state.fail_get_bundle {
            return Err(SpireError::Rpc(tonic::Status::unavailable("spire down")));
        }
        state
            .bundle
            .clone()
            .ok_or_else(|| SpireError::Rpc(tonic::Status::not_found("no bundle")))
    }

    async fn list_federation_relationships(
        &self,
    ) -> Result<Vec<FederationRelationship>, SpireError> {
        let state = self.state.lock().unwrap();
        if state.fail_list {
            return Err(SpireError::Rpc(tonic::Status::unavailable("spire down")));
        }
        Ok(state.relationships.values().cloned().collect())
    }

    async fn create_federation_relationships(
        &self,
        relationships: Vec<FederationRelationship>,
    ) -> Result<Vec<BatchItem>, SpireError> {
        let mut state = self.state.lock().unwrap();
        let mut items = Vec::new();
        for rel in relationships {
            let name = rel.trust_domain.clone();
            if let Some(code) = state.refuse.get(&name).copied() {
                items.push(BatchItem {
                    trust_domain: name,
                    code,
                    message: "refused".to_string(),
                });
                continue;
            }
            state.created.push(name.clone());
            state.relationships.insert(name.clone(), rel);
            items.push(BatchItem {
                trust_domain: name,
                code: 0,
                message: "OK".to_string(),
            });
        }
        Ok(items)
    }

    async fn update_federation_relationships(
        &self,
        relationships: Vec<FederationRelationship>,
    ) -> Result<Vec<BatchItem>, SpireError> {
        let mut state = self.state.lock().unwrap();
        let mut items = Vec::new();
        for rel in relationships {
            let name = rel.trust_domain.clone();
            state.updated.push(name.clone());
            if let Some(existing) = state.relationships.get_mut(&name) {
                existing.bundle = rel.bundle;
            }
            items.push(BatchItem {
                trust_domain: name,
                code: 0,
                message: "OK".to_string(),
            });
        }
        Ok(items)
    }

    async fn delete_federation_relationships(
        &self,
        trust_domains: Vec<String>,
    ) -> Result<Vec<BatchItem>, SpireError> {
        let mut state = self.state.lock().unwrap();
        let mut items = Vec::new();
        for name in trust_domains {
            state.relationships.remove(&name);
            state.deleted.push(name.clone());
            items.push(BatchItem {
                trust_domain: name,
                code: 0,
                message: "OK".to_string(),
            });
        }
        Ok(items)
    }
}

// ─── Fake Server ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct ServerState {
    pub pushed: Vec<PutBundleRequest>,
    /// errors returned by the next puts, in order
    pub put_errors: VecDeque<ClientError>,
    pub sync_requests: Vec<DigestMap>,
    pub sync_response: SyncResponse,
    pub fail_sync: bool,
    pub relationships: Vec<HarvesterRelationship>,
    pub unreachable: bool,
}

/// in-memory galadriel server as seen by one harvester.
#[derive(Default)]
pub struct FakeServer {
    pub state: Mutex<ServerState>,
}

impl FakeServer {
    pub fn pushed(&self) -> Vec<PutBundleRequest> {
        self.state.lock().unwrap().pushed.clone()
    }

    pub fn add_relationship(&self, peer: &str, consent: ConsentStatus) -> RelationshipId {
        let id = RelationshipId::new_random();
        let now = Utc::now();
        self.state
            .lock()
            .unwrap()
            .relationships
            .push(HarvesterRelationship {
                id,
                peer_trust_domain: peer.to_string(),
                consent_status: consent,
                peer_consent_status: ConsentStatus::Approved,
                created_at: now,
                updated_at: now,
            });
        id
    }
}

impl ServerApi for FakeServer {
    async fn put_bundle(&self, request: PutBundleRequest) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.put_errors.pop_front() {
            return Err(err);
        }
        state.pushed.push(request);
        Ok(())
    }

    async fn sync_bundles(&self, known: DigestMap) -> Result<SyncResponse, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.sync_requests.push(known);
        if state.fail_sync {
            return Err(api_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable"));
        }
        Ok(state.sync_response.clone())
    }

    async fn list_relationships(
        &self,
        status: Option<ConsentStatus>,
    ) -> Result<Vec<HarvesterRelationship>, ClientError> {
        let state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(ClientError::Config("server unreachable".to_string()));
        }
        Ok(state
            .relationships
            .iter()
            .filter(|r| status.is_none_or(|s| r.consent_status == s))
            .cloned()
            .collect())
    }

    async fn update_consent(
        &self,
        id: RelationshipId,
        status: ConsentStatus,
    ) -> Result<HarvesterRelationship, ClientError> {
        let mut state = self.state.lock().unwrap();
        let rel = state
            .relationships
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "not_found"))?;
        rel.consent_status = status;
        rel.updated_at = Utc::now();
        Ok(rel.clone())
    }
}
