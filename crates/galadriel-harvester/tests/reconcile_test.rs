//! reconciliation loops against in-memory spire and server fakes

mod common;

use std::sync::Arc;
use std::time::Duration;

use galadriel_harvester::providers::VerificationPolicy;
use galadriel_harvester::reconcile::{FederatedBundleSync, PushOutcome, SelfBundleSync};
use galadriel_harvester::spire::FederationRelationship;
use galadriel_types::api::{BundleUpdate, SyncResponse};
use galadriel_types::{TrustDomainName, bundle_digest};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

use common::{FakeServer, FakeSpire, api_error, authority, bundle};

fn td(name: &str) -> TrustDomainName {
    TrustDomainName::new(name).unwrap()
}

fn open_policy() -> VerificationPolicy {
    VerificationPolicy::new(Vec::new(), false)
}

fn update_for(peer: &str, authorities: &[Vec<u8>]) -> BundleUpdate {
    let trust_bundle = bundle(peer, authorities).to_pem();
    BundleUpdate {
        trust_domain: peer.to_string(),
        digest: bundle_digest(trust_bundle.as_bytes()),
        trust_bundle,
        signature: None,
        signing_certificate: None,
    }
}

fn sync_response(updates: Vec<BundleUpdate>) -> SyncResponse {
    let mut response = SyncResponse::default();
    for update in updates {
        response
            .state
            .insert(update.trust_domain.clone(), update.digest.clone());
        response.updates.insert(update.trust_domain.clone(), update);
    }
    response
}

// ─── Self Bundle ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_self_bundle_pushed_once_per_digest() {
    let spire = Arc::new(FakeSpire::with_bundle(bundle("a.test", &[authority("a-1")])));
    let server = Arc::new(FakeServer::default());
    let mut sync = SelfBundleSync::new(spire.clone(), server.clone(), td("a.test"), None);

    let first = sync.tick().await;
    let PushOutcome::Pushed { digest } = first else {
        panic!("expected a push, got {first:?}");
    };
    assert_eq!(sync.last_digest(), Some(digest.as_str()));
    assert_eq!(sync.tick().await, PushOutcome::Unchanged);

    let pushed = server.pushed();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].trust_domain, "a.test");
    assert_eq!(pushed[0].digest.as_deref(), Some(digest.as_str()));
    assert_eq!(bundle_digest(pushed[0].trust_bundle.as_bytes()), digest);
    assert!(pushed[0].signature.is_none());

    // a rotated authority is pushed again
    spire.set_bundle(bundle("a.test", &[authority("a-1"), authority("a-2")]));
    assert!(matches!(sync.tick().await, PushOutcome::Pushed { .. }));
    assert_eq!(server.pushed().len(), 2);
}

#[tokio::test]
async fn test_self_bundle_retried_after_failure() {
    let spire = Arc::new(FakeSpire::with_bundle(bundle("a.test", &[authority("a-1")])));
    let server = Arc::new(FakeServer::default());
    server
        .state
        .lock()
        .unwrap()
        .put_errors
        .push_back(api_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable"));
    let mut sync = SelfBundleSync::new(spire, server.clone(), td("a.test"), None);

    assert_eq!(sync.tick().await, PushOutcome::Failed);
    assert_eq!(sync.last_digest(), None);
    assert_eq!(sync.failures(), 1);

    assert!(matches!(sync.tick().await, PushOutcome::Pushed { .. }));
    assert_eq!(server.pushed().len(), 1);
}

#[tokio::test]
async fn test_self_bundle_rejection_is_not_cached() {
    let spire = Arc::new(FakeSpire::with_bundle(bundle("a.test", &[authority("a-1")])));
    let server = Arc::new(FakeServer::default());
    server
        .state
        .lock()
        .unwrap()
        .put_errors
        .push_back(api_error(StatusCode::BAD_REQUEST, "invalid_argument"));
    let mut sync = SelfBundleSync::new(spire, server.clone(), td("a.test"), None);

    assert_eq!(sync.tick().await, PushOutcome::Failed);
    assert_eq!(sync.last_digest(), None);
    // same bundle is offered again on the next tick
    assert!(matches!(sync.tick().await, PushOutcome::Pushed { .. }));
}

#[tokio::test]
async fn test_self_bundle_skips_empty_and_unreachable_spire() {
    let spire = Arc::new(FakeSpire::with_bundle(bundle("a.test", &[])));
    let server = Arc::new(FakeServer::default());
    let mut sync = SelfBundleSync::new(spire.clone(), server.clone(), td("a.test"), None);

    assert_eq!(sync.tick().await, PushOutcome::Empty);

    spire.state.lock().unwrap().fail_get_bundle = true;
    assert_eq!(sync.tick().await, PushOutcome::Failed);
    assert!(server.pushed().is_empty());
}

#[tokio::test]
async fn test_self_bundle_loop_stops_on_cancel() {
    let spire = Arc::new(FakeSpire::with_bundle(bundle("a.test", &[authority("a-1")])));
    let server = Arc::new(FakeServer::default());
    let sync = SelfBundleSync::new(spire, server.clone(), td("a.test"), None);

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(sync.run(Duration::from_millis(20), cancel.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop should stop")
        .unwrap();

    // the first tick fires immediately, later ticks see an unchanged bundle
    assert_eq!(server.pushed().len(), 1);
}

// ─── Federated Bundles ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_federated_installs_new_peer() {
    let spire = Arc::new(FakeSpire::default());
    let server = Arc::new(FakeServer::default());
    let b_authorities = vec![authority("b-1")];
    server.state.lock().unwrap().sync_response =
        sync_response(vec![update_for("b.test", &b_authorities)]);
    let mut sync = FederatedBundleSync::new(spire.clone(), server.clone(), td("a.test"), open_policy());

    let report = sync.tick().await.unwrap();
    assert_eq!(report.created, vec!["b.test".to_string()]);
    assert!(report.updated.is_empty());
    assert!(report.removed.is_empty());

    let installed = spire.installed();
    let rel = &installed["b.test"];
    assert_eq!(rel.bundle_endpoint_url, "https://b.test/");
    assert_eq!(rel.bundle.as_ref().unwrap().x509_authorities, b_authorities);

    // nothing was known on the first round
    assert!(server.state.lock().unwrap().sync_requests[0].is_empty());
}

#[tokio::test]
async fn test_federated_sends_known_digests_and_updates() {
    let spire = Arc::new(FakeSpire::default());
    let old = bundle("b.test", &[authority("b-1")]);
    spire.install(FederationRelationship::https_web(old.clone()));
    // own trust domain and peers without a bundle are never reported
    spire.install(FederationRelationship::https_web(bundle("a.test", &[authority("a-1")])));
    spire.install(FederationRelationship {
        trust_domain: "c.test".to_string(),
        bundle_endpoint_url: "https://c.test/".to_string(),
        bundle: None,
    });

    let server = Arc::new(FakeServer::default());
    let rotated = vec![authority("b-2")];
    let mut response = sync_response(vec![update_for("b.test", &rotated)]);
    response.state.insert("c.test".to_string(), String::new());
    server.state.lock().unwrap().sync_response = response;

    let mut sync = FederatedBundleSync::new(spire.clone(), server.clone(), td("a.test"), open_policy());
    let report = sync.tick().await.unwrap();
    assert_eq!(report.updated, vec!["b.test".to_string()]);
    assert!(report.created.is_empty());
    assert!(report.removed.is_empty());

    let known = server.state.lock().unwrap().sync_requests[0].clone();
    assert_eq!(known.len(), 1);
    assert_eq!(known["b.test"], old.digest());

    let installed = spire.installed();
    assert_eq!(installed["b.test"].bundle.as_ref().unwrap().x509_authorities, rotated);
}

#[tokio::test]
async fn test_federated_removes_ineligible_peers() {
    let spire = Arc::new(FakeSpire::default());
    spire.install(FederationRelationship::https_web(bundle("b.test", &[authority("b-1")])));
    spire.install(FederationRelationship::https_web(bundle("a.test", &[authority("a-1")])));
    let server = Arc::new(FakeServer::default());

    let mut sync = FederatedBundleSync::new(spire.clone(), server, td("a.test"), open_policy());
    let report = sync.tick().await.unwrap();
    assert_eq!(report.removed, vec!["b.test".to_string()]);

    let installed = spire.installed();
    assert!(!installed.contains_key("b.test"));
    // the local trust domain is never touched
    assert!(installed.contains_key("a.test"));
}

#[tokio::test]
async fn test_federated_in_sync_does_nothing() {
    let spire = Arc::new(FakeSpire::default());
    let current = bundle("b.test", &[authority("b-1")]);
    spire.install(FederationRelationship::https_web(current.clone()));
    let server = Arc::new(FakeServer::default());
    server
        .state
        .lock()
        .unwrap()
        .sync_response
        .state
        .insert("b.test".to_string(), current.digest());

    let mut sync = FederatedBundleSync::new(spire.clone(), server, td("a.test"), open_policy());
    let report = sync.tick().await.unwrap();
    assert_eq!(report, Default::default());

    let state = spire.state.lock().unwrap();
    assert!(state.created.is_empty() && state.updated.is_empty() && state.deleted.is_empty());
}

#[tokio::test]
async fn test_federated_rejects_mismatched_digest() {
    let spire = Arc::new(FakeSpire::default());
    let server = Arc::new(FakeServer::default());
    let mut update = update_for("b.test", &[authority("b-1")]);
    update.digest = bundle_digest(b"something else");
    server.state.lock().unwrap().sync_response = sync_response(vec![update]);

    let mut sync = FederatedBundleSync::new(spire.clone(), server, td("a.test"), open_policy());
    let report = sync.tick().await.unwrap();
    assert_eq!(report.rejected, vec!["b.test".to_string()]);
    assert!(spire.installed().is_empty());
}

#[tokio::test]
async fn test_federated_rejects_unsigned_bundle_when_enforced() {
    let spire = Arc::new(FakeSpire::default());
    let server = Arc::new(FakeServer::default());
    server.state.lock().unwrap().sync_response =
        sync_response(vec![update_for("b.test", &[authority("b-1")])]);

    let ca_key =
        galadriel_crypto::KeyEntry::generate("signers", galadriel_types::KeyType::Rsa2048).unwrap();
    let ca = galadriel_crypto::X509Ca::self_signed(&ca_key, "signers", Duration::from_secs(3600))
        .unwrap();
    let verifier = galadriel_crypto::DiskVerifier::from_pem(ca.certificate_pem().as_bytes()).unwrap();
    let policy = VerificationPolicy::new(vec![Arc::new(verifier)], true);

    let mut sync = FederatedBundleSync::new(spire.clone(), server, td("a.test"), policy);
    let report = sync.tick().await.unwrap();
    assert_eq!(report.rejected, vec!["b.test".to_string()]);
    assert!(spire.installed().is_empty());
}

#[tokio::test]
async fn test_federated_counts_spire_refusals() {
    let spire = Arc::new(FakeSpire::default());
    spire
        .state
        .lock()
        .unwrap()
        .refuse
        .insert("b.test".to_string(), 3);
    let server = Arc::new(FakeServer::default());
    server.state.lock().unwrap().sync_response = sync_response(vec![
        update_for("b.test", &[authority("b-1")]),
        update_for("c.test", &[authority("c-1")]),
    ]);

    let mut sync = FederatedBundleSync::new(spire.clone(), server, td("a.test"), open_policy());
    let report = sync.tick().await.unwrap();
    assert_eq!(report.created, vec!["c.test".to_string()]);
    assert_eq!(report.failed, vec!["b.test".to_string()]);
    assert_eq!(sync.failures(), 1);
}

#[tokio::test]
async fn test_federated_unreachable_server_changes_nothing() {
    let spire = Arc::new(FakeSpire::default());
    spire.install(FederationRelationship::https_web(bundle("b.test", &[authority("b-1")])));
    let server = Arc::new(FakeServer::default());
    server.state.lock().unwrap().fail_sync = true;

    let mut sync = FederatedBundleSync::new(spire.clone(), server, td("a.test"), open_policy());
    assert!(sync.tick().await.is_none());
    assert_eq!(sync.failures(), 1);
    // peers are kept while the server cannot be asked
    assert!(spire.installed().contains_key("b.test"));
}
