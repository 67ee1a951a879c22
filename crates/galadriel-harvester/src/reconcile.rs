//! the two reconciliation loops between spire and the galadriel server.
//!
//! - [`SelfBundleSync`]: pushes the local spire bundle whenever its digest changes
//! - [`FederatedBundleSync`]: installs peer bundles into spire and removes peers
//!   that are no longer eligible
//!
//! neither loop ever fails: errors are logged with context, counted, and the
//! next tick tries again.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use galadriel_crypto::BundleSigner;
use galadriel_types::api::{DigestMap, PutBundleRequest};
use galadriel_types::{TrustDomainName, bundle_digest};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ServerApi;
use crate::providers::VerificationPolicy;
use crate::spire::{BatchItem, FederationRelationship, SpireBundle, SpireError, SpireServer};

// ─── Self Bundle ─────────────────────────────────────────────────────────────

/// result of one self-bundle tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// the bundle matches the last pushed digest
    Unchanged,
    /// the bundle was pushed
    Pushed {
        /// digest now cached
        digest: String,
    },
    /// spire returned a bundle without x509 authorities
    Empty,
    /// fetching, signing or pushing failed
    Failed,
}

/// pushes the local spire bundle to the server.
pub struct SelfBundleSync<S, A> {
    spire: Arc<S>,
    server: Arc<A>,
    trust_domain: TrustDomainName,
    signer: Option<Arc<dyn BundleSigner>>,
    last_digest: Option<String>,
    failures: u64,
}

impl<S: SpireServer, A: ServerApi> SelfBundleSync<S, A> {
    pub fn new(
        spire: Arc<S>,
        server: Arc<A>,
        trust_domain: TrustDomainName,
        signer: Option<Arc<dyn BundleSigner>>,
    ) -> Self {
        Self {
            spire,
            server,
            trust_domain,
            signer,
            last_digest: None,
            failures: 0,
        }
    }

    /// digest of the last successfully pushed bundle.
    pub fn last_digest(&self) -> Option<&str> {
        self.last_digest.as_deref()
    }

    /// failed ticks so far.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn failed(&mut self) -> PushOutcome {
        self.failures += 1;
        PushOutcome::Failed
    }

    /// fetch the spire bundle and push it if it changed.
    pub async fn tick(&mut self) -> PushOutcome {
        let bundle = match self.spire.get_bundle().await {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(
                    trust_domain = %self.trust_domain,
                    operation = "get_bundle",
                    error = %e,
                    "failed to fetch bundle from spire"
                );
                return self.failed();
            }
        };
        if bundle.is_empty() {
            warn!(trust_domain = %self.trust_domain, "spire bundle has no x509 authorities");
            return PushOutcome::Empty;
        }

        let trust_bundle = bundle.to_pem();
        let digest = bundle_digest(trust_bundle.as_bytes());
        if self.last_digest.as_deref() == Some(digest.as_str()) {
            debug!(trust_domain = %self.trust_domain, "bundle unchanged");
            return PushOutcome::Unchanged;
        }

        let mut request = PutBundleRequest {
            trust_domain: self.trust_domain.to_string(),
            trust_bundle,
            signature: None,
            signing_certificate: None,
            digest: Some(digest.clone()),
        };
        if let Some(signer) = &self.signer {
            match signer.sign(request.trust_bundle.as_bytes()) {
                Ok(signed) => {
                    request.signature = Some(STANDARD.encode(&signed.signature));
                    request.signing_certificate =
                        Some(String::from_utf8_lossy(&signed.signing_certificate).into_owned());
                }
                Err(e) => {
                    warn!(
                        trust_domain = %self.trust_domain,
                        operation = "sign_bundle",
                        error = %e,
                        "failed to sign bundle"
                    );
                    return self.failed();
                }
            }
        }

        match self.server.put_bundle(request).await {
            Ok(()) => {
                info!(trust_domain = %self.trust_domain, digest = %digest, "pushed bundle");
                self.last_digest = Some(digest.clone());
                PushOutcome::Pushed { digest }
            }
            Err(e) if e.is_rejection() => {
                warn!(
                    trust_domain = %self.trust_domain,
                    operation = "put_bundle",
                    error = %e,
                    "server rejected bundle"
                );
                self.failed()
            }
            Err(e) => {
                warn!(
                    trust_domain = %self.trust_domain,
                    operation = "put_bundle",
                    error = %e,
                    "failed to push bundle, retrying next tick"
                );
                self.failed()
            }
        }
    }

    /// tick every `period` until cancelled.
    pub async fn run(mut self, period: Duration, cancel: CancellationToken) {
        info!(period = ?period, "self bundle loop started");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.tick() => {}
            }
        }
        debug!("self bundle loop stopped");
    }
}

// ─── Federated Bundles ───────────────────────────────────────────────────────

/// what one federated tick changed in spire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// peers created in spire
    pub created: Vec<String>,
    /// peers whose bundle was replaced
    pub updated: Vec<String>,
    /// peers removed from spire
    pub removed: Vec<String>,
    /// updates refused by the verification policy or undecodable
    pub rejected: Vec<String>,
    /// peers spire failed to apply
    pub failed: Vec<String>,
}

impl ReconcileReport {
    fn is_noop(&self) -> bool {
        self.created.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
            && self.rejected.is_empty()
            && self.failed.is_empty()
    }
}

/// installs peer bundles into spire from `/bundles/sync`.
pub struct FederatedBundleSync<S, A> {
    spire: Arc<S>,
    server: Arc<A>,
    trust_domain: TrustDomainName,
    policy: VerificationPolicy,
    failures: u64,
}

impl<S: SpireServer, A: ServerApi> FederatedBundleSync<S, A> {
    pub fn new(
        spire: Arc<S>,
        server: Arc<A>,
        trust_domain: TrustDomainName,
        policy: VerificationPolicy,
    ) -> Self {
        Self {
            spire,
            server,
            trust_domain,
            policy,
            failures: 0,
        }
    }

    /// failed ticks and failed items so far.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// one sync round. returns `None` when spire or the server could not be read.
    pub async fn tick(&mut self) -> Option<ReconcileReport> {
        let own = self.trust_domain.to_string();
        let existing = match self.spire.list_federation_relationships().await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(
                    trust_domain = %own,
                    operation = "list_federation_relationships",
                    error = %e,
                    "failed to read spire federation relationships"
                );
                self.failures += 1;
                return None;
            }
        };

        let known: DigestMap = existing
            .iter()
            .filter(|r| r.trust_domain != own)
            .filter_map(|r| {
                r.bundle
                    .as_ref()
                    .filter(|b| !b.is_empty())
                    .map(|b| (r.trust_domain.clone(), b.digest()))
            })
            .collect();

        let response = match self.server.sync_bundles(known).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    trust_domain = %own,
                    operation = "sync_bundles",
                    error = %e,
                    "failed to sync bundles"
                );
                self.failures += 1;
                return None;
            }
        };

        let installed: BTreeSet<&str> = existing.iter().map(|r| r.trust_domain.as_str()).collect();
        let mut report = ReconcileReport::default();
        let mut creates = Vec::new();
        let mut updates = Vec::new();

        for (peer, update) in &response.updates {
            if *peer == own {
                continue;
            }
            if let Err(e) = self.policy.check(update) {
                warn!(trust_domain = %own, peer = %peer, error = %e, "refusing peer bundle");
                report.rejected.push(peer.clone());
                continue;
            }
            if bundle_digest(update.trust_bundle.as_bytes()) != update.digest {
                warn!(trust_domain = %own, peer = %peer, "peer bundle does not match its digest");
                report.rejected.push(peer.clone());
                continue;
            }
            let bundle = match SpireBundle::from_pem(peer.clone(), &update.trust_bundle) {
                Ok(bundle) => bundle,
                Err(e) => {
                    warn!(trust_domain = %own, peer = %peer, error = %e, "undecodable peer bundle");
                    report.rejected.push(peer.clone());
                    continue;
                }
            };

            let relationship = FederationRelationship::https_web(bundle);
            if installed.contains(peer.as_str()) {
                updates.push(relationship);
            } else {
                creates.push(relationship);
            }
        }

        let removals: Vec<String> = existing
            .iter()
            .map(|r| r.trust_domain.clone())
            .filter(|td| *td != own && !response.state.contains_key(td))
            .collect();

        if !creates.is_empty() {
            let attempted = names_of(&creates);
            let result = self.spire.create_federation_relationships(creates).await;
            self.record("create", result, attempted, &mut report.created, &mut report.failed);
        }
        if !updates.is_empty() {
            let attempted = names_of(&updates);
            let result = self.spire.update_federation_relationships(updates).await;
            self.record("update", result, attempted, &mut report.updated, &mut report.failed);
        }
        if !removals.is_empty() {
            let attempted = removals.clone();
            let result = self.spire.delete_federation_relationships(removals).await;
            self.record("delete", result, attempted, &mut report.removed, &mut report.failed);
        }

        if report.is_noop() {
            debug!(trust_domain = %own, peers = response.state.len(), "federated bundles in sync");
        } else {
            info!(
                trust_domain = %own,
                created = report.created.len(),
                updated = report.updated.len(),
                removed = report.removed.len(),
                rejected = report.rejected.len(),
                failed = report.failed.len(),
                "reconciled federated bundles"
            );
        }
        Some(report)
    }

    fn record(
        &mut self,
        operation: &'static str,
        result: Result<Vec<BatchItem>, SpireError>,
        attempted: Vec<String>,
        done: &mut Vec<String>,
        failed: &mut Vec<String>,
    ) {
        let items = match result {
            Ok(items) => items,
            Err(e) => {
                warn!(
                    trust_domain = %self.trust_domain,
                    operation,
                    error = %e,
                    "spire batch call failed"
                );
                self.failures += 1;
                failed.extend(attempted);
                return;
            }
        };
        for item in items {
            if item.is_ok() {
                done.push(item.trust_domain);
                continue;
            }
            warn!(
                trust_domain = %self.trust_domain,
                peer = %item.trust_domain,
                operation,
                code = item.code,
                error = %item.message,
                "spire refused federation relationship"
            );
            self.failures += 1;
            failed.push(item.trust_domain);
        }
    }

    /// tick every `period` until cancelled.
    pub async fn run(mut self, period: Duration, cancel: CancellationToken) {
        info!(period = ?period, "federated bundle loop started");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.tick() => {}
            }
        }
        debug!("federated bundle loop stopped");
    }
}

fn names_of(relationships: &[FederationRelationship]) -> Vec<String> {
    relationships
        .iter()
        .map(|r| r.trust_domain.clone())
        .collect()
}
