//! integration tests for the admin surface

mod common;

use axum::http::{Method, StatusCode};
use galadriel_types::{
    ConsentStatus,
    api::{ErrorBody, JoinTokenResponse, RelationshipResponse, TrustDomainResponse},
};
use serde_json::json;

use common::Fixture;

// ─── Trust Domains ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_and_get_trust_domain() {
    let fx = Fixture::new().await;

    let resp = fx
        .admin(
            Method::PUT,
            "/trust-domain",
            Some(json!({ "name": "example.org", "description": "prod" })),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let created: TrustDomainResponse = resp.json();
    assert_eq!(created.name, "example.org");
    assert_eq!(created.description.as_deref(), Some("prod"));
    assert!(created.harvester_spiffe_id.is_none());

    let resp = fx.admin(Method::GET, "/trust-domain/example.org", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    let fetched: TrustDomainResponse = resp.json();
    assert_eq!(fetched.id, created.id);

    let resp = fx.admin(Method::GET, "/trust-domain", None).await;
    let all: Vec<TrustDomainResponse> = resp.json();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_illegal_trust_domain_name_rejected() {
    let fx = Fixture::new().await;

    let resp = fx
        .admin(
            Method::PUT,
            "/trust-domain",
            Some(json!({ "name": "not a valid uri" })),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    let err: ErrorBody = resp.json();
    assert_eq!(err.code, "invalid_argument");
}

#[tokio::test]
async fn test_duplicate_trust_domain_rejected() {
    let fx = Fixture::new().await;
    fx.create_trust_domain("example.org").await;

    let resp = fx
        .admin(Method::PUT, "/trust-domain", Some(json!({ "name": "example.org" })))
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_body_rejected() {
    let fx = Fixture::new().await;
    let resp = fx
        .admin(Method::PUT, "/trust-domain", Some(json!({ "nom": "x" })))
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_trust_domain_description() {
    let fx = Fixture::new().await;
    fx.create_trust_domain("example.org").await;

    let resp = fx
        .admin(
            Method::PUT,
            "/trust-domain/example.org",
            Some(json!({ "description": "staging" })),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let updated: TrustDomainResponse = resp.json();
    assert_eq!(updated.description.as_deref(), Some("staging"));
    assert_eq!(updated.name, "example.org");
}

#[tokio::test]
async fn test_get_unknown_trust_domain_is_not_found() {
    let fx = Fixture::new().await;
    let resp = fx.admin(Method::GET, "/trust-domain/missing.org", None).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    let err: ErrorBody = resp.json();
    assert_eq!(err.code, "not_found");
}

#[tokio::test]
async fn test_malformed_trust_domain_lookup_is_not_found() {
    let fx = Fixture::new().await;
    for method in [Method::GET, Method::DELETE] {
        let resp = fx.admin(method, "/trust-domain/Not_A_Name", None).await;
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        let err: ErrorBody = resp.json();
        assert_eq!(err.code, "not_found");
    }
}

#[tokio::test]
async fn test_delete_trust_domain() {
    let fx = Fixture::new().await;
    fx.create_trust_domain("a.test").await;
    fx.create_trust_domain("b.test").await;
    let rel = fx.create_relationship("a.test", "b.test").await;

    // still referenced by the relationship
    let resp = fx.admin(Method::DELETE, "/trust-domain/a.test", None).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = fx
        .admin(Method::DELETE, &format!("/relationships/{}", rel.id), None)
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let resp = fx.admin(Method::DELETE, "/trust-domain/a.test", None).await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);
    let resp = fx.admin(Method::GET, "/trust-domain/a.test", None).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

// ─── Join Tokens ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_join_token_ttl() {
    let fx = Fixture::new().await;
    fx.create_trust_domain("example.org").await;

    let resp = fx
        .admin(Method::GET, "/trust-domain/example.org/join-token", None)
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let token: JoinTokenResponse = resp.json();
    assert_eq!(token.trust_domain, "example.org");
    assert!(!token.token.is_empty());
    let ttl = token.expires_at - chrono::Utc::now();
    assert!(ttl.num_seconds() > 590 && ttl.num_seconds() <= 600, "ttl {ttl}");

    let resp = fx
        .admin(Method::GET, "/trust-domain/example.org/join-token?ttl=0", None)
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = fx
        .admin(
            Method::GET,
            "/trust-domain/example.org/join-token?ttl=999999999",
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_join_token_for_unknown_trust_domain_rejected() {
    let fx = Fixture::new().await;
    let resp = fx
        .admin(Method::GET, "/trust-domain/missing.org/join-token", None)
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_join_tokens_are_distinct() {
    let fx = Fixture::new().await;
    fx.create_trust_domain("example.org").await;
    let first = fx.join_token("example.org").await;
    let second = fx.join_token("example.org").await;
    assert_ne!(first, second);
}

// ─── Relationships ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_relationship_starts_pending() {
    let fx = Fixture::new().await;
    fx.create_trust_domain("a.test").await;
    fx.create_trust_domain("b.test").await;

    let rel = fx.create_relationship("a.test", "b.test").await;
    assert_eq!(rel.trust_domain_a_name, "a.test");
    assert_eq!(rel.trust_domain_b_name, "b.test");
    assert_eq!(rel.trust_domain_a_consent, ConsentStatus::Pending);
    assert_eq!(rel.trust_domain_b_consent, ConsentStatus::Pending);

    let resp = fx
        .admin(Method::GET, &format!("/relationships/{}", rel.id), None)
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json::<RelationshipResponse>(), rel);
}

#[tokio::test]
async fn test_duplicate_pair_rejected() {
    let fx = Fixture::new().await;
    fx.create_trust_domain("a.test").await;
    fx.create_trust_domain("b.test").await;
    fx.create_relationship("a.test", "b.test").await;

    let resp = fx
        .admin(
            Method::PUT,
            "/relationships",
            Some(json!({ "trust_domain_a_name": "b.test", "trust_domain_b_name": "a.test" })),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_relationship_with_itself_rejected() {
    let fx = Fixture::new().await;
    fx.create_trust_domain("a.test").await;

    let resp = fx
        .admin(
            Method::PUT,
            "/relationships",
            Some(json!({ "trust_domain_a_name": "a.test", "trust_domain_b_name": "a.test" })),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_relationship_with_unknown_trust_domain() {
    let fx = Fixture::new().await;
    fx.create_trust_domain("a.test").await;

    let resp = fx
        .admin(
            Method::PUT,
            "/relationships",
            Some(json!({ "trust_domain_a_name": "a.test", "trust_domain_b_name": "nope.test" })),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_relationships_filters() {
    let fx = Fixture::new().await;
    for name in ["a.test", "b.test", "c.test"] {
        fx.create_trust_domain(name).await;
    }
    let ab = fx.approved_relationship("a.test", "b.test").await;
    let bc = fx.create_relationship("b.test", "c.test").await;

    let resp = fx.admin(Method::GET, "/relationships", None).await;
    let all: Vec<RelationshipResponse> = resp.json();
    assert_eq!(all.len(), 2);

    let resp = fx
        .admin(Method::GET, "/relationships?trust_domain_name=a.test", None)
        .await;
    let for_a: Vec<RelationshipResponse> = resp.json();
    assert_eq!(for_a.len(), 1);
    assert_eq!(for_a[0].id, ab.id);

    let resp = fx
        .admin(Method::GET, "/relationships?status=pending", None)
        .await;
    let pending: Vec<RelationshipResponse> = resp.json();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, bc.id);

    let resp = fx
        .admin(Method::GET, "/relationships?status=maybe", None)
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = fx
        .admin(Method::GET, "/relationships?page_size=1&page_number=1", None)
        .await;
    let page: Vec<RelationshipResponse> = resp.json();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, bc.id);
}

#[tokio::test]
async fn test_update_relationship_consent() {
    let fx = Fixture::new().await;
    fx.create_trust_domain("a.test").await;
    fx.create_trust_domain("b.test").await;
    let rel = fx.create_relationship("a.test", "b.test").await;
    let uri = format!("/relationships/{}", rel.id);

    let resp = fx
        .admin(
            Method::PATCH,
            &uri,
            Some(json!({ "trust_domain_a_consent": "approved" })),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let updated: RelationshipResponse = resp.json();
    assert_eq!(updated.trust_domain_a_consent, ConsentStatus::Approved);
    assert_eq!(updated.trust_domain_b_consent, ConsentStatus::Pending);

    // nothing returns to pending
    let resp = fx
        .admin(
            Method::PATCH,
            &uri,
            Some(json!({ "trust_domain_a_consent": "pending" })),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_relationship_bad_id() {
    let fx = Fixture::new().await;
    let resp = fx
        .admin(Method::GET, "/relationships/not-a-uuid", None)
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = fx
        .admin(
            Method::GET,
            "/relationships/00000000-0000-4000-8000-000000000000",
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}
