//! galadriel client against a mocked harvester surface

mod common;

use chrono::{TimeDelta, Utc};
use galadriel_harvester::client::{ClientError, GaladrielClient, ServerApi};
use galadriel_types::api::{
    DigestMap, ErrorBody, HarvesterRelationship, JwtResponse, PutBundleRequest,
    RENEW_TOKEN_HEADER, SyncResponse,
};
use galadriel_types::{ConsentStatus, RelationshipId};
use reqwest::StatusCode;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::config;

const JWT_PATH: &str = "/trust-domain/a.test/jwt";
const SYNC_PATH: &str = "/trust-domain/a.test/bundles/sync";

fn client(server: &MockServer) -> GaladrielClient {
    GaladrielClient::with_base_url(&config("a.test"), Url::parse(&server.uri()).unwrap()).unwrap()
}

fn jwt(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(JwtResponse {
        token: token.to_string(),
        expires_at: Utc::now() + TimeDelta::minutes(10),
    })
}

fn empty_sync() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(SyncResponse::default())
}

#[tokio::test]
async fn test_bearer_token_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWT_PATH))
        .respond_with(jwt("tok-1"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SYNC_PATH))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(empty_sync())
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    client.sync_bundles(DigestMap::new()).await.unwrap();
    client.sync_bundles(DigestMap::new()).await.unwrap();
}

#[tokio::test]
async fn test_renew_header_mints_new_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWT_PATH))
        .respond_with(jwt("tok-1"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(JWT_PATH))
        .respond_with(jwt("tok-2"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SYNC_PATH))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(empty_sync().insert_header(RENEW_TOKEN_HEADER, "true"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SYNC_PATH))
        .and(header("authorization", "Bearer tok-2"))
        .respond_with(empty_sync())
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    client.sync_bundles(DigestMap::new()).await.unwrap();
    client.sync_bundles(DigestMap::new()).await.unwrap();
}

#[tokio::test]
async fn test_rejected_token_is_retried_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWT_PATH))
        .respond_with(jwt("stale"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(JWT_PATH))
        .respond_with(jwt("fresh"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SYNC_PATH))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SYNC_PATH))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(empty_sync())
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .sync_bundles(DigestMap::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_persistent_unauthorized_is_returned() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWT_PATH))
        .respond_with(jwt("tok"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SYNC_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let err = client(&server)
        .sync_bundles(DigestMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    assert!(err.is_rejection());
}

#[tokio::test]
async fn test_sync_sends_known_digests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWT_PATH))
        .respond_with(jwt("tok"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SYNC_PATH))
        .and(body_json(json!({ "b.test": "digest-b" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "updates": {},
            "state": { "b.test": "digest-b" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut known = DigestMap::new();
    known.insert("b.test".to_string(), "digest-b".to_string());
    let response = client(&server).sync_bundles(known).await.unwrap();
    assert!(response.updates.is_empty());
    assert_eq!(response.state["b.test"], "digest-b");
}

#[tokio::test]
async fn test_put_bundle_error_body_is_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/trust-domain/a.test/bundles"))
        .respond_with(ResponseTemplate::new(400).set_body_json(ErrorBody {
            code: "invalid_argument".to_string(),
            message: "trust bundle is empty".to_string(),
        }))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .put_bundle(PutBundleRequest {
            trust_domain: "a.test".to_string(),
            trust_bundle: String::new(),
            signature: None,
            signing_certificate: None,
            digest: None,
        })
        .await
        .unwrap_err();
    match err {
        ClientError::Api {
            status,
            code,
            message,
        } => {
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(code.as_deref(), Some("invalid_argument"));
            assert_eq!(message, "trust bundle is empty");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_put_bundle_does_not_mint_jwt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWT_PATH))
        .respond_with(jwt("tok"))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/trust-domain/a.test/bundles"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .put_bundle(PutBundleRequest {
            trust_domain: "a.test".to_string(),
            trust_bundle: "BYTES-A".to_string(),
            signature: None,
            signing_certificate: None,
            digest: None,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_list_relationships_filters_by_consent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWT_PATH))
        .respond_with(jwt("tok"))
        .mount(&server)
        .await;
    let rel = HarvesterRelationship {
        id: RelationshipId::new_random(),
        peer_trust_domain: "b.test".to_string(),
        consent_status: ConsentStatus::Pending,
        peer_consent_status: ConsentStatus::Approved,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    Mock::given(method("GET"))
        .and(path("/relationships"))
        .and(query_param("consent_status", "pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![rel.clone()]))
        .expect(1)
        .mount(&server)
        .await;

    let rels = client(&server)
        .list_relationships(Some(ConsentStatus::Pending))
        .await
        .unwrap();
    assert_eq!(rels, vec![rel]);
}

#[tokio::test]
async fn test_update_consent_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWT_PATH))
        .respond_with(jwt("tok"))
        .mount(&server)
        .await;
    let id = RelationshipId::new_random();
    Mock::given(method("PATCH"))
        .and(path(format!("/relationships/{id}")))
        .and(body_json(json!({ "consent_status": "approved" })))
        .respond_with(ResponseTemplate::new(404).set_body_json(ErrorBody {
            code: "not_found".to_string(),
            message: "relationship not found".to_string(),
        }))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .update_consent(id, ConsentStatus::Approved)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    let server = MockServer::start().await;
    let uri = Url::parse(&server.uri()).unwrap();
    drop(server);

    let client = GaladrielClient::with_base_url(&config("a.test"), uri).unwrap();
    let err = client.mint_jwt().await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
    assert!(!err.is_rejection());
}
