//! galadriel server library - http surfaces and application setup.
//!
//! this crate provides the central coordinator of the federation fabric:
//! - [`handlers`]: admin and harvester http handlers
//! - [`auth`]: join-token, client-certificate and jwt authentication
//! - [`endpoints`]: the supervisor serving both surfaces, with tls rotation
//! - [`bootstrap`]: key manager and onboarding ca construction from config
//! - [`cli`]: command-line interface implementation

#![warn(missing_docs)]

pub mod auth;
pub mod bootstrap;
pub mod cli;
pub mod endpoints;
pub mod handlers;

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, patch, post, put},
};
use galadriel_crypto::{JwtIssuer, JwtValidator, KeyManager, X509Ca};
use galadriel_db::GaladrielDb;
use galadriel_types::ServerConfig;

use crate::auth::{AuthMode, authenticate};

/// key manager id of the jwt signing key.
pub const JWT_KEY_ID: &str = "jwt-signing-key";

/// key manager id of the in-memory ca key.
pub const CA_KEY_ID: &str = "x509-ca-key";

/// `iss` claim of issued jwts.
pub const JWT_ISSUER: &str = "galadriel-server";

/// shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    /// datastore.
    pub db: GaladrielDb,
    /// onboarding ca; issues harvester client certificates and the tls leaf.
    pub ca: Arc<X509Ca>,
    /// key manager holding the jwt signing key.
    pub key_manager: Arc<dyn KeyManager>,
    /// mints harvester jwts.
    pub jwt_issuer: Arc<JwtIssuer>,
    /// checks harvester jwts.
    pub jwt_validator: Arc<JwtValidator>,
    /// server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// build state, generating the jwt signing key on first use.
    pub fn new(
        db: GaladrielDb,
        key_manager: Arc<dyn KeyManager>,
        ca: X509Ca,
        config: ServerConfig,
    ) -> galadriel_crypto::Result<Self> {
        key_manager.get_or_generate(JWT_KEY_ID, config.key_manager.key_type)?;
        let jwt_issuer = JwtIssuer::new(
            key_manager.clone(),
            JWT_KEY_ID,
            JWT_ISSUER,
            config.jwt_audience.clone(),
        );
        let jwt_validator = JwtValidator::new(key_manager.clone(), config.jwt_audience.clone());
        Ok(Self {
            db,
            ca: Arc::new(ca),
            key_manager,
            jwt_issuer: Arc::new(jwt_issuer),
            jwt_validator: Arc::new(jwt_validator),
            config: Arc::new(config),
        })
    }
}

/// router for the local admin surface.
pub fn create_admin_app(state: AppState) -> Router {
    use handlers::admin;

    Router::new()
        .route(
            "/trust-domain",
            get(admin::list_trust_domains).put(admin::create_trust_domain),
        )
        .route(
            "/trust-domain/{name}",
            get(admin::get_trust_domain)
                .put(admin::update_trust_domain)
                .delete(admin::delete_trust_domain),
        )
        .route(
            "/trust-domain/{name}/join-token",
            get(admin::generate_join_token),
        )
        .route(
            "/relationships",
            get(admin::list_relationships).put(admin::create_relationship),
        )
        .route(
            "/relationships/{id}",
            get(admin::get_relationship)
                .patch(admin::update_relationship)
                .delete(admin::delete_relationship),
        )
        .route("/healthz", get(handlers::health))
        .with_state(state)
}

/// router for the public harvester surface.
///
/// every route except `/healthz` carries exactly one [`AuthMode`].
pub fn create_harvester_app(state: AppState) -> Router {
    use handlers::harvester;

    let join_token =
        middleware::from_fn_with_state((state.clone(), AuthMode::JoinToken), authenticate);
    let client_cert =
        middleware::from_fn_with_state((state.clone(), AuthMode::ClientCert), authenticate);
    let jwt = middleware::from_fn_with_state((state.clone(), AuthMode::Jwt), authenticate);

    Router::new()
        .route(
            "/trust-domain/onboard",
            post(harvester::onboard).route_layer(join_token),
        )
        .route(
            "/trust-domain/{name}/jwt",
            get(harvester::mint_jwt).route_layer(client_cert.clone()),
        )
        .route(
            "/trust-domain/{name}/certificate",
            post(harvester::renew_certificate).route_layer(client_cert.clone()),
        )
        .route(
            "/trust-domain/{name}/bundles",
            put(harvester::put_bundle)
                .route_layer(client_cert)
                .merge(get(harvester::get_bundle).route_layer(jwt.clone())),
        )
        .route(
            "/trust-domain/{name}/bundles/sync",
            post(harvester::sync_bundles).route_layer(jwt.clone()),
        )
        .route(
            "/relationships",
            get(harvester::list_relationships).route_layer(jwt.clone()),
        )
        .route(
            "/relationships/{id}",
            patch(harvester::update_consent).route_layer(jwt),
        )
        .route("/healthz", get(handlers::health))
        .with_state(state)
}
