//! endpoints supervisor: serves the admin and harvester surfaces.
//!
//! the admin surface is plain http on a local address. the harvester surface
//! terminates tls itself so the presented client certificate can be handed to
//! the router as [`PeerCertificates`]. its serving certificate is issued by the
//! onboarding ca and rotated at half its lifetime.
//!
//! everything hangs off one [`CancellationToken`]; on cancellation both
//! listeners stop accepting and in-flight connections get `shutdown_timeout`
//! to finish.

use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use rustls::RootCertStore;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::{ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

use galadriel_crypto::{LeafParams, X509Ca};

use crate::auth::PeerCertificates;
use crate::{AppState, create_admin_app, create_harvester_app};

/// bound on a single tls handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// errors starting or running the endpoints.
#[derive(Debug, Error)]
pub enum EndpointsError {
    /// a listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// address that failed
        addr: String,
        /// underlying error
        source: std::io::Error,
    },

    /// the serving certificate could not be issued.
    #[error("certificate error: {0}")]
    Certificate(#[from] galadriel_crypto::Error),

    /// the tls configuration was rejected.
    #[error("tls error: {0}")]
    Tls(String),

    /// a listener failed while serving.
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

// ─── Certificate Rotation ────────────────────────────────────────────────────

/// serves the current tls leaf; the leaf is swapped as a whole on rotation.
#[derive(Debug)]
pub struct RotatingCertResolver {
    current: RwLock<Arc<CertifiedKey>>,
}

impl RotatingCertResolver {
    /// create a resolver serving `key`.
    pub fn new(key: CertifiedKey) -> Self {
        Self {
            current: RwLock::new(Arc::new(key)),
        }
    }

    /// replace the served certificate.
    pub fn rotate(&self, key: CertifiedKey) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(key);
    }

    /// the certificate currently served.
    pub fn current(&self) -> Arc<CertifiedKey> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ResolvesServerCert for RotatingCertResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.current())
    }
}

/// issue a serving certificate for `names`, chained to the ca.
pub fn issue_serving_certificate(
    ca: &X509Ca,
    names: &[String],
    ttl: Duration,
    provider: &CryptoProvider,
) -> Result<CertifiedKey, EndpointsError> {
    let key_pair = rcgen::KeyPair::generate()
        .map_err(|e| EndpointsError::Certificate(galadriel_crypto::Error::Key(e.to_string())))?;
    let leaf = ca.sign_public_key(&key_pair, &LeafParams::server(names, ttl))?;

    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    let signing_key = provider
        .key_provider
        .load_private_key(key_der)
        .map_err(|e| EndpointsError::Tls(e.to_string()))?;

    let chain = vec![
        CertificateDer::from(leaf.der),
        CertificateDer::from(ca.certificate_der().to_vec()),
    ];
    Ok(CertifiedKey::new(chain, signing_key))
}

/// build the harvester-surface tls config.
///
/// client certificates are requested, verified against the ca when presented,
/// but not required: join-token and jwt routes run without one.
pub fn tls_config(
    ca: &X509Ca,
    resolver: Arc<RotatingCertResolver>,
    provider: Arc<CryptoProvider>,
) -> Result<rustls::ServerConfig, EndpointsError> {
    let mut roots = RootCertStore::empty();
    roots
        .add(CertificateDer::from(ca.certificate_der().to_vec()))
        .map_err(|e| EndpointsError::Tls(e.to_string()))?;

    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .allow_unauthenticated()
        .build()
        .map_err(|e| EndpointsError::Tls(e.to_string()))?;

    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| EndpointsError::Tls(e.to_string()))?
        .with_client_cert_verifier(verifier)
        .with_cert_resolver(resolver);
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

async fn rotate_certificates(
    state: AppState,
    resolver: Arc<RotatingCertResolver>,
    provider: Arc<CryptoProvider>,
    cancel: CancellationToken,
) {
    let ttl = state.config.server_certificate_ttl;
    let period = (ttl / 2).max(Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);
    // the first tick completes immediately; the initial certificate is already in place
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }
        match issue_serving_certificate(&state.ca, &state.config.server_names, ttl, &provider) {
            Ok(key) => {
                resolver.rotate(key);
                info!(ttl = ?ttl, "rotated serving certificate");
            }
            Err(e) => error!(error = %e, "failed to rotate serving certificate"),
        }
    }
}

// ─── Supervisor ──────────────────────────────────────────────────────────────

/// bound listeners, ready to serve.
pub struct Endpoints {
    admin: TcpListener,
    harvester: TcpListener,
}

impl Endpoints {
    /// bind both surfaces.
    pub async fn bind(admin_addr: &str, harvester_addr: &str) -> Result<Self, EndpointsError> {
        let bind = |addr: &str| {
            let addr = addr.to_string();
            async move {
                TcpListener::bind(&addr)
                    .await
                    .map_err(|source| EndpointsError::Bind { addr, source })
            }
        };
        Ok(Self {
            admin: bind(admin_addr).await?,
            harvester: bind(harvester_addr).await?,
        })
    }

    /// local address of the admin surface.
    pub fn admin_addr(&self) -> std::io::Result<SocketAddr> {
        self.admin.local_addr()
    }

    /// local address of the harvester surface.
    pub fn harvester_addr(&self) -> std::io::Result<SocketAddr> {
        self.harvester.local_addr()
    }

    /// serve both surfaces until `cancel` fires, then drain.
    pub async fn serve(
        self,
        state: AppState,
        cancel: CancellationToken,
    ) -> Result<(), EndpointsError> {
        let Self { admin, harvester } = self;
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let initial = issue_serving_certificate(
            &state.ca,
            &state.config.server_names,
            state.config.server_certificate_ttl,
            &provider,
        )?;
        let resolver = Arc::new(RotatingCertResolver::new(initial));
        let tls = tls_config(&state.ca, resolver.clone(), provider.clone())?;
        let acceptor = TlsAcceptor::from(Arc::new(tls));

        let shutdown_timeout = state.config.shutdown_timeout;
        let tracker = TaskTracker::new();

        tracker.spawn(rotate_certificates(
            state.clone(),
            resolver,
            provider,
            cancel.clone(),
        ));

        let admin_app = create_admin_app(state.clone());
        let admin_cancel = cancel.clone();
        info!(addr = ?admin.local_addr(), "admin surface listening");
        let admin = tracker.spawn(async move {
            axum::serve(admin, admin_app)
                .with_graceful_shutdown(admin_cancel.cancelled_owned())
                .await
        });

        let harvester_app = create_harvester_app(state);
        info!(addr = ?harvester.local_addr(), "harvester surface listening");
        let harvester = tracker.spawn(accept_tls(
            harvester,
            acceptor,
            harvester_app,
            tracker.clone(),
            cancel.clone(),
        ));
        tracker.close();

        // a listener failing on its own takes the whole supervisor down
        let result = tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            res = admin => flatten(res),
            res = harvester => flatten(res),
        };
        cancel.cancel();

        info!(timeout = ?shutdown_timeout, "draining connections");
        if tokio::time::timeout(shutdown_timeout, tracker.wait())
            .await
            .is_err()
        {
            warn!("shutdown deadline exceeded, dropping remaining connections");
        }
        result
    }
}

fn flatten(
    res: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), EndpointsError> {
    match res {
        Ok(inner) => inner.map_err(EndpointsError::from),
        Err(e) => Err(EndpointsError::Serve(std::io::Error::other(e))),
    }
}

async fn accept_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    app: Router,
    tracker: TaskTracker,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    loop {
        let (stream, remote) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    // usually transient, e.g. EMFILE
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
        };
        tracker.spawn(serve_tls_connection(
            stream,
            remote,
            acceptor.clone(),
            app.clone(),
            cancel.clone(),
        ));
    }
}

async fn serve_tls_connection(
    stream: TcpStream,
    remote: SocketAddr,
    acceptor: TlsAcceptor,
    app: Router,
    cancel: CancellationToken,
) {
    let tls = match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
        Ok(Ok(tls)) => tls,
        Ok(Err(e)) => {
            debug!(%remote, error = %e, "tls handshake failed");
            return;
        }
        Err(_) => {
            debug!(%remote, "tls handshake timed out");
            return;
        }
    };

    let peer = PeerCertificates(
        tls.get_ref()
            .1
            .peer_certificates()
            .map(|certs| certs.iter().map(|c| c.to_vec()).collect())
            .unwrap_or_default(),
    );

    let service = hyper::service::service_fn(move |mut req: hyper::Request<Incoming>| {
        req.extensions_mut().insert(peer.clone());
        app.clone().oneshot(req)
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(tls), service);
    tokio::pin!(conn);
    tokio::select! {
        res = conn.as_mut() => {
            if let Err(e) = res {
                debug!(%remote, error = %e, "connection ended");
            }
        }
        _ = cancel.cancelled() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                debug!(%remote, error = %e, "connection ended during shutdown");
            }
        }
    }
}
