//! HTTP server module
//!
//! The gateway's inbound face: the reverse proxy calls `/verify` (or
//! `/authorize`) as an auth subrequest and acts on the status code;
//! browsers land on `/login` and `/login/callback` for the interactive
//! OIDC flow. Sessions ride in a signed cookie attached here.

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::auth::bearer::BearerAuthenticator;
use crate::auth::cookie::CookieAuthenticator;
use crate::auth::oidc::{OidcAuthenticator, OidcClient};
use crate::auth::{AuthRequest, AuthenticationPipeline, Authenticator};
use crate::authz::opa::OpaAuthorizer;
use crate::authz::saml::SamlAuthorizer;
use crate::authz::Authorizer;
use crate::config::{AuthzBackend, Config, ConfigError, StrategyKind};
use crate::gateway::{AccessOutcome, Gateway};
use crate::resource::ResourceResolver;
use crate::session::{Session, SessionCodec};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Server error: {0}")]
    RuntimeError(String),

    #[error(transparent)]
    ConfigError(#[from] ConfigError),
}

/// Shared per-process state, built once from configuration
pub struct AppState {
    config: Config,
    gateway: Gateway,
    codec: SessionCodec,
    oidc: Option<Arc<OidcClient>>,
}

impl AppState {
    /// Wire up strategies, decision backend, and session codec.
    ///
    /// The configuration has already been validated, so a missing
    /// section here is a programming error surfaced as `ConfigError`.
    pub fn from_config(config: Config) -> Result<Self, ServerError> {
        let codec = SessionCodec::new(&config.session.shared_secret, config.session.max_age_secs);

        let oidc = config
            .auth
            .oidc
            .clone()
            .map(|oidc_config| Arc::new(OidcClient::new(oidc_config)));

        let mut strategies: Vec<Box<dyn Authenticator>> = Vec::new();
        for kind in &config.auth.order {
            match kind {
                StrategyKind::Bearer => {
                    let bearer = config.auth.bearer.clone().ok_or_else(|| {
                        ConfigError::ValidationError("auth.bearer is missing".into())
                    })?;
                    strategies.push(Box::new(BearerAuthenticator::new(bearer)));
                }
                StrategyKind::Oidc => {
                    let client = oidc.clone().ok_or_else(|| {
                        ConfigError::ValidationError("auth.oidc is missing".into())
                    })?;
                    strategies.push(Box::new(OidcAuthenticator::new(client)));
                }
                StrategyKind::Cookie => {
                    let cookie = config.auth.cookie.as_ref().ok_or_else(|| {
                        ConfigError::ValidationError("auth.cookie is missing".into())
                    })?;
                    strategies.push(Box::new(CookieAuthenticator::new(cookie)?));
                }
            }
        }

        let authorizer: Box<dyn Authorizer> = match config.authz.backend {
            AuthzBackend::Saml => {
                let saml = config.authz.saml.clone().ok_or_else(|| {
                    ConfigError::ValidationError("authz.saml is missing".into())
                })?;
                Box::new(SamlAuthorizer::new(saml))
            }
            AuthzBackend::Opa => {
                let opa = config.authz.opa.clone().ok_or_else(|| {
                    ConfigError::ValidationError("authz.opa is missing".into())
                })?;
                Box::new(OpaAuthorizer::new(opa))
            }
        };

        let gateway = Gateway::new(
            config.gateway.clone(),
            ResourceResolver::new(&config.resolver),
            AuthenticationPipeline::new(strategies),
            authorizer,
        );

        Ok(Self {
            config,
            gateway,
            codec,
            oidc,
        })
    }
}

/// HTTP server for the gateway
pub struct Server {
    state: Arc<AppState>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Create a new server instance, binding immediately.
    ///
    /// With port 0 the OS assigns a free port; see [`Server::local_addr`].
    pub async fn new(config: Config) -> Result<Self, ServerError> {
        let address = config.server.address.clone();
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        let state = Arc::new(AppState::from_config(config)?);

        info!("Server bound to {}", local_addr);

        Ok(Self {
            state,
            listener,
            local_addr,
        })
    }

    /// Get the local address the server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the server.
    ///
    /// Accepts connections until a fatal accept error; individual
    /// connection failures are logged and skipped.
    pub async fn run(self) -> Result<(), ServerError> {
        info!("Starting gateway on {}", self.local_addr);

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let state = Arc::clone(&self.state);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { handle_request(req, state).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }
    }
}

/// Build an [`AuthRequest`] from hyper request parts
fn build_auth_request(req: &Request<Incoming>) -> AuthRequest {
    let mut headers = HashMap::new();
    for (name, value) in req.headers() {
        if let Ok(v) = value.to_str() {
            headers.insert(name.to_string().to_lowercase(), v.to_string());
        }
    }

    let cookies = headers
        .get("cookie")
        .map(|header| parse_cookie_header(header))
        .unwrap_or_default();

    AuthRequest {
        headers,
        cookies,
        query: req.uri().query().map(|q| q.to_string()),
        method: req.method().to_string(),
        path: req.uri().path().to_string(),
    }
}

fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for pair in header.split(';') {
        let mut kv = pair.trim().splitn(2, '=');
        if let (Some(name), Some(value)) = (kv.next(), kv.next()) {
            cookies.insert(name.to_string(), value.to_string());
        }
    }
    cookies
}

/// Rough browser check for the interactive login flow.
///
/// The redirect dance needs a real browser; command-line clients get a
/// 401 and should use a bearer token instead.
fn is_browser(user_agent: &str) -> bool {
    let ua = user_agent.to_ascii_lowercase();
    ["mozilla", "chrome", "safari", "firefox", "edg", "opera"]
        .iter()
        .any(|token| ua.contains(token))
}

fn text_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("Failed to build response")
}

fn redirect_response(location: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::FOUND)
        .header("Location", location)
        .body(Full::new(Bytes::from("Redirecting")))
        .expect("Failed to build redirect response")
}

/// Handle HTTP request
///
/// # Endpoints
///
/// * `GET /verify`, `GET /authorize` - auth-subrequest check: 200/401/403
/// * `GET /login` - start the interactive OIDC flow
/// * `GET /login/callback` - complete the flow
/// * `GET /` - liveness text
/// * `GET /health` - health check
async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    let auth_request = build_auth_request(&req);
    let mut session = auth_request
        .cookies
        .get(&state.config.session.cookie_name)
        .map(|value| state.codec.decode(value))
        .unwrap_or_default();

    let mut response = match (&method, path.as_str()) {
        (&Method::GET, "/") => text_response(StatusCode::OK, "The auth gateway is running"),
        (&Method::GET, "/health") => text_response(StatusCode::OK, "ok"),
        (&Method::GET, "/verify") | (&Method::GET, "/authorize") => {
            verify(&state, &auth_request, &mut session).await
        }
        (&Method::GET, "/login") => login(&state, &auth_request, &mut session).await,
        (&Method::GET, "/login/callback") => callback(&state, &auth_request, &mut session).await,
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    if session.is_dirty() {
        let cookie = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            state.config.session.cookie_name,
            state.codec.encode(&session),
            state.config.session.max_age_secs,
        );
        if let Ok(value) = cookie.parse() {
            response.headers_mut().append(hyper::header::SET_COOKIE, value);
        }
    }

    #[cfg(feature = "metrics")]
    crate::metrics::record_request(&path, response.status().as_u16());

    Ok(response)
}

/// Auth-subrequest endpoint: the reverse proxy acts on the status code
async fn verify(
    state: &AppState,
    request: &AuthRequest,
    session: &mut Session,
) -> Response<Full<Bytes>> {
    let outcome = match state.gateway.check(request, session).await {
        Ok(outcome) => outcome,
        Err(e) => {
            // The security control itself is broken; this must stay
            // distinguishable from a legitimate 401/403.
            error!(error = %e, "Decision service failure");
            #[cfg(feature = "metrics")]
            crate::metrics::record_decision_error();
            return text_response(StatusCode::BAD_GATEWAY, "Authorization service unavailable");
        }
    };

    match outcome {
        AccessOutcome::Exempt | AccessOutcome::NoResource | AccessOutcome::Permitted => {
            let mut response = text_response(StatusCode::OK, "Authorized");
            if let Some(identity) = session.identity() {
                let header = state.config.gateway.remote_user_header.clone();
                if let (Ok(name), Ok(value)) = (
                    hyper::header::HeaderName::try_from(header),
                    identity.username.parse::<hyper::header::HeaderValue>(),
                ) {
                    response.headers_mut().insert(name, value);
                }
            }
            response
        }
        AccessOutcome::DeniedUnauthenticated => {
            text_response(StatusCode::UNAUTHORIZED, "Unauthenticated")
        }
        AccessOutcome::DeniedForbidden => text_response(StatusCode::FORBIDDEN, "Forbidden"),
    }
}

/// Start the interactive OIDC login
async fn login(
    state: &AppState,
    request: &AuthRequest,
    session: &mut Session,
) -> Response<Full<Bytes>> {
    let resolver = state.gateway.resolver();
    let target = resolver.resolve(request, session);

    if session.is_authenticated() {
        return redirect_response(target.as_deref().unwrap_or("/"));
    }

    let oidc = match &state.oidc {
        Some(client) => client,
        None => return text_response(StatusCode::NOT_FOUND, "Interactive login is not configured"),
    };

    if let Some(uri) = &target {
        resolver.save(session, uri);
    }

    let browser = request
        .headers
        .get("user-agent")
        .map(|ua| is_browser(ua))
        .unwrap_or(false);
    if !browser {
        return text_response(StatusCode::UNAUTHORIZED, "Browser not supported");
    }

    let (url, handshake) = oidc.begin_handshake();
    session.set_oidc_handshake(handshake);
    redirect_response(&url)
}

/// Complete the interactive OIDC login
async fn callback(
    state: &AppState,
    request: &AuthRequest,
    session: &mut Session,
) -> Response<Full<Bytes>> {
    let target = session
        .take_pending_resource()
        .unwrap_or_else(|| "/".to_string());

    state.gateway.pipeline().authenticate(request, session).await;

    if session.is_authenticated() {
        redirect_response(&target)
    } else {
        text_response(StatusCode::UNAUTHORIZED, "Failed to authenticate")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cookie_header() {
        let cookies = parse_cookie_header("a=1; session=abc.def; b=x=y");
        assert_eq!(cookies.get("a").unwrap(), "1");
        assert_eq!(cookies.get("session").unwrap(), "abc.def");
        assert_eq!(cookies.get("b").unwrap(), "x=y");
    }

    #[test]
    fn test_is_browser() {
        assert!(is_browser(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 Chrome/120.0 Safari/537.36"
        ));
        assert!(is_browser("Mozilla/5.0 (Windows NT 10.0; rv:109.0) Gecko/20100101 Firefox/115.0"));
        assert!(!is_browser("curl/8.4.0"));
        assert!(!is_browser("python-requests/2.31"));
        assert!(!is_browser("Wget/1.21"));
    }
}
