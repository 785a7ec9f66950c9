// HTTP serving: access control, admission control and verified streaming
//
// Each request is handled on its own thread. The flow is
// access control -> per-IP rate check -> path resolution -> download slot ->
// integrity check -> (throttled) stream.

pub mod access;
pub mod container;
pub mod governor;
pub mod listing;
pub mod streamer;

pub use access::{AccessControl, AccessDecision};
pub use container::ContainerKind;
pub use governor::{DownloadPermit, ResourceGovernor, ResourceSnapshot, ResourceState};

use crate::config::{CatalogTarget, MirrorConfig};
use crate::constants::{CONCURRENCY_RETRY_AFTER, RATE_LIMIT_RETRY_AFTER};
use crate::error::{DenyReason, MirrorError};
use crate::persist::ConfigStore;
use log::{debug, error, info, warn};
use std::fs::File;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use streamer::{ServeOutcome, ThrottledReader};

/// The parts of an HTTP request the orchestrator looks at
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub method: String,
    /// Raw request target, possibly with a query string
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub remote_addr: Option<SocketAddr>,
}

impl RequestInfo {
    pub fn get(path: &str) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    /// Case-insensitive header lookup, first value wins
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub enum ReplyBody {
    Empty,
    Text(String),
    /// Headers of a file response without its body
    Head(u64),
    Stream {
        reader: ThrottledReader<File>,
        len: u64,
    },
}

pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ReplyBody,
}

impl Reply {
    fn new(status: u16, body: ReplyBody) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
        }
    }

    fn text(status: u16, content_type: &str, body: impl Into<String>) -> Self {
        Self::new(status, ReplyBody::Text(body.into())).with_header("Content-Type", content_type)
    }

    fn plain(status: u16, body: impl Into<String>) -> Self {
        Self::text(status, "text/plain; charset=utf-8", body)
    }

    fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body text for non-streaming replies
    pub fn text_body(&self) -> Option<&str> {
        match &self.body {
            ReplyBody::Text(text) => Some(text),
            _ => None,
        }
    }

    fn denied(reason: DenyReason, realm: &str) -> Self {
        let status = MirrorError::AccessDenied(reason).status_code();
        match reason {
            DenyReason::IpDenied => {
                Self::text(status, "text/html; charset=utf-8", access::FORBIDDEN_BODY)
            }
            DenyReason::AuthRequired | DenyReason::AuthFailed => {
                Self::text(status, "text/html; charset=utf-8", access::UNAUTHORIZED_BODY)
                    .with_header(
                        "WWW-Authenticate",
                        &format!("Basic realm=\"{}\"", realm.replace('"', "")),
                    )
            }
        }
    }

    fn from_error(err: &MirrorError) -> Self {
        let body = match err {
            // Never echo filesystem paths back to clients
            MirrorError::NotFound(_) | MirrorError::CorruptedArtifact { .. } => {
                "not found\n".to_string()
            }
            _ => format!("{}\n", err),
        };
        let reply = Self::plain(err.status_code(), body);
        match err {
            MirrorError::RateLimitExceeded { .. } => {
                reply.with_header("Retry-After", RATE_LIMIT_RETRY_AFTER)
            }
            MirrorError::ConcurrencyCapped => {
                reply.with_header("Retry-After", CONCURRENCY_RETRY_AFTER)
            }
            _ => reply,
        }
    }
}

/// Map a request path onto the data directory
///
/// The path is percent-decoded and any `..` segment rejects it outright.
pub fn resolve_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let raw = request_path.split(['?', '#']).next().unwrap_or("");
    let decoded = urlencoding::decode(raw).ok()?;

    let mut resolved = root.to_path_buf();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s if s.contains('\\') || s.contains('\0') || s.contains(':') => return None,
            s => resolved.push(s),
        }
    }
    Some(resolved)
}

/// Target name from `/api/<target>.json`
fn api_target(request_path: &str) -> Option<&str> {
    let path = request_path.split('?').next().unwrap_or("");
    path.strip_prefix("/api/")?
        .strip_suffix(".json")
        .filter(|name| !name.is_empty() && !name.contains('/'))
}

/// Request handling shared by every connection thread
pub struct MirrorService {
    data_dir: PathBuf,
    access: AccessControl,
    governor: Arc<ResourceGovernor>,
    store: ConfigStore,
    targets: Vec<CatalogTarget>,
}

impl MirrorService {
    pub fn new(config: &MirrorConfig) -> Self {
        Self {
            data_dir: config.server.data_dir.clone(),
            access: AccessControl::new(&config.access),
            governor: Arc::new(ResourceGovernor::open(&config.resources)),
            store: ConfigStore::new(config.discovery.config_dir.clone()),
            targets: config.targets.clone(),
        }
    }

    pub fn governor(&self) -> &Arc<ResourceGovernor> {
        &self.governor
    }

    pub fn handle(&self, request: &RequestInfo) -> Reply {
        let decision = self.access.check(request);
        if let Some(reason) = decision.denied {
            return Reply::denied(reason, self.access.realm());
        }

        if !self.governor.check_ip_request_rate(&decision.client_ip) {
            warn!(
                target: "pkgmirror::access",
                "ip={} method={} path={} reason=rate_limited",
                decision.client_ip, request.method, request.path
            );
            return Reply::from_error(&MirrorError::RateLimitExceeded {
                ip: decision.client_ip,
            });
        }

        let head = match request.method.as_str() {
            "GET" => false,
            "HEAD" => true,
            _ => {
                return Reply::plain(405, "method not allowed\n").with_header("Allow", "GET, HEAD");
            }
        };

        if let Some(name) = api_target(&request.path) {
            return self.api(name);
        }

        let Some(path) = resolve_path(&self.data_dir, &request.path) else {
            return Reply::from_error(&MirrorError::NotFound(request.path.clone()));
        };

        if path.is_dir() {
            return self.directory(&request.path, &path);
        }

        self.file(&path, head)
    }

    fn api(&self, name: &str) -> Reply {
        let Some(target) = self.targets.iter().find(|t| t.name == name) else {
            return Reply::from_error(&MirrorError::NotFound(format!("target '{}'", name)));
        };
        match listing::api_snapshot(&self.store, target, &self.governor) {
            Ok(snapshot) => match serde_json::to_string_pretty(&snapshot) {
                Ok(body) => Reply::text(200, "application/json", body),
                Err(e) => Reply::plain(500, format!("{}\n", e)),
            },
            Err(e) => {
                error!("Failed to build status for '{}': {}", name, e);
                Reply::plain(500, "failed to read target config\n")
            }
        }
    }

    fn directory(&self, request_path: &str, dir: &Path) -> Reply {
        let url_path = request_path.split('?').next().unwrap_or("/");
        if !url_path.ends_with('/') {
            return Reply::new(301, ReplyBody::Empty).with_header("Location", &format!("{}/", url_path));
        }

        let shown = urlencoding::decode(url_path)
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| url_path.to_string());
        match listing::render_directory(&shown, dir) {
            Ok(html) => Reply::text(200, "text/html; charset=utf-8", html),
            Err(e) => {
                error!("Failed to list {}: {}", dir.display(), e);
                Reply::plain(500, "failed to list directory\n")
            }
        }
    }

    fn file(&self, path: &Path, head: bool) -> Reply {
        if !path.is_file() {
            return Reply::from_error(&MirrorError::NotFound(path.display().to_string()));
        }

        let Some(permit) = self.governor.try_acquire_download() else {
            return Reply::from_error(&MirrorError::ConcurrencyCapped);
        };

        let served = match streamer::prepare(path) {
            ServeOutcome::Ready(served) => served,
            ServeOutcome::NotFound => {
                return Reply::from_error(&MirrorError::NotFound(path.display().to_string()));
            }
            ServeOutcome::Corrupted(reason) => {
                return Reply::from_error(&MirrorError::CorruptedArtifact {
                    path: path.to_path_buf(),
                    reason: reason.to_string(),
                });
            }
        };

        let reply = |body| {
            Reply::new(200, body).with_header("Content-Type", served.kind.content_type())
        };

        if head {
            return reply(ReplyBody::Head(served.len));
        }

        match ThrottledReader::open(&served, Arc::clone(&self.governor), Some(permit)) {
            Ok(reader) => reply(ReplyBody::Stream {
                reader,
                len: served.len,
            }),
            Err(e) => {
                error!("Failed to open {}: {}", served.path.display(), e);
                Reply::from_error(&MirrorError::NotFound(served.path.display().to_string()))
            }
        }
    }
}

fn request_info(request: &tiny_http::Request) -> RequestInfo {
    RequestInfo {
        method: request.method().as_str().to_string(),
        path: request.url().to_string(),
        headers: request
            .headers()
            .iter()
            .map(|h| (h.field.to_string(), h.value.to_string()))
            .collect(),
        remote_addr: request.remote_addr().copied(),
    }
}

fn respond(request: tiny_http::Request, reply: Reply) -> io::Result<()> {
    let headers: Vec<tiny_http::Header> = reply
        .headers
        .iter()
        .filter_map(|(k, v)| tiny_http::Header::from_bytes(k.as_bytes(), v.as_bytes()).ok())
        .collect();
    let status = tiny_http::StatusCode(reply.status);

    match reply.body {
        ReplyBody::Empty => request.respond(tiny_http::Response::new(
            status,
            headers,
            io::empty(),
            Some(0),
            None,
        )),
        ReplyBody::Text(text) => {
            let len = text.len();
            request.respond(tiny_http::Response::new(
                status,
                headers,
                io::Cursor::new(text.into_bytes()),
                Some(len),
                None,
            ))
        }
        ReplyBody::Head(len) => request.respond(tiny_http::Response::new(
            status,
            headers,
            io::empty(),
            usize::try_from(len).ok(),
            None,
        )),
        ReplyBody::Stream { reader, len } => request.respond(tiny_http::Response::new(
            status,
            headers,
            reader,
            usize::try_from(len).ok(),
            None,
        )),
    }
}

pub struct MirrorServer {
    server: tiny_http::Server,
    service: Arc<MirrorService>,
}

impl MirrorServer {
    pub fn bind(listen: &str, service: MirrorService) -> anyhow::Result<Self> {
        let server = tiny_http::Server::http(listen)
            .map_err(|e| anyhow::anyhow!("Failed to listen on {}: {}", listen, e))?;
        Ok(Self {
            server,
            service: Arc::new(service),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Accept connections until the listener fails
    pub fn run(self) {
        if let Some(addr) = self.local_addr() {
            info!("Serving mirror on http://{}", addr);
        }
        for request in self.server.incoming_requests() {
            let service = Arc::clone(&self.service);
            std::thread::spawn(move || {
                let info = request_info(&request);
                let reply = service.handle(&info);
                debug!("{} {} -> {}", info.method, info.path, reply.status);
                // A failed write means the client went away mid-response
                if let Err(e) = respond(request, reply) {
                    debug!("Response to {} aborted: {}", info.path, e);
                }
            });
        }
    }
}
