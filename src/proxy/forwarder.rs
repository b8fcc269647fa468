// src/proxy/forwarder.rs
use super::backend::Backend;
use crate::config::BackendScheme;
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION};
use hyper::{Body, Client, Request, Response, Uri, Version};
use hyper_tls::HttpsConnector;
use std::net::SocketAddr;
use std::time::Duration;

/// Headers that describe a single hop and must not be passed along.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid upstream uri: {0}")]
    InvalidUri(#[from] hyper::http::uri::InvalidUri),

    #[error("upstream request failed: {0}")]
    Transport(#[from] hyper::Error),
}

/// Proxies one request to an already chosen backend and hands back its response.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(
        &self,
        backend: &Backend,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<Body>, ForwardError>;
}

pub struct HyperForwarder {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    scheme: BackendScheme,
}

impl HyperForwarder {
    pub fn new(scheme: BackendScheme, connect_timeout: Duration) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(connect_timeout));
        http.set_keepalive(Some(Duration::from_secs(60)));

        let client = Client::builder().build::<_, Body>(HttpsConnector::new_with_connector(http));

        Self { client, scheme }
    }

    fn upstream_uri(&self, backend: &Backend, original: &Uri) -> Result<Uri, ForwardError> {
        let path = original.path_and_query().map_or("/", |pq| pq.as_str());
        Ok(format!("{}://{}{}", self.scheme, backend.address, path).parse()?)
    }
}

#[async_trait]
impl Forwarder for HyperForwarder {
    async fn forward(
        &self,
        backend: &Backend,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<Body>, ForwardError> {
        let (mut parts, body) = req.into_parts();

        parts.uri = self.upstream_uri(backend, &parts.uri)?;
        parts.version = Version::HTTP_11;
        remove_hop_by_hop_headers(&mut parts.headers);
        if let Some(addr) = client_addr {
            append_forwarded_for(&mut parts.headers, addr);
        }

        let mut response = self.client.request(Request::from_parts(parts, body)).await?;
        remove_hop_by_hop_headers(response.headers_mut());
        Ok(response)
    }
}

fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    // Headers named in `Connection` are hop-by-hop as well.
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, client_addr: SocketAddr) {
    let ip = client_addr.ip().to_string();
    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{}, {}", prior, ip),
        None => ip,
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
    }
}
