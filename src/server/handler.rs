// src/server/handler.rs
use hyper::{Body, Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::Service;
use tracing::Instrument;
use uuid::Uuid;

use crate::proxy::Proxy;

/// Per-connection service: every request becomes one selection + forward cycle.
#[derive(Clone)]
pub struct RequestHandler {
    proxy: Arc<Proxy>,
    client_addr: Option<SocketAddr>,
}

impl RequestHandler {
    pub fn new(proxy: Arc<Proxy>) -> Self {
        Self {
            proxy,
            client_addr: None,
        }
    }

    pub fn for_client(&self, client_addr: SocketAddr) -> Self {
        Self {
            proxy: self.proxy.clone(),
            client_addr: Some(client_addr),
        }
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let proxy = self.proxy.clone();
        let client_addr = self.client_addr;
        let span = tracing::info_span!(
            "request",
            request_id = %Uuid::new_v4(),
            method = %req.method(),
            path = %req.uri().path(),
        );

        Box::pin(
            async move {
                let response = proxy.handle(req, client_addr).await;
                tracing::debug!(status = response.status().as_u16(), "request complete");
                Ok(response)
            }
            .instrument(span),
        )
    }
}
