/// Minimal HTTP/1.1 client shared by the REST API and long-polling transport
use crate::error::{ClientError, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| ClientError::Http(format!("Response is not UTF-8: {}", e)))
    }
}

#[derive(Clone)]
pub struct HttpClient {
    inner: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Client::builder(TokioExecutor::new()).build_http(),
            timeout,
        }
    }

    pub async fn get(&self, url: &str, headers: &[(&str, String)]) -> Result<HttpResponse> {
        self.send(Method::GET, url, headers, Bytes::new()).await
    }

    pub async fn post(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: impl Into<Bytes>,
    ) -> Result<HttpResponse> {
        self.send(Method::POST, url, headers, body.into()).await
    }

    /// Like `get`, but without the request timeout (long-polling)
    pub async fn get_unbounded(&self, url: &str, headers: &[(&str, String)]) -> Result<HttpResponse> {
        self.dispatch(self.build(Method::GET, url, headers, Bytes::new())?)
            .await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, String)],
        body: Bytes,
    ) -> Result<HttpResponse> {
        let request = self.build(method, url, headers, body)?;
        timeout(self.timeout, self.dispatch(request))
            .await
            .map_err(|_| ClientError::Timeout(format!("Request to {} timed out", url)))?
    }

    fn build(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, String)],
        body: Bytes,
    ) -> Result<Request<Full<Bytes>>> {
        if url.starts_with("https://") {
            return Err(ClientError::Config(format!(
                "{} uses https, which this HTTP client does not speak; put a TLS-terminating proxy in front",
                url
            )));
        }
        let mut builder = Request::builder().method(method).uri(url);
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        builder
            .body(Full::new(body))
            .map_err(|e| ClientError::Http(format!("Invalid request to {}: {}", url, e)))
    }

    async fn dispatch(&self, request: Request<Full<Bytes>>) -> Result<HttpResponse> {
        let uri = request.uri().clone();
        debug!("{} {}", request.method(), uri);
        let response = self
            .inner
            .request(request)
            .await
            .map_err(|e| ClientError::Connection(format!("{}: {}", uri, e)))?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ClientError::Http(format!("Failed to read body from {}: {}", uri, e)))?
            .to_bytes();
        Ok(HttpResponse { status, body })
    }
}
