use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::cookie::Jar;
use reqwest::header::HeaderMap;
use reqwest::{redirect, Method, RequestBuilder};
use surge_instruments::{report_operation, OperationRecord, Reporter};
use url::Url;

use crate::response::{is_failure_status, HttpResponse};

/// Requests that get no response within this time fail with a transport error.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const METRIC_PREFIX: &str = "http_req";

/// Per request options.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub headers: HeaderMap,
    /// Follow redirects and return the final response. When false the redirect response itself
    /// is returned.
    pub follow_redirects: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            headers: HeaderMap::new(),
            follow_redirects: true,
        }
    }
}

impl RequestOptions {
    pub fn no_redirects() -> Self {
        Self {
            follow_redirects: false,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> anyhow::Result<Self> {
        self.headers.insert(
            name,
            value
                .parse()
                .with_context(|| format!("Invalid value for header {name}"))?,
        );
        Ok(self)
    }
}

/// An HTTP client that reports every request it makes.
///
/// Each request becomes an operation with the `http_req` prefix, feeding the
/// `http_req_duration`, `http_req_failed` and `http_reqs` metrics. A response with a status
/// outside 200-399 is returned to the caller but counted as failed. A transport error is counted
/// as failed and returned as an error.
///
/// Cookies are kept for the life of the client, so each virtual user should have its own.
#[derive(Debug, Clone)]
pub struct HttpClient {
    base_url: Url,
    client: reqwest::Client,
    no_redirect_client: reqwest::Client,
    reporter: Arc<Reporter>,
}

impl HttpClient {
    pub fn new(base_url: &str, reporter: Arc<Reporter>) -> anyhow::Result<Self> {
        Self::with_timeout(base_url, reporter, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        reporter: Arc<Reporter>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid base URL: {base_url}"))?;
        let jar = Arc::new(Jar::default());

        let client = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        let no_redirect_client = reqwest::Client::builder()
            .cookie_provider(jar)
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url,
            client,
            no_redirect_client,
            reporter,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a path against the base URL.
    pub fn url(&self, path: &str) -> anyhow::Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Invalid request path: {path}"))
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<HttpResponse> {
        self.request(Method::GET, path, RequestOptions::default(), |r| r)
            .await
    }

    pub async fn get_with(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> anyhow::Result<HttpResponse> {
        self.request(Method::GET, path, options, |r| r).await
    }

    /// POST a form encoded body.
    pub async fn post_form(
        &self,
        path: &str,
        form: &[(&str, &str)],
        options: RequestOptions,
    ) -> anyhow::Result<HttpResponse> {
        self.request(Method::POST, path, options, |r| r.form(form))
            .await
    }

    /// POST with no body.
    pub async fn post_empty(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> anyhow::Result<HttpResponse> {
        self.request(Method::POST, path, options, |r| r).await
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
        body: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> anyhow::Result<HttpResponse> {
        let url = self.url(path)?;
        let client = if options.follow_redirects {
            &self.client
        } else {
            &self.no_redirect_client
        };

        let mut operation_record = OperationRecord::new(format!("{method} {path}"), METRIC_PREFIX);
        operation_record.add_attr("method", &method);
        operation_record.add_attr("url", &url);

        let response = send(body(client.request(method, url).headers(options.headers))).await;
        match &response {
            Ok(response) => {
                operation_record.add_attr("status", response.status.as_u16());
                operation_record.finish(is_failure_status(response.status));
                self.reporter.add_operation(&operation_record);
            }
            Err(e) => {
                log::debug!("Request {} failed: {e:?}", operation_record.operation_id);
                report_operation(&self.reporter, operation_record, &response);
            }
        }

        response
    }
}

async fn send(request: RequestBuilder) -> anyhow::Result<HttpResponse> {
    let response = request.send().await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await?;

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use surge_instruments::ReportConfig;
    use surge_summary_model::MetricStats;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned response to each of `connections` connections.
    async fn serve(response: &'static str, connections: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for _ in 0..connections {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 4096];
                let mut read = 0;
                while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut buf[read..]).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    read += n;
                }
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            }
        });

        format!("http://{addr}")
    }

    #[test]
    fn resolve_paths() {
        let reporter = Arc::new(ReportConfig::default().init());
        let client = HttpClient::new("http://todo.local", reporter).unwrap();

        assert_eq!(
            "http://todo.local/accounts/signup/",
            client.url("/accounts/signup/").unwrap().as_str()
        );
        assert!(HttpClient::new("not a url", Arc::new(ReportConfig::default().init())).is_err());
    }

    #[tokio::test]
    async fn redirect_is_returned_when_not_followed() {
        let base = serve(
            "HTTP/1.1 302 Found\r\nLocation: /todos/\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            1,
        )
        .await;
        let reporter = Arc::new(ReportConfig::default().init());
        let client = HttpClient::new(&base, reporter.clone()).unwrap();

        let response = client
            .post_form(
                "/accounts/signup/",
                &[("email", "a@example.com")],
                RequestOptions::no_redirects().with_header("Referer", &base).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(StatusCode::FOUND, response.status);
        assert_eq!(Some("/todos/"), response.header("location"));
        assert!(matches!(
            reporter.metric_stats(Duration::from_secs(1)).get("http_req_failed"),
            Some(MetricStats::Rate { passes: 0, fails: 1, .. })
        ));
    }

    #[tokio::test]
    async fn error_status_counts_as_failed_request() {
        let base = serve(
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 4\r\nConnection: close\r\n\r\noops",
            1,
        )
        .await;
        let reporter = Arc::new(ReportConfig::default().init());
        let client = HttpClient::new(&base, reporter.clone()).unwrap();

        let response = client.get("/").await.unwrap();

        assert!(response.is_failure());
        assert_eq!("oops", response.body);
        let stats = reporter.metric_stats(Duration::from_secs(1));
        assert!(matches!(
            stats.get("http_req_failed"),
            Some(MetricStats::Rate { passes: 1, fails: 0, .. })
        ));
        assert!(matches!(
            stats.get("http_reqs"),
            Some(MetricStats::Counter { count: 1, .. })
        ));
    }

    #[tokio::test]
    async fn transport_error_is_reported_and_returned() {
        // Bind then drop a listener so that nothing is listening on the port.
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let reporter = Arc::new(ReportConfig::default().init());
        let client = HttpClient::new(&format!("http://{addr}"), reporter.clone()).unwrap();

        let result = client.get("/todos/").await;

        assert!(result.is_err());
        let stats = reporter.metric_stats(Duration::from_secs(1));
        assert!(matches!(
            stats.get("http_req_failed"),
            Some(MetricStats::Rate { passes: 1, fails: 0, .. })
        ));
    }
}
