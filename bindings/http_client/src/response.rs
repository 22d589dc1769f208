use reqwest::header::HeaderMap;
use reqwest::StatusCode;

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpResponse {
    /// The value of a header, if it is present and valid text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Statuses outside 200-399 are counted as failed requests.
    pub fn is_failure(&self) -> bool {
        is_failure_status(self.status)
    }
}

pub(crate) fn is_failure_status(status: StatusCode) -> bool {
    !(200..400).contains(&status.as_u16())
}
