mod client;
mod response;

pub mod prelude {
    pub use crate::client::{HttpClient, RequestOptions, DEFAULT_TIMEOUT};
    pub use crate::response::HttpResponse;

    // Re-exported so that scenarios can build headers without depending on reqwest directly
    pub use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
    pub use reqwest::StatusCode;
}
