use http_client_instrumented::prelude::HttpClient;
use surge_runner::prelude::UserValuesConstraint;

#[derive(Default, Debug)]
pub struct HttpVuContext {
    pub client: Option<HttpClient>,
}

impl HttpVuContext {
    /// The client installed by [crate::common::install_client].
    pub fn client(&self) -> anyhow::Result<&HttpClient> {
        self.client.as_ref().ok_or_else(|| {
            anyhow::anyhow!("No HTTP client, call `install_client` in the virtual user setup")
        })
    }
}

impl UserValuesConstraint for HttpVuContext {}
