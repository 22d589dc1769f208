use surge_runner::prelude::UserValuesConstraint;

#[derive(Default, Debug)]
pub struct HttpRunnerContext {
    pub base_url: Option<String>,
}

impl HttpRunnerContext {
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(crate::common::DEFAULT_BASE_URL)
    }
}

impl UserValuesConstraint for HttpRunnerContext {}
