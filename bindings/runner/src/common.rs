use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context;
use http_client_instrumented::prelude::HttpClient;
use rand::seq::SliceRandom;
use regex::Regex;
use surge_runner::prelude::{
    HookResult, RunnerContext, SurgeResult, UserValuesConstraint, VuContext,
};

use crate::context::HttpVuContext;
use crate::runner_context::HttpRunnerContext;

/// Used when no `--base-url` is given.
pub const DEFAULT_BASE_URL: &str = "http://todo.local";

const RANDOM_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

static CSRF_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"name="csrfmiddlewaretoken"[^>]*?value="([^"]*)"|value="([^"]*)"[^>]*?name="csrfmiddlewaretoken""#,
    )
    .expect("CSRF token pattern is valid")
});

/// Sets the `base_url` value in [HttpRunnerContext] from the command line, falling back to
/// [DEFAULT_BASE_URL].
///
/// Call this in the scenario `setup` so the URL is checked before any virtual users start:
/// ```rust,no_run
/// use http_surge_runner::prelude::*;
///
/// let builder = ScenarioDefinitionBuilder::<HttpRunnerContext, HttpVuContext>::new_with_init("signup")
///     .use_setup(configure_base_url);
/// ```
pub fn configure_base_url(ctx: &mut RunnerContext<HttpRunnerContext>) -> HookResult {
    let base_url = ctx
        .base_url()
        .unwrap_or(DEFAULT_BASE_URL)
        .trim_end_matches('/')
        .to_string();
    url::Url::parse(&base_url).with_context(|| format!("Invalid base URL: {base_url}"))?;

    log::info!("Testing against {base_url}");
    ctx.get_mut().base_url = Some(base_url);

    Ok(())
}

/// Gives the virtual user its own [HttpClient], and so its own cookie jar.
///
/// Call this in the virtual user setup, then use [HttpVuContext::client] in the behaviour.
pub fn install_client(ctx: &mut VuContext<HttpRunnerContext, HttpVuContext>) -> HookResult {
    let base_url = ctx.runner_context().get().base_url().to_string();
    let reporter = ctx.runner_context().reporter();

    let client = HttpClient::new(&base_url, reporter)?;
    log::debug!("Installed HTTP client for virtual user {}", ctx.vu_id());
    ctx.get_mut().client = Some(client);

    Ok(())
}

/// Find the Django CSRF token in a page. The hidden input may list its attributes in either order.
pub fn extract_csrf_token(body: &str) -> Option<String> {
    CSRF_TOKEN.captures(body).and_then(|captures| {
        captures
            .get(1)
            .or_else(|| captures.get(2))
            .map(|m| m.as_str().to_string())
    })
}

/// Like [extract_csrf_token] but a missing token is an error.
pub fn require_csrf_token(body: &str) -> SurgeResult<String> {
    extract_csrf_token(body).context("CSRF token not found")
}

/// A random string of lowercase letters and digits.
pub fn random_string(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .filter_map(|_| RANDOM_CHARSET.choose(&mut rng).map(|c| *c as char))
        .collect()
}

/// A username that will not clash with those of other virtual users or iterations.
pub fn username_for(vu_id: usize, iter_id: u64) -> String {
    format!("user_{vu_id}_{iter_id}_{}", random_string(5))
}

pub fn unique_username<RV: UserValuesConstraint, V: UserValuesConstraint>(
    ctx: &VuContext<RV, V>,
) -> String {
    username_for(ctx.vu_id(), ctx.iter_id())
}

/// Pause the virtual user, ending early if it is asked to retire.
pub fn think<RV: UserValuesConstraint, V: UserValuesConstraint>(
    ctx: &mut VuContext<RV, V>,
    duration: Duration,
) -> HookResult {
    let mut listener = ctx.shutdown_listener().clone();
    ctx.runner_context()
        .executor()
        .execute_in_place(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = listener.wait_for_shutdown() => {
                    log::trace!("Think time cut short by shutdown");
                }
            }
            Ok(())
        })
}
