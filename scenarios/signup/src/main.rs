use std::time::Duration;

use http_surge_runner::prelude::*;

const SIGNUP_PATH: &str = "/accounts/signup/";
const PASSWORD: &str = "StrongPass123!";

fn vu_behaviour(ctx: &mut VuContext<HttpRunnerContext, HttpVuContext>) -> HookResult {
    let client = ctx.get().client()?.clone();
    let referer = client.url(SIGNUP_PATH)?.to_string();
    let username = unique_username(ctx);
    let email = format!("{username}@example.com");

    let (page, signup) = ctx.runner_context().executor().execute_in_place(async move {
        let page = client.get(SIGNUP_PATH).await?;
        let csrf_token = require_csrf_token(&page.body)?;

        let signup = client
            .post_form(
                SIGNUP_PATH,
                &[
                    ("csrfmiddlewaretoken", csrf_token.as_str()),
                    ("username", username.as_str()),
                    ("email", email.as_str()),
                    ("password1", PASSWORD),
                    ("password2", PASSWORD),
                ],
                RequestOptions::no_redirects().with_header("Referer", &referer)?,
            )
            .await?;

        Ok((page, signup))
    })?;

    ctx.check("signup page loaded", page.status == StatusCode::OK);
    // A successful signup redirects away from the signup form.
    ctx.check(
        "signup succeeded",
        signup.status == StatusCode::FOUND
            && signup
                .header("location")
                .is_some_and(|location| !location.contains("signup")),
    );

    think(ctx, Duration::from_millis(500))
}

fn main() -> SurgeResult<()> {
    let builder = ScenarioDefinitionBuilder::<HttpRunnerContext, HttpVuContext>::new_with_init(
        env!("CARGO_PKG_NAME"),
    )
    .with_default_options(RunOptions::fixed(200, 200))
    .use_setup(configure_base_url)
    .use_vu_setup(install_client)
    .use_vu_behaviour(vu_behaviour);

    let summary = run(builder)?;
    if !summary.thresholds_passed() {
        anyhow::bail!("Thresholds failed for run {}", summary.run_id);
    }

    Ok(())
}
