use std::time::Duration;

use http_surge_runner::prelude::*;

fn vu_behaviour(ctx: &mut VuContext<HttpRunnerContext, HttpVuContext>) -> HookResult {
    let client = ctx.get().client()?.clone();
    let username = unique_username(ctx);

    let (home, login) = ctx.runner_context().executor().execute_in_place(async move {
        let home = client.get("/").await?;
        let login = client
            .post_form(
                "/login/",
                &[
                    ("username", username.as_str()),
                    ("password", "StrongPass123!"),
                ],
                RequestOptions::default(),
            )
            .await?;

        Ok((home, login))
    })?;

    ctx.check("homepage loaded", home.status == StatusCode::OK);
    ctx.check(
        "login attempted",
        login.status != StatusCode::INTERNAL_SERVER_ERROR,
    );

    think(ctx, Duration::from_millis(100))
}

fn main() -> SurgeResult<()> {
    let builder = ScenarioDefinitionBuilder::<HttpRunnerContext, HttpVuContext>::new_with_init(
        env!("CARGO_PKG_NAME"),
    )
    .with_default_options(
        RunOptions::stages([
            ("30s", 100),
            ("2m", 500),
            ("3m", 500),
            ("30s", 1000),
            ("1m", 0),
        ])
        .with_threshold("http_req_duration", "p(95)<2000")
        .with_threshold("http_req_failed", "rate<0.1"),
    )
    .use_setup(configure_base_url)
    .use_vu_setup(install_client)
    .use_vu_behaviour(vu_behaviour);

    let summary = run(builder)?;
    if !summary.thresholds_passed() {
        anyhow::bail!("Thresholds failed for run {}", summary.run_id);
    }

    Ok(())
}
