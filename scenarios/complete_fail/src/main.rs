use http_surge_runner::prelude::*;

// Keeps hammering with no think time, to find the point where the service falls over.
fn vu_behaviour(ctx: &mut VuContext<HttpRunnerContext, HttpVuContext>) -> HookResult {
    let client = ctx.get().client()?.clone();
    let username = unique_username(ctx);

    ctx.runner_context().executor().execute_in_place(async move {
        client.get("/").await?;
        client.get("/todos/").await?;
        client
            .post_form(
                "/login/",
                &[
                    ("username", username.as_str()),
                    ("password", "StrongPassword123!"),
                ],
                RequestOptions::default(),
            )
            .await?;

        Ok(())
    })
}

fn main() -> SurgeResult<()> {
    let builder = ScenarioDefinitionBuilder::<HttpRunnerContext, HttpVuContext>::new_with_init(
        env!("CARGO_PKG_NAME"),
    )
    .with_default_options(RunOptions::stages([
        ("30s", 1000),
        ("5m", 2000),
        ("30s", 3000),
        ("2m", 3000),
    ]))
    .use_setup(configure_base_url)
    .use_vu_setup(install_client)
    .use_vu_behaviour(vu_behaviour);

    let summary = run(builder)?;
    if !summary.thresholds_passed() {
        anyhow::bail!("Thresholds failed for run {}", summary.run_id);
    }

    Ok(())
}
