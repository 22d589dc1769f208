use http_surge_runner::prelude::*;

fn vu_behaviour(_ctx: &mut VuContext<HttpRunnerContext, HttpVuContext>) -> HookResult {
    // Measures the cost of the runner itself, no requests are made.
    Ok(())
}

fn main() -> SurgeResult<()> {
    let builder = ScenarioDefinitionBuilder::<HttpRunnerContext, HttpVuContext>::new_with_init(
        env!("CARGO_PKG_NAME"),
    )
    .with_default_options(
        RunOptions::fixed(100, 100)
            .with_threshold("http_req_duration", "p(95)<500")
            .with_threshold("http_req_failed", "rate<0.01"),
    )
    .use_setup(configure_base_url)
    .use_vu_behaviour(vu_behaviour);

    let summary = run(builder)?;
    if !summary.thresholds_passed() {
        anyhow::bail!("Thresholds failed for run {}", summary.run_id);
    }

    Ok(())
}
