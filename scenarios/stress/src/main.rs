use std::time::Duration;

use http_surge_runner::prelude::*;

const LOGIN_PATH: &str = "/login/";

fn vu_behaviour(ctx: &mut VuContext<HttpRunnerContext, HttpVuContext>) -> HookResult {
    let client = ctx.get().client()?.clone();
    let referer = client.url(LOGIN_PATH)?.to_string();
    let title = format!("todo-{}-{}", ctx.vu_id(), ctx.iter_id());

    let responses = ctx.runner_context().executor().execute_in_place(async move {
        let login_page = client.get(LOGIN_PATH).await?;
        let csrf_token = extract_csrf_token(&login_page.body).unwrap_or_else(|| {
            log::debug!("No CSRF token on the login page");
            String::new()
        });

        let login = client
            .post_form(
                LOGIN_PATH,
                &[
                    ("username", "testuser"),
                    ("password", "testpassword"),
                    ("csrfmiddlewaretoken", csrf_token.as_str()),
                ],
                RequestOptions::default().with_header("Referer", &referer)?,
            )
            .await?;

        let create = client
            .post_form(
                "/todos/create/",
                &[("title", title.as_str())],
                RequestOptions::default(),
            )
            .await?;

        let list = client.get("/todos/").await?;

        Ok([login_page, login, create, list])
    })?;
    let [login_page, login, create, list] = responses;

    ctx.check("login page loaded", login_page.status == StatusCode::OK);
    ctx.check(
        "logged in",
        login.status == StatusCode::FOUND || login.status == StatusCode::OK,
    );
    ctx.check(
        "todo created",
        create.status == StatusCode::OK || create.status == StatusCode::FOUND,
    );
    ctx.check("todos listed", list.status == StatusCode::OK);

    think(ctx, Duration::from_secs(1))
}

fn main() -> SurgeResult<()> {
    let builder = ScenarioDefinitionBuilder::<HttpRunnerContext, HttpVuContext>::new_with_init(
        env!("CARGO_PKG_NAME"),
    )
    .with_default_options(
        RunOptions::stages([("1m", 20), ("2m", 50), ("2m", 100), ("1m", 0)])
            .with_threshold("http_req_duration", "p(95)<500")
            .with_threshold("http_req_failed", "rate<0.01"),
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
