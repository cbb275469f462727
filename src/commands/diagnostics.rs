use crate::api::ColetaApi;
use crate::diagnostics;

use super::Context;

pub fn about() -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&diagnostics::about_info())?);
    Ok(())
}

/// Health works without a configured server; the probe is then skipped.
pub async fn health(ctx: &Context) -> anyhow::Result<()> {
    let client = ctx.client().ok();
    let api_url = client.as_ref().map(|c| c.base_url().to_string());
    let report = diagnostics::health(
        client.as_ref().map(|c| c as &dyn ColetaApi),
        api_url,
        &ctx.db,
    )
    .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
