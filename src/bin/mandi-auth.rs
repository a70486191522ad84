use anyhow::Result;
use mandi_auth::cli;

#[tokio::main]
async fn main() -> Result<()> {
    let action = cli::start::start()?;
    action.execute().await
}
