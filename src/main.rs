//! WallTrack - Signal Evaluation & Risk-Gated Exit Strategy Engine

use anyhow::Result;

use walltrack::adapters::cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (webhook URLs and data dir overrides go here)
    dotenvy::dotenv().ok();

    let app = cli::init();
    cli::execute(app).await
}
