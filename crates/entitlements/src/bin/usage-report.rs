//! Usage report for a single user
//!
//! Prints the user's current usage, limits and reset times for every feature
//! as JSON. Reads the same environment as the engine (see `config`).
//!
//! Usage:
//!   cargo run --bin usage-report -- <user-id> <tier>
//!   cargo run --bin usage-report -- 6f9c1a3e-2b7d-4c1e-9a51-0d3f8e2b7c44 free

use std::env;

use lusotown_entitlements::{EngineConfig, EntitlementEngine, Tier, UserId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lusotown_entitlements=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let (Some(user_arg), Some(tier_arg)) = (args.next(), args.next()) else {
        eprintln!("Usage: usage-report <user-id> <tier>");
        std::process::exit(2);
    };

    let user_id: UserId = user_arg.parse().map_err(anyhow::Error::msg)?;
    let tier: Tier = tier_arg.parse().map_err(anyhow::Error::msg)?;

    let config = EngineConfig::from_env()?;
    let engine = EntitlementEngine::from_config(&config).await?;

    let report = serde_json::json!({
        "user_id": user_id,
        "tier": tier,
        "timezone": engine.clock().timezone().name(),
        "backend": engine.store().backend_name(),
        "features": engine.usage_overview(user_id, tier).await,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
