//! The `limits` subcommand: print the remaining API request budget.

use anyhow::Result;

use crate::github::{Client, Forge};

pub fn run() -> Result<()> {
    let api = Client::new();
    let Some(info) = api.rate_limit_info() else {
        anyhow::bail!("could not query the rate limit; is `gh` installed and authenticated?");
    };
    match info.reset_at {
        Some(reset) => println!(
            "{} requests remaining, resets at {}",
            info.remaining,
            reset.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("{} requests remaining", info.remaining),
    }
    Ok(())
}
