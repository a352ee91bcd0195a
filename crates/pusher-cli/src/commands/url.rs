//! `pusher url <app-key>`: print the connection URL without dialing.

use anyhow::Result;

use pusher_client::ClientConfig;

pub fn run(app_key: &str, config: &ClientConfig) -> Result<()> {
    println!("{}", config.connection_url(app_key));
    Ok(())
}
