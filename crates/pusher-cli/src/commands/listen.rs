//! `pusher listen <app-key> -c <channel>... -e <event>...`
//!
//! Connects, subscribes to the given channels, and prints every delivery of
//! the given event names as one JSON object per line on stdout. Runs until
//! Ctrl-C or until the connection is lost.

use std::future::Future;
use std::io::Write;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use pusher_client::{Client, ClientConfig, Event, Listener, PusherError, SubscribeOptions};
use pusher_core::messages::PUSHER_SUBSCRIPTION_SUCCEEDED;
use pusher_core::unmarshal_data_string;

pub async fn run(
    app_key: &str,
    mut config: ClientConfig,
    channels: &[String],
    events: &[String],
) -> Result<()> {
    let (errors_tx, errors_rx) = mpsc::channel(32);
    config.errors = Some(errors_tx);

    let client = Client::connect(app_key, config)
        .await
        .with_context(|| format!("failed to connect with app key '{app_key}'"))?;
    info!(socket_id = %client.socket_id(), "connected");

    let stop = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    listen(&client, channels, events, errors_rx, std::io::stdout(), stop).await
}

/// Print deliveries to `out` until `stop` resolves or the connection drops.
pub async fn listen<W: Write>(
    client: &Client,
    channels: &[String],
    events: &[String],
    mut errors: mpsc::Receiver<PusherError>,
    mut out: W,
    stop: impl Future<Output = ()>,
) -> Result<()> {
    let (tx, mut deliveries) = mpsc::channel::<Event>(256);
    for event in events {
        forward(client.bind(event).await, tx.clone());
    }
    drop(tx);

    for name in channels {
        let (channel, subscribed) = client.subscribe(name, SubscribeOptions::default()).await;
        subscribed.with_context(|| format!("failed to subscribe to '{name}'"))?;
        debug!(channel = %name, kind = ?channel.kind(), "subscribe sent");

        let mut confirmed = channel.bind(PUSHER_SUBSCRIPTION_SUCCEEDED).await;
        let name = name.clone();
        tokio::spawn(async move {
            if confirmed.recv().await.is_some() {
                info!(channel = %name, "subscribed");
            }
        });
    }

    let mut closed = client.notify_close().await;
    tokio::pin!(stop);

    loop {
        tokio::select! {
            () = &mut stop => {
                info!("interrupted");
                break;
            }

            outcome = &mut closed => {
                return match outcome {
                    Ok(Some(cause)) => Err(anyhow::Error::new(cause).context("connection lost")),
                    _ => Ok(()),
                };
            }

            Some(err) = errors.recv() => {
                warn!("{}", err);
            }

            Some(event) = deliveries.recv() => {
                writeln!(out, "{}", format_event(&event)?)?;
                out.flush()?;
            }
        }
    }

    client
        .disconnect()
        .await
        .context("failed to close connection")
}

/// One output line: the envelope with its payload decoded when it is
/// double-encoded JSON.
pub fn format_event(event: &Event) -> Result<String> {
    let data = unmarshal_data_string::<Value>(&event.data).unwrap_or_else(|_| event.data.clone());
    let line = json!({
        "event": event.event,
        "channel": event.channel,
        "data": data,
    });
    Ok(serde_json::to_string(&line)?)
}

fn forward(mut listener: Listener<Event>, tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        while let Some(event) = listener.recv().await {
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });
}
