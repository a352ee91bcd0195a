//! pusher-client: async Rust client for the Pusher Channels protocol.
//!
//! Connects over WebSocket, completes the `pusher:connection_established`
//! handshake, keeps the connection alive with activity pings, and manages
//! public, private and presence channel subscriptions.
//!
//! # Quick Start
//!
//! ```no_run
//! use pusher_client::{Client, ClientConfig, SubscribeOptions};
//!
//! # async fn example() -> pusher_core::PusherResult<()> {
//! let client = Client::connect("app-key", ClientConfig {
//!     cluster: Some("eu".into()),
//!     ..Default::default()
//! }).await?;
//!
//! let (channel, subscribed) = client.subscribe("orders", SubscribeOptions::default()).await;
//! subscribed?;
//!
//! let mut created = channel.bind("order-created").await;
//! while let Some(data) = created.recv().await {
//!     println!("{data}");
//! }
//!
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod channel;
pub mod client;
pub mod config;
mod heartbeat;
pub mod router;
pub mod transport;

// Re-export primary public types.
pub use auth::{AuthFuture, AuthRequest, AuthResponse, Authorizer, HttpAuthorizer};
pub use channel::{Channel, ChannelKind, PresenceChannel, SubscribeOptions, SubscriptionState};
pub use client::{Client, CloseNotification};
pub use config::{AuthConfig, ClientConfig};
pub use router::{Listener, ListenerId};

// Re-export pusher-core types for convenience.
pub use pusher_core::{unmarshal_data_string, Event, PusherError, PusherResult};
