//! # PairLink Client Library
//!
//! Runtime half of PairLink: pairing, transports and request correlation
//! between a dapp and a wallet over untrusted channels.
//!
//! ## Overview
//!
//! - **Clients**: [`DappClient`] (initiator: transport race, correlation
//!   engine, accounts) and [`WalletClient`] (responder: pairing answers,
//!   request serving)
//! - **Transports**: one [`transport::Transport`] trait over two channel
//!   families, relay-mediated and direct in-process, composed around a
//!   shared peer-store/listener helper
//! - **Relay selection**: deterministic hash-distance mapping from an
//!   identity to a redundant relay set
//! - **Managers**: thin CRUD over the async [`storage::Storage`]
//!   collaborator for peers, accounts and permissions
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use client::{ClientConfig, DappClient};
//! use client::relay::InMemoryRelay;
//! use client::storage::InMemoryStorage;
//! use client::transport::DirectHub;
//!
//! # async fn run() -> Result<(), client::ClientError> {
//! let client = DappClient::new(
//!     ClientConfig::new("my-dapp"),
//!     Arc::new(InMemoryStorage::new()),
//!     Arc::new(InMemoryRelay::new()),
//!     Arc::new(DirectHub::new()),
//! )
//! .await?;
//!
//! let outcome = client.connect().await?;
//! // Display the pairing payloads from `outcome`, then:
//! let kind = client.await_pairing().await?;
//! println!("paired over {kind:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`dapp`] / [`wallet`]: the two role facades
//! - [`transport`]: transport trait and the relay/direct implementations
//! - [`relay`]: relay selection and the relay collaborator seam
//! - [`correlation`]: pending-request table and rate limiter
//! - [`managers`]: peer, account and permission managers
//! - [`storage`]: storage collaborator and typed list CRUD
//! - [`config`]: client configuration
//! - [`events`]: synchronous event fan-out
//! - [`error`]: error types

pub mod config;
pub mod correlation;
pub mod dapp;
pub mod error;
pub mod events;
pub mod managers;
pub mod relay;
pub mod storage;
pub mod transport;
pub mod wallet;

pub use config::ClientConfig;
pub use correlation::RequestHandle;
pub use dapp::{ConnectOutcome, DappClient};
pub use error::{ClientError, Result};
pub use events::ClientEvent;
pub use managers::{AccountInfo, PeerRecord};
pub use transport::{ConnectionContext, TransportKind, TransportStatus};
pub use wallet::WalletClient;
