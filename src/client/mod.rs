//! # Client Module
//!
//! Client side of the protocol: a call engine that keeps a player session
//! alive across disconnects, daily rollovers and transient server errors,
//! plus a harness for running many sessions at once.
//!
//! ```no_run
//! # async fn demo() -> rearise_wire::Result<()> {
//! use rearise_wire::client::{Account, ClientConfig, HttpTransport, Session};
//! use rearise_wire::shutdown::Shutdown;
//! use rearise_wire::wire::{LanguageCodeType, OsType};
//! use std::sync::Arc;
//!
//! let config = Arc::new(ClientConfig::from_env()?);
//! let transport = Arc::new(HttpTransport::new(&config)?);
//! let account = Account::generate(OsType::Android, LanguageCodeType::Ja);
//!
//! let mut session = Session::connect(config, transport, account, Shutdown::new()).await?;
//! session.user_create("Tamer").await?;
//! session.ensure_home_login().await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod harness;
pub mod session;
pub mod transport;

pub use backoff::Backoff;
pub use config::{Account, ClientConfig};
pub use harness::run_sessions;
pub use session::{login_day, Session};
pub use transport::{HttpTransport, InboundResponse, OutboundRequest, Transport};
