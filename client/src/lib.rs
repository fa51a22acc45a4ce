//! Optimist Client - the social API behind `optimist-engine`.
//!
//! Provides the HTTP [`HttpRemote`], environment [`Config`], tracing setup
//! and a [`Session`] that loads views and performs mutations for one user.
//!
//! ```no_run
//! use optimist_client::{Config, Session};
//! use optimist_engine::{UserSummary, ViewKey};
//!
//! # async fn demo() -> optimist_client::Result<()> {
//! optimist_client::telemetry::init();
//! let config = Config::from_env()?;
//! let session = Session::new(&config, UserSummary::new("u1", "Alice"))?;
//!
//! let feed = session.view(&ViewKey::FriendsFeed).await?;
//! if let Some(post) = feed.entities().first().and_then(|e| e.as_post()) {
//!     let outcome = session.toggle_like(post).await;
//!     println!("{}", outcome.notice.message);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod session;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use error::{ClientError, Result};
pub use http::HttpRemote;
pub use session::Session;
