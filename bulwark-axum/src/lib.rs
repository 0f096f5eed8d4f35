//! # Bulwark Axum Integration
//!
//! Glue between [`bulwark`] and Axum handlers:
//!
//! - [`client_ip`], plus the [`ClientIp`] and [`ConnectionInfo`] extractors,
//!   to key anonymous rate limits by the caller's address
//! - [`rate_limit_middleware`] to put any route behind a rate-limit category
//! - [`LoginRejection`] to turn throttled or locked outcomes into `429`/`423`
//!   responses with `Retry-After` and a generic JSON body
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use axum::{Json, extract::State};
//! use bulwark::{Bulwark, CredentialVerifier, SqliteRepositoryProvider};
//! use bulwark_axum::{ConnectionInfo, LoginRejection};
//!
//! async fn login(
//!     State(bulwark): State<Arc<Bulwark<SqliteRepositoryProvider>>>,
//!     connection: ConnectionInfo,
//!     Json(form): Json<LoginForm>,
//! ) -> Result<Json<UserView>, LoginRejection> {
//!     let outcome = bulwark
//!         .authenticate(&form.username, &form.password, &connection.into(), &MyVerifier)
//!         .await?;
//!
//!     match LoginRejection::from_outcome(&outcome) {
//!         Some(rejection) => Err(rejection),
//!         None => Ok(Json(UserView::from(outcome))),
//!     }
//! }
//! ```

mod error;
mod extractors;
mod middleware;
mod types;

pub use error::{LoginRejection, Result};
pub use extractors::client_ip;
pub use middleware::{RateLimitState, rate_limit_middleware};
pub use types::{ClientIp, ConnectionInfo, ErrorResponse};
