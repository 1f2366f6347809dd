//! HTTP front-end for call-record webhooks.
//!
//! Serves the endpoints the remote platform and operators talk to:
//!
//! - `POST /subscription` receives push notifications. With a
//!   `validationToken` query parameter it answers the subscription
//!   handshake by echoing the token; otherwise it hands the JSON envelope to
//!   the broker and answers 202.
//! - `GET /subscription/register` and `GET /subscription/remove` manage a
//!   tenant's subscriptions.
//! - `GET /callrecord`, `GET /callrecord/all` and `GET /callrecord/{id}`
//!   expose the cached call records.
//!
//! All state lives in the [`BrokerHandle`](subscription_broker::BrokerHandle)
//! passed to [`WebhookServer::bind`]. Every request is logged through
//! `tracing` at info level.

pub mod error;
pub mod routes;
pub mod server;

pub use error::{Result, ServerError};
pub use routes::routes;
pub use server::WebhookServer;
