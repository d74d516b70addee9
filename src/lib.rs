//! Real-time chat core for the staff console.
//!
//! A signed-in staff member talks to customers over a hub connection. This
//! crate owns everything between the UI and the network: the connection
//! lifecycle, the conversation list, the reconciled message list, and the
//! REST reads that seed them. Rendering is someone else's job; the UI drives
//! a [`session::ChatSession`] and observes its [`session::ChatState`].
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`session`] | Facade: owns the components below, runs the event loop |
//! | [`connection`] | Hub connection lifecycle, reconnect, invocations |
//! | [`conversations`] | Conversation list and last-message previews |
//! | [`reconciler`] | Optimistic/pushed message merge and dedup |
//! | [`dispatcher`] | Outbound sends |
//! | [`transport`] | WebSocket link seam |
//! | [`api`] | REST reads (`/chat/conversations`, `/chat/{id}/messages`) |
//! | [`auth`] | Signed-in identity with hydration lifecycle |
//! | [`config`] | Environment configuration |
//! | [`model`] | Wire and domain types |
//! | [`error`] | [`ChatError`] |

pub mod api;
pub mod auth;
pub mod config;
pub mod connection;
pub mod conversations;
pub mod dispatcher;
pub mod error;
pub mod model;
pub mod reconciler;
pub mod session;
pub mod transport;

pub use error::ChatError;
