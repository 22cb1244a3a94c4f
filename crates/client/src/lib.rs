//! # Parley Client
//!
//! Client-side view of the conversation API: a two-layer cache (summary
//! list plus full records) with a token-guarded loader and optimistic
//! mutations that roll back when the server rejects them.
//!
//! Reads prefer the last known good copy when the network fails. Writes
//! roll back and return the error so the caller can tell the user.

pub mod api;
pub mod cache;
pub mod error;
pub mod mutation;

pub use api::{ConversationApi, HttpConversationApi};
pub use cache::{CacheState, ConversationCache, Load};
pub use error::ClientError;
pub use mutation::{CreateConversation, Mutation, RemoveConversation, UpdateConversation};
