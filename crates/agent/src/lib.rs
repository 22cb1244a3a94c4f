//! Chat turn orchestration for Parley.
//!
//! A turn moves through `Validating → ContextBuilding → Streaming →
//! Finalizing`:
//!
//! 1. **Validate** the request against the stored conversation and provider
//! 2. **Build context**: persona, knowledge base, relevant memory
//! 3. **Stream** the provider reply, looping through tool calls when web
//!    tools are on, smoothed to whole words
//! 4. **Finalize**: persist the reply, extract memories, title the
//!    conversation
//!
//! The HTTP layer only sees [`ChatService::start`] and the [`StreamPart`]s it
//! produces.

pub mod context;
pub mod effects;
pub mod notify;
pub mod orchestrator;
pub mod prompts;
pub mod smooth;
pub mod stream_event;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{AssemblyInput, ContextAssembler};
pub use effects::{EffectsReport, FinishedTurn, PostStreamEffects};
pub use notify::{Delivery, DropReason, MemoryNotice, NoticeSlot};
pub use orchestrator::{ChatError, ChatRequest, ChatService, ChatStream};
pub use prompts::Prompts;
pub use smooth::WordSmoother;
pub use stream_event::StreamPart;
pub use writer::StreamWriter;
