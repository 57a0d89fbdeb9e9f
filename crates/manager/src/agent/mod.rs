//! In-container agent channel — event vocabulary and the per-slot
//! reconnecting link.

pub mod event;
pub mod link;

pub use event::AgentEvent;
pub use link::{AgentLink, LinkSignal};
