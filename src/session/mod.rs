//! Chat sessions grounded in an analyzed document.
//!
//! - [`ChatSession`]: one conversation; sends turns and streams replies
//! - [`GroundingContext`]: document text plus analysis given to the model
//!   ahead of every turn
//! - [`SessionStore`]: in-memory registry behind the `/sessions` routes
//!
//! # Example
//!
//! ```rust
//! use legal_clarify::session::{ChatOptions, ChatSession, ConversationTurn, SessionStore};
//!
//! let store = SessionStore::default();
//! let session = store.insert(ChatSession::new(None, ChatOptions::default(), None));
//! session.extend_history(vec![ConversationTurn::user("What does clause 4 mean?")]);
//!
//! assert_eq!(store.get(session.id()).unwrap().turn_count(), 1);
//! ```

mod chat;
mod grounding;
mod store;

pub use chat::{ChatError, ChatOptions, ChatSession, ConversationTurn, ReplyStream, Role};
pub use grounding::{GroundingContext, system_prompt};
pub use store::{DEFAULT_IDLE_TIMEOUT, SessionStore};
