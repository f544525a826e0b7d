//! Domain layer: session keys, live connections, the session registry,
//! and per-connection conversation multiplexing.

pub mod connection;
pub mod connection_registry;
pub mod conversation;
pub mod conversation_id;
pub mod session_key;

pub use connection::{Connection, Outbound};
pub use connection_registry::ConnectionRegistry;
pub use conversation::{Conversation, ConversationTable, Delivery};
pub use conversation_id::ConversationId;
pub use session_key::SessionKey;
