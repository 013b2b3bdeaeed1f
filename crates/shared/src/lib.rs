pub mod events;
pub mod message;
pub mod schemas;

pub use events::{ProtocolEvent, ToolCallDone, ToolCallStart};
pub use message::{Message, MessagePart, Role, TextPart, ThinkingPart, ToolCallPart, ToolKind, ToolStatus};
pub use schemas::{ChatRequest, Mode};
