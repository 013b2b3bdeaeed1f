pub mod assembler;
pub mod client;
pub mod config;
pub mod conversation;
pub mod decoder;
pub mod error;
pub mod session;
pub mod ui;

pub use assembler::{PartAssembler, StreamOutcome};
pub use client::ApiClient;
pub use config::{FileStore, MemoryStore, Preferences, Settings, SettingsStore};
pub use conversation::{ConversationView, ViewEvent};
pub use decoder::{EventDecoder, decode_stream};
pub use error::{EnvoyError, EnvoyResult};
pub use session::{SessionController, StreamHandle, StreamParams};
