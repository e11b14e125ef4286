//! Shared configuration and conversation types for the pult assistant.

pub mod config;
pub mod conversation;

pub use config::{
    ConfigError, KnowledgeSettings, MemorySettings, SearchDefaults, SegmenterDefaults, Settings,
    load_dotenv,
};
pub use conversation::{ChatTurn, TurnRole};
