//! Chat-model providers for ParkAssist

pub mod deepseek;
pub mod mock;
pub mod payload;

pub use deepseek::DeepSeekChatModel;
pub use mock::MockChatModel;
pub use payload::{dump_messages, trim_payload_text};
