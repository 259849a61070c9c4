pub mod cli;
pub mod codec;
pub mod component;
pub mod config;
pub mod index;
pub mod message;
pub mod protocol;

pub use cli::{Command, prompt};
pub use codec::{PrimitiveReader, PrimitiveWriter, VersionSerializable};
pub use component::{IndexStore, MemoryStore, RelayComponent};
pub use config::RelayConfig;
pub use message::{MessageType, RelayMessage, RelayOutcome, RelayPayload, SerializedRelayMessage};
pub use protocol::{RelayClient, RelayServer};
