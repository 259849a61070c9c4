//! The relay message envelope.
//!
//! A [`RelayMessage`] names one cache operation: which object type (`type_id`), which
//! object (`id` and optionally `extended_id`) and what to do with it
//! ([`MessageType`]). Objects travel in a [`RelayPayload`]; index queries travel as an
//! encoded record in the message's query data.
//!
//! Messages are encoded as versioned records (see [`codec`](crate::codec)). The last
//! part of a message is a length-delimited tail so that fields added by newer writers
//! are skipped by older readers. Bulk sends use the list format from [`list`]: an `i32`
//! count followed by one record per message.
//!
//! [`SerializedRelayMessage`] keeps an already encoded message next to its routing
//! fields, for forwarding without decoding.
pub mod kind;
pub mod list;
pub mod payload;
pub mod relay;
pub mod serialized;

pub use kind::{HydrationOptions, HydrationPolicy, MessageType, RelayErrorType, RelayKeyType, RelayOutcome};
pub use list::{
    MessageList, message_list_from_bytes, message_list_to_bytes, read_message_list,
    write_message_list, write_message_list_range, write_serialized_message_list,
};
pub use payload::RelayPayload;
pub use relay::{DEFAULT_RELAY_TTL, RelayMessage};
pub use serialized::SerializedRelayMessage;
