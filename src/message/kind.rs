use std::fmt;

use crate::codec::wire_enum;

wire_enum! {
    /// Operation a [`RelayMessage`](super::RelayMessage) asks for. Carried as an `i32`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub enum MessageType: i32 {
        #[default]
        Undefined = 0,
        Get = 1,
        Save = 2,
        Delete = 3,
        DeleteInAllTypes = 4,
        DeleteAllInType = 5,
        DeleteAll = 6,
        Update = 7,
        Query = 8,
        Invoke = 9,
        Notification = 10,
        Increment = 11,
        SaveWithConfirm = 12,
        UpdateWithConfirm = 13,
        DeleteWithConfirm = 14,
        DeleteAllInTypeWithConfirm = 15,
        DeleteAllWithConfirm = 16,
        DeleteInAllTypesWithConfirm = 17,
        NotificationWithConfirm = 18,
        IncrementWithConfirm = 19,
    }
}

impl MessageType {
    /// "Out" messages wait for a reply; every other type is fire-and-forget.
    pub fn is_two_way(self) -> bool {
        matches!(
            self,
            MessageType::Get
                | MessageType::Query
                | MessageType::Invoke
                | MessageType::SaveWithConfirm
                | MessageType::UpdateWithConfirm
                | MessageType::DeleteWithConfirm
                | MessageType::DeleteAllInTypeWithConfirm
                | MessageType::DeleteAllWithConfirm
                | MessageType::DeleteInAllTypesWithConfirm
                | MessageType::NotificationWithConfirm
                | MessageType::IncrementWithConfirm
        )
    }

    /// Whether a reply may carry a payload back to the caller.
    pub fn allows_return_payload(self) -> bool {
        matches!(
            self,
            MessageType::Get | MessageType::Query | MessageType::Invoke
        )
    }
}

wire_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum RelayOutcome: u8 {
        NotSent = 0,
        Success = 1,
        Received = 2,
        Error = 3,
        NotSupported = 4,
        StillFresh = 5,
        Nonexistent = 6,
        Queued = 7,
        Timeout = 8,
        Persisted = 9,
        Denied = 10,
    }
}

/// Coarse classification of a failed send, reported to callers next to the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayErrorType {
    None,
    NodeUnreachable,
    NodeInDangerZone,
    NoNodesAvailable,
    TimedOut,
    ComponentSpecific,
    Unknown,
}

impl fmt::Display for RelayErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

wire_enum! {
    /// Which message field identifies the object when a cache miss is hydrated.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub enum RelayKeyType: u32 {
        #[default]
        Int32 = 0,
        ByteArray = 1,
        String = 2,
    }
}

/// Bit set of hydration triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HydrationOptions(u32);

impl HydrationOptions {
    pub const NONE: Self = Self(0);
    pub const HYDRATE_ON_MISS: Self = Self(0x1);
    pub const HYDRATE_ON_BULK_MISS: Self = Self(0x2);
    pub const HYDRATE_ALL: Self = Self(0x3);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// How a miss on this message should be filled from the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HydrationPolicy {
    pub key_type: RelayKeyType,
    pub options: HydrationOptions,
}

impl HydrationPolicy {
    /// Policy implied by the single flag older peers send.
    pub const LEGACY_DEFAULT: Self = Self {
        key_type: RelayKeyType::Int32,
        options: HydrationOptions::HYDRATE_ALL,
    };
}
