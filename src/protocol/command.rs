use crate::codec::wire_enum;

wire_enum! {
    /// What a request frame's payload holds.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum SocketCommand: u16 {
        Unknown = 0,
        HandleOneWayMessage = 1,
        HandleOneWayMessages = 2,
        HandleSyncMessage = 3,
        HandleSyncMessages = 4,
        GetRuntimeInfo = 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_ids_are_stable() {
        assert_eq!(u16::from(SocketCommand::HandleSyncMessages), 4);
        assert_eq!(SocketCommand::try_from(5).unwrap(), SocketCommand::GetRuntimeInfo);
        assert!(SocketCommand::try_from(6).is_err());
    }
}
