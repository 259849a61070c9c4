//! Components that handle relay messages on a server.
//!
//! A server owns one [`RelayComponent`] and hands it every message it decodes. The
//! component fills in replies in place: a result outcome, details on failure, and a
//! payload for the types that return one.
//!
//! [`MemoryStore`] keeps opaque payloads by object key. [`IndexStore`] keeps sorted
//! index caches and answers index queries. The `relay_server` binary runs either one.
use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Instant,
};

use bincode::{Decode, Encode};
use log::{debug, info};

use crate::{
    config::RelayConfig,
    message::{MessageType, RelayMessage, RelayOutcome, RelayPayload},
};

use self::error::ComponentError;

mod index_store;

pub use index_store::IndexStore;

/// Snapshot a component reports for the `GetRuntimeInfo` socket command.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ComponentRuntimeInfo {
    pub component_name: String,
    pub messages_handled: u64,
    pub objects_stored: u64,
    pub uptime_secs: u64,
}

pub trait RelayComponent: Send + Sync {
    fn name(&self) -> &str;

    fn initialize(&self, config: &RelayConfig) -> Result<(), ComponentError>;

    /// Handles one message, leaving the reply state on the message itself.
    fn handle_message(&self, message: &mut RelayMessage) -> Result<(), ComponentError>;

    /// Handles a batch in order. A failing message is marked with an error outcome and
    /// does not stop the rest of the batch.
    fn handle_messages(&self, messages: &mut [RelayMessage]) -> Result<(), ComponentError> {
        for message in messages.iter_mut() {
            if let Err(err) = self.handle_message(message) {
                mark_failed(message, &err);
            }
        }
        Ok(())
    }

    fn reload_config(&self, config: &RelayConfig) -> Result<(), ComponentError>;

    fn shutdown(&self);

    fn runtime_info(&self) -> ComponentRuntimeInfo;
}

/// Records `err` on `message` as an error outcome.
pub fn mark_failed(message: &mut RelayMessage, err: &ComponentError) {
    message.result_outcome = Some(RelayOutcome::Error);
    message.result_details = err.to_string();
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ObjectKey {
    Id(i32),
    Extended(Vec<u8>),
}

impl ObjectKey {
    fn of(message: &RelayMessage) -> Self {
        match &message.extended_id {
            Some(extended_id) => ObjectKey::Extended(extended_id.clone()),
            None => ObjectKey::Id(message.id),
        }
    }
}

/// Keeps payloads in memory keyed by type id and object key.
pub struct MemoryStore {
    name: String,
    objects: Mutex<HashMap<(i16, ObjectKey), RelayPayload>>,
    handled: AtomicU64,
    running: AtomicBool,
    started: Instant,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: Mutex::new(HashMap::new()),
            handled: AtomicU64::new(0),
            running: AtomicBool::new(false),
            started: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<(i16, ObjectKey), RelayPayload>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, message: &mut RelayMessage) -> Result<RelayOutcome, ComponentError> {
        let payload = message
            .payload
            .clone()
            .ok_or(ComponentError::MissingPayload(message.message_type))?;
        self.objects()
            .insert((message.type_id, ObjectKey::of(message)), payload);
        Ok(RelayOutcome::Success)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("MemoryStore")
    }
}

impl RelayComponent for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&self, config: &RelayConfig) -> Result<(), ComponentError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ComponentError::AlreadyInitialized(self.name.clone()));
        }
        info!(
            "{} initialized with {} index schemas",
            self.name,
            config.indexes.len()
        );
        Ok(())
    }

    fn handle_message(&self, message: &mut RelayMessage) -> Result<(), ComponentError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ComponentError::NotRunning(self.name.clone()));
        }
        self.handled.fetch_add(1, Ordering::Relaxed);
        debug!("{} handling {message}", self.name);

        let key = (message.type_id, ObjectKey::of(message));
        let outcome = match message.message_type {
            MessageType::Get => match self.objects().get(&key) {
                Some(payload) => {
                    message.payload = Some(payload.clone());
                    RelayOutcome::Success
                }
                None => {
                    message.payload = None;
                    RelayOutcome::Nonexistent
                }
            },
            MessageType::Save
            | MessageType::SaveWithConfirm
            | MessageType::Update
            | MessageType::UpdateWithConfirm => self.save(message)?,
            MessageType::Delete | MessageType::DeleteWithConfirm => {
                match self.objects().remove(&key) {
                    Some(_) => RelayOutcome::Success,
                    None => RelayOutcome::Nonexistent,
                }
            }
            MessageType::DeleteInAllTypes | MessageType::DeleteInAllTypesWithConfirm => {
                let object = ObjectKey::of(message);
                self.objects().retain(|(_, k), _| *k != object);
                RelayOutcome::Success
            }
            MessageType::DeleteAllInType | MessageType::DeleteAllInTypeWithConfirm => {
                let type_id = message.type_id;
                self.objects().retain(|(t, _), _| *t != type_id);
                RelayOutcome::Success
            }
            MessageType::DeleteAll | MessageType::DeleteAllWithConfirm => {
                self.objects().clear();
                RelayOutcome::Success
            }
            MessageType::Undefined
            | MessageType::Query
            | MessageType::Invoke
            | MessageType::Notification
            | MessageType::NotificationWithConfirm
            | MessageType::Increment
            | MessageType::IncrementWithConfirm => RelayOutcome::NotSupported,
        };
        message.result_outcome = Some(outcome);
        Ok(())
    }

    fn reload_config(&self, config: &RelayConfig) -> Result<(), ComponentError> {
        info!(
            "{} reloaded configuration with {} index schemas",
            self.name,
            config.indexes.len()
        );
        Ok(())
    }

    fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("{} shut down after {} messages", self.name, self.handled.load(Ordering::Relaxed));
        }
    }

    fn runtime_info(&self) -> ComponentRuntimeInfo {
        ComponentRuntimeInfo {
            component_name: self.name.clone(),
            messages_handled: self.handled.load(Ordering::Relaxed),
            objects_stored: self.len() as u64,
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

pub mod error {
    use thiserror::Error;

    use crate::{
        codec::error::FormatError, config::error::ConfigError, index::error::IndexError,
        message::MessageType,
    };

    #[derive(Debug, Error)]
    pub enum ComponentError {
        #[error("[component][{0}] not running")]
        NotRunning(String),

        #[error("[component][{0}] already initialized")]
        AlreadyInitialized(String),

        #[error("[component] {0:?} message carries no payload")]
        MissingPayload(MessageType),

        #[error("[component] index '{0}' is not configured")]
        UnknownIndex(String),

        #[error("[component] {0} carries no index id")]
        MissingIndexId(&'static str),

        #[error("[component] invalid query: {0}")]
        InvalidQuery(String),

        #[error("[component] {0}")]
        Format(#[from] FormatError),

        #[error("[component] {0}")]
        Index(#[from] IndexError),

        #[error("[component] {0}")]
        Config(#[from] ConfigError),
    }
}
