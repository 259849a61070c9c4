use std::{
    net::{SocketAddr, TcpStream},
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU16, Ordering},
    },
    time::Duration,
};

use log::{debug, error, warn};

use crate::{
    codec::{PrimitiveWriter, from_bytes, write_record},
    component::ComponentRuntimeInfo,
    config::SocketSettings,
    message::{
        RelayMessage, SerializedRelayMessage, message_list_from_bytes, write_message_list_range,
        write_serialized_message_list,
    },
};

use super::{
    BufferPool, SocketCommand, ThreadPool,
    error::{ProtocolError, TransportError},
    transport::ProtocolTransport,
};

/// Connection to one relay server.
///
/// The connection is opened on [`connect`](Self::connect) and reopened on the next send
/// after any error that leaves it unusable. Sends from concurrent callers are
/// serialized per connection; a synchronous send holds the connection until its reply
/// has been read. Clones share the connection.
#[derive(Clone)]
pub struct RelayClient {
    inner: Arc<ClientInner>,
    workers: Arc<ThreadPool>,
}

struct ClientInner {
    address: SocketAddr,
    settings: SocketSettings,
    connection: Mutex<Option<ProtocolTransport<TcpStream>>>,
    next_message_id: AtomicU16,
    buffers: BufferPool,
}

impl RelayClient {
    pub fn connect(address: SocketAddr, settings: SocketSettings) -> Result<Self, TransportError> {
        let inner = ClientInner {
            address,
            buffers: BufferPool::from_settings(&settings),
            settings,
            connection: Mutex::new(None),
            next_message_id: AtomicU16::new(1),
        };
        let workers = Arc::new(ThreadPool::new(inner.settings.async_workers));
        *inner.connection() = Some(inner.open()?);
        Ok(Self {
            inner: Arc::new(inner),
            workers,
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.inner.address
    }

    /// Sends one message. Two-way types block for the reply and fold it into `message`;
    /// one-way types return once the frame is written.
    pub fn send_message(&self, message: &mut RelayMessage) -> Result<(), TransportError> {
        self.inner.send_message(message)
    }

    /// Sends a pre-encoded one-way message.
    pub fn send_serialized_message(&self, message: &SerializedRelayMessage) -> Result<(), TransportError> {
        if message.is_two_way() {
            return Err(ProtocolError::SerializedTwoWay.into());
        }
        let mut buf = self.inner.buffers.get();
        let mut writer = PrimitiveWriter::with_buffer(buf.take());
        let encoded = message.write_message_record(&mut writer);
        buf.restore(writer.into_inner());
        encoded?;
        self.inner.send_one_way(SocketCommand::HandleOneWayMessage, &buf)
    }

    /// Sends one-way messages in chunks of `chunk_length` without waiting.
    pub fn send_message_list(&self, messages: &[RelayMessage]) -> Result<(), TransportError> {
        let chunk_length = self.inner.chunk_length(messages.len());
        let mut buf = self.inner.buffers.get();
        let mut start = 0;
        while start < messages.len() {
            buf.clear();
            let mut writer = PrimitiveWriter::with_buffer(buf.take());
            let written = write_message_list_range(&mut writer, messages, start, chunk_length);
            buf.restore(writer.into_inner());
            start += written?;
            self.inner.send_one_way(SocketCommand::HandleOneWayMessages, &buf)?;
        }
        Ok(())
    }

    /// Sends pre-encoded one-way messages in chunks of `chunk_length`.
    pub fn send_in_message_list(&self, messages: &[SerializedRelayMessage]) -> Result<(), TransportError> {
        if messages.iter().any(SerializedRelayMessage::is_two_way) {
            return Err(ProtocolError::SerializedTwoWay.into());
        }
        let chunk_length = self.inner.chunk_length(messages.len());
        let mut buf = self.inner.buffers.get();
        for chunk in messages.chunks(chunk_length) {
            buf.clear();
            let mut writer = PrimitiveWriter::with_buffer(buf.take());
            let encoded = write_serialized_message_list(&mut writer, chunk);
            buf.restore(writer.into_inner());
            encoded?;
            self.inner.send_one_way(SocketCommand::HandleOneWayMessages, &buf)?;
        }
        Ok(())
    }

    /// Sends messages in chunks and waits for each chunk's replies. Replies must come
    /// back in order with matching ids; on a mismatch the messages before the failing
    /// position already hold their replies.
    pub fn send_sync_message_list(&self, messages: &mut [RelayMessage]) -> Result<(), TransportError> {
        let chunk_length = self.inner.chunk_length(messages.len());
        let mut buf = self.inner.buffers.get();
        for (index, chunk) in messages.chunks_mut(chunk_length).enumerate() {
            buf.clear();
            let mut writer = PrimitiveWriter::with_buffer(buf.take());
            let written = write_message_list_range(&mut writer, chunk, 0, chunk.len());
            buf.restore(writer.into_inner());
            written?;

            let replies = match self.inner.send_sync(SocketCommand::HandleSyncMessages, &buf)? {
                Some(reply) => message_list_from_bytes(&reply)?,
                None => Vec::new(),
            };
            correlate_replies(chunk, replies, index * chunk_length)?;
        }
        Ok(())
    }

    /// Sends `message` on a worker thread. `on_complete` runs exactly once on that thread
    /// with the outcome, before [`Pending::wait`] returns it.
    ///
    /// Waiting on another [`Pending`] from inside `on_complete` can deadlock when every
    /// worker is busy.
    pub fn begin_send_message<F>(&self, mut message: RelayMessage, on_complete: F) -> Pending<RelayMessage>
    where
        F: FnOnce(&Result<RelayMessage, TransportError>) + Send + 'static,
    {
        let (pending, completion) = pending::<RelayMessage>(Box::new(on_complete));
        let inner = Arc::clone(&self.inner);
        let job = move || {
            let result = inner.send_message(&mut message).map(|()| message);
            completion.complete(result);
        };
        // a refused job is dropped with its completion, which reports it abandoned
        if let Err(err) = self.workers.execute(job) {
            warn!("could not queue send to {}: {err}", self.inner.address);
        }
        pending
    }

    pub fn runtime_info(&self) -> Result<Vec<ComponentRuntimeInfo>, TransportError> {
        self.inner.with_connection(|transport| {
            let id = self.inner.next_message_id();
            transport.write_frame(SocketCommand::GetRuntimeInfo, id, true, &[])?;
            match read_matching_reply(transport, id)? {
                Some(bytes) => transport.decode_runtime_info(&bytes),
                None => Ok(Vec::new()),
            }
        })
    }
}

impl ClientInner {
    fn connection(&self) -> MutexGuard<'_, Option<ProtocolTransport<TcpStream>>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self) -> Result<ProtocolTransport<TcpStream>, TransportError> {
        let timeout = self.settings.connect_timeout();
        let stream = if timeout.is_zero() {
            TcpStream::connect(self.address)
        } else {
            TcpStream::connect_timeout(&self.address, timeout)
        }
        .map_err(|source| TransportError::Unreachable {
            address: self.address,
            source,
        })?;
        stream.set_read_timeout(self.settings.receive_timeout())?;
        stream.set_write_timeout(self.settings.send_timeout())?;
        stream.set_nodelay(true)?;
        debug!("connected to {}", self.address);
        Ok(ProtocolTransport::new(stream, &self.settings))
    }

    /// Runs `f` on the connection, opening it first if needed. Errors that leave the
    /// stream in an unknown state close it.
    fn with_connection<R>(
        &self,
        f: impl FnOnce(&mut ProtocolTransport<TcpStream>) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        let mut connection = self.connection();
        let mut transport = match connection.take() {
            Some(transport) => transport,
            None => self.open()?,
        };
        let result = f(&mut transport);
        match &result {
            Err(err) if err.is_connection_fatal() => {
                warn!("closing connection to {}: {err}", self.address);
            }
            _ => *connection = Some(transport),
        }
        result
    }

    /// Never `0`, which marks frames that expect no reply.
    fn next_message_id(&self) -> u16 {
        loop {
            let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    fn chunk_length(&self, total: usize) -> usize {
        match self.settings.chunk_length {
            0 => total.max(1),
            n => n,
        }
    }

    fn send_one_way(&self, command: SocketCommand, payload: &[u8]) -> Result<(), TransportError> {
        self.with_connection(|transport| transport.write_frame(command, 0, false, payload))
    }

    fn send_sync(&self, command: SocketCommand, payload: &[u8]) -> Result<Option<Vec<u8>>, TransportError> {
        let id = self.next_message_id();
        self.with_connection(|transport| {
            transport.write_frame(command, id, true, payload)?;
            read_matching_reply(transport, id)
        })
    }

    fn send_message(&self, message: &mut RelayMessage) -> Result<(), TransportError> {
        let mut buf = self.buffers.get();
        let mut writer = PrimitiveWriter::with_buffer(buf.take());
        let encoded = write_record(&mut writer, &*message);
        buf.restore(writer.into_inner());
        encoded?;

        if !message.is_two_way() {
            return self.send_one_way(SocketCommand::HandleOneWayMessage, &buf);
        }

        match self.send_sync(SocketCommand::HandleSyncMessage, &buf)? {
            Some(reply) => message.extract_response(from_bytes(&reply)?),
            None => {
                debug!("{message} got an empty reply from {}", self.address);
                if message.error_occurred() {
                    message.payload = None;
                }
            }
        }
        Ok(())
    }
}

fn read_matching_reply(
    transport: &mut ProtocolTransport<TcpStream>,
    expected: u16,
) -> Result<Option<Vec<u8>>, TransportError> {
    let (actual, reply) = transport.read_reply()?;
    if actual != expected {
        return Err(ProtocolError::ReplyIdMismatch { expected, actual }.into());
    }
    Ok(reply)
}

/// Pairs each sent message with its reply, in order. `offset` is the position of
/// `sent[0]` in the whole batch.
pub(crate) fn correlate_replies(
    sent: &mut [RelayMessage],
    replies: Vec<RelayMessage>,
    offset: usize,
) -> Result<(), ProtocolError> {
    if replies.len() != sent.len() {
        error!("sent {} messages but received {} replies", sent.len(), replies.len());
        return Err(ProtocolError::ReplyCount {
            sent: sent.len(),
            received: replies.len(),
        });
    }
    for (i, (message, reply)) in sent.iter_mut().zip(replies).enumerate() {
        if reply.id != message.id {
            let position = offset + i;
            error!("reply at position {position} is for id {}, sent {message}", reply.id);
            return Err(ProtocolError::IdMismatch {
                position,
                sent: message.id,
                received: reply.id,
            });
        }
        message.extract_response(reply);
    }
    Ok(())
}

type Callback<T> = Box<dyn FnOnce(&Result<T, TransportError>) + Send>;

enum Slot<T> {
    Waiting,
    Done(Result<T, TransportError>),
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// Result of an asynchronous send, available once the worker finishes.
pub struct Pending<T> {
    shared: Arc<Shared<T>>,
}

/// Worker side of a [`Pending`]. Dropping it unfinished completes the operation as
/// abandoned, so a waiter is never left hanging.
struct Completion<T> {
    shared: Option<Arc<Shared<T>>>,
    callback: Option<Callback<T>>,
}

fn pending<T>(callback: Callback<T>) -> (Pending<T>, Completion<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot::Waiting),
        ready: Condvar::new(),
    });
    let completion = Completion {
        shared: Some(Arc::clone(&shared)),
        callback: Some(callback),
    };
    (Pending { shared }, completion)
}

impl<T> Pending<T> {
    pub fn is_complete(&self) -> bool {
        matches!(*self.lock(), Slot::Done(_))
    }

    /// Blocks until the operation completes or `timeout` passes.
    pub fn wait(self, timeout: Duration) -> Result<T, TransportError> {
        let slot = self.lock();
        let (mut slot, _) = self
            .shared
            .ready
            .wait_timeout_while(slot, timeout, |slot| matches!(slot, Slot::Waiting))
            .unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *slot, Slot::Waiting) {
            Slot::Done(result) => result,
            Slot::Waiting => Err(TransportError::Timeout),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.shared.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Completion<T> {
    fn complete(mut self, result: Result<T, TransportError>) {
        self.finish(result);
    }

    fn finish(&mut self, result: Result<T, TransportError>) {
        let Some(shared) = self.shared.take() else {
            return;
        };
        if let Some(callback) = self.callback.take() {
            callback(&result);
        }
        *shared.slot.lock().unwrap_or_else(PoisonError::into_inner) = Slot::Done(result);
        shared.ready.notify_all();
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        self.finish(Err(TransportError::Abandoned));
    }
}
