use std::{
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use log::{debug, info, warn};

use crate::{
    codec::{from_bytes, to_bytes},
    component::{RelayComponent, mark_failed},
    config::{RelayConfig, SocketSettings},
    message::{RelayMessage, message_list_from_bytes, message_list_to_bytes},
};

use super::{SocketCommand, ThreadPool, error::TransportError, transport::ProtocolTransport};

/// How often an idle connection checks for shutdown when no receive timeout is set.
const IDLE_POLL: Duration = Duration::from_secs(1);

/// Accepts relay connections and hands every decoded message to a component.
/// Each connection is served by one pool worker for its whole lifetime.
pub struct RelayServer<C: RelayComponent + 'static> {
    listener: TcpListener,
    address: SocketAddr,
    component: Arc<C>,
    settings: Arc<SocketSettings>,
    shutdown: Arc<AtomicBool>,
    pool: ThreadPool,
}

/// Stops a running [`RelayServer`] from another thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    address: SocketAddr,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        if self.flag.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down server at {}", self.address);
        // wakes the accept loop
        if let Err(err) = TcpStream::connect(self.address) {
            debug!("shutdown wake-up connection failed: {err}");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl<C: RelayComponent + 'static> RelayServer<C> {
    /// Binds `address`; port `0` picks a free port, see [`local_addr`](Self::local_addr).
    /// The component is expected to be initialized already.
    pub fn bind(address: SocketAddr, config: &RelayConfig, component: Arc<C>) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(address)?;
        let address = listener.local_addr()?;
        Ok(Self {
            listener,
            address,
            component,
            settings: Arc::new(config.socket.clone()),
            shutdown: Arc::new(AtomicBool::new(false)),
            pool: ThreadPool::new(config.server.worker_threads),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            address: self.address,
        }
    }

    /// Serves connections until [`ShutdownHandle::shutdown`] is called. Returns once
    /// every open connection has noticed the shutdown and closed.
    pub fn listen(self) -> Result<(), TransportError> {
        info!(
            "{} listening at {} with {} workers",
            self.component.name(),
            self.address,
            self.pool.size()
        );

        for stream in self.listener.incoming() {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            match stream {
                Ok(stream) => {
                    let component = Arc::clone(&self.component);
                    let settings = Arc::clone(&self.settings);
                    let shutdown = Arc::clone(&self.shutdown);
                    self.pool.execute(move || {
                        let peer = stream.peer_addr().ok();
                        if let Err(err) = handle_connection(stream, &*component, &settings, &shutdown) {
                            warn!("connection from {peer:?} failed: {err}");
                        }
                    })?;
                }
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }

        info!("server at {} stopped accepting connections", self.address);
        Ok(())
    }
}

fn handle_connection<C: RelayComponent>(
    stream: TcpStream,
    component: &C,
    settings: &SocketSettings,
    shutdown: &AtomicBool,
) -> Result<(), TransportError> {
    stream.set_read_timeout(Some(settings.receive_timeout().unwrap_or(IDLE_POLL)))?;
    stream.set_write_timeout(settings.send_timeout())?;
    stream.set_nodelay(true)?;
    let mut transport = ProtocolTransport::new(stream, settings);

    loop {
        match transport.poll_readable() {
            Ok(true) => {}
            Ok(false) => {
                debug!("connection closed by peer");
                return Ok(());
            }
            Err(TransportError::Timeout) => {
                if shutdown.load(Ordering::SeqCst) {
                    return Ok(());
                }
                continue;
            }
            Err(err) => return Err(err),
        }

        let (header, payload) = transport.read_frame()?;
        let command = header.command();
        debug!(
            "received {command:?} #{} ({} bytes, sync {})",
            header.message_id,
            payload.len(),
            header.sync
        );

        let reply = match dispatch(&transport, component, command, &payload) {
            Ok(reply) => reply,
            Err(err) if !err.is_connection_fatal() => {
                warn!("failed to handle {command:?}: {err}");
                None
            }
            Err(err) => return Err(err),
        };

        if header.sync {
            transport.write_reply(header.message_id, reply.as_deref())?;
        }
    }
}

fn dispatch<C: RelayComponent>(
    transport: &ProtocolTransport<TcpStream>,
    component: &C,
    command: SocketCommand,
    payload: &[u8],
) -> Result<Option<Vec<u8>>, TransportError> {
    match command {
        SocketCommand::HandleOneWayMessage | SocketCommand::HandleSyncMessage => {
            let mut message: RelayMessage = from_bytes(payload)?;
            if let Err(err) = component.handle_message(&mut message) {
                warn!("{} failed on {message}: {err}", component.name());
                mark_failed(&mut message, &err);
            }
            if command == SocketCommand::HandleOneWayMessage {
                return Ok(None);
            }
            trim_reply(&mut message);
            Ok(Some(to_bytes(&message)?))
        }
        SocketCommand::HandleOneWayMessages | SocketCommand::HandleSyncMessages => {
            let mut messages = message_list_from_bytes(payload)?;
            if let Err(err) = component.handle_messages(&mut messages) {
                warn!("{} failed on a batch of {}: {err}", component.name(), messages.len());
                for message in &mut messages {
                    mark_failed(message, &err);
                }
            }
            if command == SocketCommand::HandleOneWayMessages {
                return Ok(None);
            }
            messages.iter_mut().for_each(trim_reply);
            Ok(Some(message_list_to_bytes(&messages)?))
        }
        SocketCommand::GetRuntimeInfo => {
            let info = transport.encode_runtime_info(&[component.runtime_info()])?;
            Ok(Some(info))
        }
        SocketCommand::Unknown => {
            warn!("ignoring frame with an unknown command");
            Ok(None)
        }
    }
}

/// Replies only carry a payload back for message types that return one.
fn trim_reply(message: &mut RelayMessage) {
    if !message.allows_return_payload() {
        message.payload = None;
    }
}
