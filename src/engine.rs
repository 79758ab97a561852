use crate::message::{self, Message, ParseError, MAX_PACKET_SIZE};
use crate::registry::{Entry, Registry};
use crate::udp::{self, Transport};
use crate::{Advertisement, Alive, ByeBye, Error, Listener, SearchResponse};
use bytes::Bytes;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

const READ_BUFFER_SIZE: usize = 2048;

/// Initial delays of the two announcement timers. Two timers per
/// advertisement gives more than one NOTIFY per refresh interval, as
/// UPnP DA 1.0 recommends.
const ANNOUNCE_INITIAL_DELAYS_SECS: [u64; 2] = [1, 3];

pub(crate) enum WriteCommand {
    Datagram { payload: Bytes, to: SocketAddr },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Running,
    Stopping,
    Stopped,
}

struct State {
    registry: Registry,
    lifecycle: Lifecycle,
    started: bool,
    write_rx: Option<mpsc::UnboundedReceiver<WriteCommand>>,
}

/// The core of the SSDP agent: one reader task, one writer task, the
/// registry of local advertisements, and the announcement timers.
///
/// The registry, listen filter, and lifecycle flag live under a single
/// mutex. Every path that touches them (user-facing calls, the reader,
/// the timers, the search-delay tasks) takes that lock briefly,
/// computes the outbound datagram, and enqueues it on the writer
/// channel after the lock is released. The writer task is the only
/// sender on the socket, which serialises all output.
pub(crate) struct Engine<T: Transport> {
    socket: T,
    listener: Option<Box<dyn Listener + Send + Sync>>,
    state: Mutex<State>,
    write_tx: mpsc::UnboundedSender<WriteCommand>,
    shutdown: CancellationToken,
    writer_done: watch::Sender<bool>,
    reader_done: watch::Sender<bool>,
    weak: Weak<Engine<T>>,
}

fn datagram<F: FnOnce(&mut [u8]) -> usize>(build: F) -> Bytes {
    let mut buf = [0u8; MAX_PACKET_SIZE];
    let n = build(&mut buf);
    Bytes::copy_from_slice(&buf[..n])
}

fn rfc1123_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

impl<T: Transport> Engine<T> {
    pub fn new(
        socket: T,
        listener: Option<Box<dyn Listener + Send + Sync>>,
    ) -> Arc<Self> {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        Arc::new_cyclic(|weak| Engine {
            socket,
            listener,
            state: Mutex::new(State {
                registry: Registry::default(),
                lifecycle: Lifecycle::Running,
                started: false,
                write_rx: Some(write_rx),
            }),
            write_tx,
            shutdown: CancellationToken::new(),
            writer_done: watch::channel(false).0,
            reader_done: watch::channel(false).0,
            weak: weak.clone(),
        })
    }

    /// Run the reader and writer loops until [`Engine::stop`] completes.
    pub async fn run(&self) {
        let write_rx = {
            let mut state = self.state.lock().unwrap();
            state.started = true;
            state.write_rx.take()
        };
        let Some(write_rx) = write_rx else {
            return;
        };
        tokio::join!(self.read_loop(), self.write_loop(write_rx));
    }

    async fn read_loop(&self) {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((n, from)) => self.on_datagram(&buf[..n], from),
                    Err(e) => {
                        warn!(error = %e, "error reading from SSDP socket");
                        break;
                    }
                }
            }
        }
        self.reader_done.send_replace(true);
    }

    async fn write_loop(&self, mut write_rx: mpsc::UnboundedReceiver<WriteCommand>) {
        while let Some(command) = write_rx.recv().await {
            match command {
                WriteCommand::Shutdown => break,
                WriteCommand::Datagram { payload, to } => {
                    if let Err(e) = self.socket.send_to(&payload, to).await {
                        warn!(%to, error = %e, "error sending SSDP datagram");
                    }
                }
            }
        }
        self.writer_done.send_replace(true);
    }

    fn enqueue(&self, payload: Bytes, to: SocketAddr) {
        let _ = self.write_tx.send(WriteCommand::Datagram { payload, to });
    }

    fn on_datagram(&self, datagram: &[u8], from: SocketAddr) {
        let message = match message::parse(datagram) {
            Ok(message) => message,
            Err(ParseError::IncompleteSearch) => return,
            Err(e) => {
                warn!(%from, error = %e, "discarding SSDP datagram");
                return;
            }
        };
        match message {
            Message::NotifyAlive {
                notification_type,
                unique_service_name,
                location,
                server,
                max_age,
            } => {
                let Some(listener) = &self.listener else { return };
                if !self.wants(&notification_type) {
                    return;
                }
                listener.on_alive(&Alive {
                    device_id: message::device_id(&unique_service_name).to_string(),
                    notification_type,
                    unique_service_name,
                    location,
                    max_age,
                    server,
                    raw: String::from_utf8_lossy(datagram).into_owned(),
                });
            }
            Message::NotifyByeBye {
                notification_type,
                unique_service_name,
            } => {
                let Some(listener) = &self.listener else { return };
                if !self.wants(&notification_type) {
                    return;
                }
                listener.on_byebye(&ByeBye {
                    device_id: message::device_id(&unique_service_name).to_string(),
                    notification_type,
                    unique_service_name,
                    raw: String::from_utf8_lossy(datagram).into_owned(),
                });
            }
            Message::Response {
                search_target,
                unique_service_name,
                location,
                server,
                max_age,
            } => {
                // Responses reach the listener regardless of the listen
                // filter: they only ever arrive for searches this agent
                // sent itself.
                let Some(listener) = &self.listener else { return };
                if !self.is_running() {
                    return;
                }
                listener.on_response(&SearchResponse {
                    device_id: message::device_id(&unique_service_name).to_string(),
                    search_target,
                    unique_service_name,
                    location,
                    max_age,
                    server,
                    raw: String::from_utf8_lossy(datagram).into_owned(),
                });
            }
            Message::Search {
                search_target,
                maximum_wait_secs,
            } => self.on_search(search_target, maximum_wait_secs, from),
        }
    }

    fn is_running(&self) -> bool {
        self.state.lock().unwrap().lifecycle == Lifecycle::Running
    }

    fn wants(&self, notification_type: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.lifecycle == Lifecycle::Running && state.registry.wants(notification_type)
    }

    /// Handle a valid M-SEARCH: wait somewhere in `[0, MX]` seconds on a
    /// task of its own, so the reader keeps going, then answer whatever
    /// still matches.
    fn on_search(&self, search_target: String, maximum_wait_secs: u64, from: SocketAddr) {
        if !self.is_running() {
            return;
        }
        let delay = match maximum_wait_secs.saturating_mul(1000) {
            0 => Duration::ZERO,
            millis => Duration::from_millis(rand::thread_rng().gen_range(0..=millis)),
        };
        let engine = self.weak.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(engine) = engine.upgrade() else { return };
            engine.respond_to_search(&search_target, from);
        });
    }

    fn respond_to_search(&self, search_target: &str, to: SocketAddr) {
        let responses: Vec<Bytes> = {
            let state = self.state.lock().unwrap();
            if state.lifecycle != Lifecycle::Running {
                return;
            }
            let date = rfc1123_now();
            state
                .registry
                .matches(search_target)
                .into_iter()
                .map(|entry| {
                    datagram(|buf| {
                        message::build_response(
                            buf,
                            &entry.advertisement.service_type,
                            &entry.unique_service_name,
                            &entry.advertisement.location,
                            entry.advertisement.max_age,
                            &date,
                        )
                    })
                })
                .collect()
        };
        for payload in responses {
            trace!(%to, search_target, "answering M-SEARCH");
            self.enqueue(payload, to);
        }
    }

    /// Register a local service and start its two announcement timers.
    /// A no-op once the engine is stopping.
    pub fn advertise_server(&self, advertisement: Advertisement) {
        let mut state = self.state.lock().unwrap();
        if state.lifecycle != Lifecycle::Running {
            return;
        }
        let device_uuid = advertisement.device_uuid.clone();
        if let Some(displaced) = state.registry.insert(Entry::new(advertisement)) {
            displaced.stop_timers();
        }
        let timers = ANNOUNCE_INITIAL_DELAYS_SECS.map(|secs| {
            tokio::spawn(announce_loop(
                self.weak.clone(),
                device_uuid.clone(),
                Duration::from_secs(secs),
            ))
        });
        if let Some(entry) = state.registry.get_mut(&device_uuid) {
            entry.timers = timers.into();
        }
    }

    /// Unregister a local service. Stops its timers without announcing
    /// a byebye; only [`Engine::stop`] says goodbye.
    pub fn remove_server(&self, device_uuid: &str) {
        let mut state = self.state.lock().unwrap();
        if state.lifecycle != Lifecycle::Running {
            return;
        }
        if let Some(entry) = state.registry.remove(device_uuid) {
            entry.stop_timers();
        }
    }

    /// Record interest in a search target and send one M-SEARCH for it.
    pub fn listen_for(&self, search_target: &str) -> Result<(), Error> {
        let payload = {
            let mut state = self.state.lock().unwrap();
            if state.lifecycle != Lifecycle::Running {
                return Err(Error::NotRunning);
            }
            state.registry.listen_for(search_target);
            datagram(|buf| message::build_search(buf, search_target))
        };
        self.enqueue(payload, udp::group_addr());
        Ok(())
    }

    fn build_alive(&self, device_uuid: &str) -> Option<(Bytes, u32)> {
        let state = self.state.lock().unwrap();
        if state.lifecycle != Lifecycle::Running {
            return None;
        }
        let entry = state.registry.get(device_uuid)?;
        let advertisement = &entry.advertisement;
        let payload = datagram(|buf| {
            message::build_alive(
                buf,
                &advertisement.service_type,
                &entry.unique_service_name,
                &advertisement.location,
                advertisement.max_age,
            )
        });
        Some((payload, advertisement.max_age))
    }

    /// Stop the engine, in order: refuse further mutations, say byebye
    /// for every advertisement, drain the writer, then stop the reader.
    /// Idempotent; concurrent callers all return once the loops exit.
    pub async fn stop(&self) {
        let (byebyes, started) = {
            let mut state = self.state.lock().unwrap();
            match state.lifecycle {
                Lifecycle::Running => {
                    state.lifecycle = Lifecycle::Stopping;
                    let byebyes: Vec<Bytes> = state
                        .registry
                        .drain()
                        .into_iter()
                        .map(|entry| {
                            entry.stop_timers();
                            datagram(|buf| {
                                message::build_byebye(
                                    buf,
                                    &entry.advertisement.service_type,
                                    &entry.unique_service_name,
                                )
                            })
                        })
                        .collect();
                    (Some(byebyes), state.started)
                }
                _ => (None, state.started),
            }
        };

        if let Some(byebyes) = byebyes {
            for payload in byebyes {
                self.enqueue(payload, udp::group_addr());
            }
            let _ = self.write_tx.send(WriteCommand::Shutdown);
            if started {
                let _ = self.writer_done.subscribe().wait_for(|done| *done).await;
            }
            self.shutdown.cancel();
            if started {
                let _ = self.reader_done.subscribe().wait_for(|done| *done).await;
            }
            self.state.lock().unwrap().lifecycle = Lifecycle::Stopped;
            trace!("SSDP engine stopped");
        } else if started {
            let _ = self.writer_done.subscribe().wait_for(|done| *done).await;
            let _ = self.reader_done.subscribe().wait_for(|done| *done).await;
        }
    }
}

/// Body of one announcement timer. Fires an alive NOTIFY after its
/// initial delay, then every `initial + max_age` seconds. Looks its
/// advertisement up through the registry each round, so it dies
/// naturally once the advertisement (or the engine) is gone.
async fn announce_loop<T: Transport>(
    engine: Weak<Engine<T>>,
    device_uuid: String,
    initial: Duration,
) {
    tokio::time::sleep(initial).await;
    loop {
        let Some(engine) = engine.upgrade() else { return };
        let Some((payload, max_age)) = engine.build_alive(&device_uuid) else {
            return;
        };
        engine.enqueue(payload, udp::group_addr());
        drop(engine);
        tokio::time::sleep(initial + Duration::from_secs(u64::from(max_age))).await;
    }
}
