use crate::engine::Engine;
use crate::udp;
use crate::{Advertisement, Error, Listener};
use std::sync::Arc;

/// A combined SSDP client and server on the local network.
///
/// One `Service` owns the UDP endpoint on port 1900, advertises any
/// number of local services with periodic alive NOTIFYs, answers
/// incoming M-SEARCHes for them, and reports discoveries to the
/// listener handed to [`Service::new`].
///
/// [`Service::start`] runs the socket loops and is expected to be
/// spawned on a task of its own; every other method can be called from
/// anywhere. [`Service::stop`] announces byebye for everything still
/// advertised and winds the loops down.
pub struct Service {
    engine: Arc<Engine<tokio::net::UdpSocket>>,
}

impl Service {
    /// Create the agent: binds `0.0.0.0:1900` and joins the SSDP
    /// multicast group on every usable interface.
    ///
    /// Pass `None` as the listener to run as a pure server; incoming
    /// notifications and search responses are then dropped.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`Error::NoInterface`] if no interface could be joined to the
    /// multicast group; [`Error::Io`] if binding or configuring the
    /// socket fails.
    pub fn new(
        listener: Option<Box<dyn Listener + Send + Sync>>,
    ) -> Result<Self, Error> {
        let socket = udp::bind_multicast()?;
        let socket = tokio::net::UdpSocket::from_std(socket)?;
        Ok(Self {
            engine: Engine::new(socket, listener),
        })
    }

    /// Run the datagram reader and writer until [`Service::stop`]
    /// completes. Spawn this on its own task.
    pub async fn start(&self) {
        self.engine.run().await;
    }

    /// Stop the agent: announce byebye for every registered
    /// advertisement, drain in-flight writes, and shut both loops down.
    /// Idempotent.
    pub async fn stop(&self) {
        self.engine.stop().await;
    }

    /// Advertise a local service. It is announced within a second or
    /// so, re-announced for as long as it stays registered, and
    /// answered for when searches match it. A no-op after
    /// [`Service::stop`].
    ///
    /// Registering a second advertisement with the same device UUID
    /// replaces the first.
    pub fn advertise_server(&self, advertisement: Advertisement) {
        self.engine.advertise_server(advertisement);
    }

    /// Withdraw a local service by device UUID, without announcing a
    /// byebye; peers let the last alive age out. A no-op after
    /// [`Service::stop`].
    pub fn remove_server(&self, device_uuid: &str) {
        self.engine.remove_server(device_uuid);
    }

    /// Declare interest in a search target and send one M-SEARCH for
    /// it. Alive and byebye notifications are reported to the listener
    /// only for targets declared here; the set only ever grows.
    ///
    /// # Errors
    ///
    /// [`Error::NotRunning`] after [`Service::stop`].
    pub fn listen_for(&self, search_target: &str) -> Result<(), Error> {
        self.engine.listen_for(search_target)
    }
}
