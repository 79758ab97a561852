//! An SSDP engine: service discovery and advertisement for UPnP 1.0
//!
//! SSDP (the Simple Service Discovery Protocol) is the discovery layer
//! of UPnP: devices announce the services they host with multicast
//! NOTIFY datagrams, and control points find them either by listening
//! for those announcements or by multicasting an M-SEARCH and
//! collecting the unicast answers. There is no RFC; the protocol is
//! specified in the UPnP Device Architecture 1.0 documents.
//!
//! This crate provides [`Service`], a single long-lived agent that
//! plays both sides at once over one IPv4 UDP socket:
//!
//!  - as a **server**, [`Service::advertise_server`] registers a local
//!    service, which is then announced periodically (`ssdp:alive`),
//!    answered for when M-SEARCHes match it, and bidden farewell
//!    (`ssdp:byebye`) when the agent shuts down;
//!  - as a **client**, [`Service::listen_for`] searches for a target
//!    and filters incoming notifications down to the targets the
//!    application cares about, delivering them to its [`Listener`].
//!
//! ```no_run
//! use ssdp_agent::{Advertisement, Service};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ssdp_agent::Error> {
//!     let service = Arc::new(Service::new(None)?);
//!
//!     let runner = service.clone();
//!     let running = tokio::spawn(async move { runner.start().await });
//!
//!     service.advertise_server(Advertisement {
//!         service_type: "urn:example:service:lamp:1".to_string(),
//!         device_uuid: "op0c9081-58a0-44b7-9f04-27f187aecf78".to_string(),
//!         location: "http://192.168.1.20:8080/lamp.xml".to_string(),
//!         max_age: 1800,
//!     });
//!
//!     // ... until shutdown ...
//!     service.stop().await;
//!     running.await.expect("agent task failed");
//!     Ok(())
//! }
//! ```
//!
//! The engine speaks IPv4 only, and stays below the description layer
//! of UPnP: fetching or serving the device description documents that
//! `LOCATION` URLs point at is the application's business.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error as ThisError;

mod engine;
mod message;
mod registry;
mod service;
mod udp;

pub use service::Service;

/// The ways constructing or driving a [`Service`] can fail.
#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum Error {
    /// No network interface with a usable IPv4 address could be joined
    /// to the SSDP multicast group.
    #[error("no multicast-capable network interface could be joined")]
    NoInterface,

    /// The engine has been stopped.
    #[error("the SSDP engine is not running")]
    NotRunning,

    /// Socket setup failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A local service to advertise, as handed to
/// [`Service::advertise_server`].
///
/// The announced USN is derived from the UUID and type:
/// `uuid:<device-uuid>::<service-type>`. One advertisement per device
/// UUID.
#[derive(Debug, Clone)]
pub struct Advertisement {
    /// The service type peers search for,
    /// e.g. `urn:schemas-upnp-org:service:ContentDirectory:1`.
    pub service_type: String,

    /// Unique identifier of this device. Make it actually unique.
    pub device_uuid: String,

    /// Where the advertised service lives,
    /// e.g. `http://192.168.0.2:3434/description.xml`.
    pub location: String,

    /// How many seconds each announcement stays valid. Also sets the
    /// re-announcement cadence.
    pub max_age: u32,
}

/// An `ssdp:alive` notification received from the network.
#[derive(Debug, Clone)]
pub struct Alive {
    /// Notification type (the searchable resource type).
    pub notification_type: String,

    /// Device UUID extracted from the USN, or `""` if the USN has
    /// another shape.
    pub device_id: String,

    /// The sender's Unique Service Name.
    pub unique_service_name: String,

    /// URL of the advertised resource.
    pub location: String,

    /// Seconds the announcement stays valid, or `-1` when the
    /// `CACHE-CONTROL` header is absent or unparsable.
    pub max_age: i32,

    /// The sender's `SERVER` product string.
    pub server: String,

    /// The datagram as received, for anything the parsed fields leave
    /// out.
    pub raw: String,
}

/// An `ssdp:byebye` notification received from the network.
#[derive(Debug, Clone)]
pub struct ByeBye {
    /// Notification type of the departing resource.
    pub notification_type: String,

    /// Device UUID extracted from the USN, or `""`.
    pub device_id: String,

    /// The sender's Unique Service Name.
    pub unique_service_name: String,

    /// The datagram as received.
    pub raw: String,
}

/// A unicast 200 OK answering one of this agent's M-SEARCHes.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    /// The search target being answered (`ST`).
    pub search_target: String,

    /// Device UUID extracted from the USN, or `""`.
    pub device_id: String,

    /// The responder's Unique Service Name.
    pub unique_service_name: String,

    /// URL of the discovered resource.
    pub location: String,

    /// Seconds the answer stays valid, or `-1`.
    pub max_age: i32,

    /// The responder's `SERVER` product string.
    pub server: String,

    /// The datagram as received.
    pub raw: String,
}

/// Receiver for discovery events, handed to [`Service::new`].
///
/// All three callbacks run on the engine's reader task, so they should
/// return promptly; a slow listener stalls protocol processing. They
/// are invoked without any engine lock held, so calling back into the
/// [`Service`] is safe.
pub trait Listener {
    /// A resource announced itself. Reported only for notification
    /// types declared via [`Service::listen_for`].
    fn on_alive(&self, _event: &Alive) {}

    /// A resource said goodbye. Reported only for notification types
    /// declared via [`Service::listen_for`].
    fn on_byebye(&self, _event: &ByeBye) {}

    /// A search response arrived. Responses are not filtered through
    /// the [`Service::listen_for`] set: they only ever answer searches
    /// this agent sent.
    fn on_response(&self, _event: &SearchResponse) {}
}
