use crate::Advertisement;
use std::collections::{HashMap, HashSet};
use tokio::task::JoinHandle;

/// A registered local service, together with its derived USN and the
/// handles of its two announcement timers.
pub(crate) struct Entry {
    pub advertisement: Advertisement,
    pub unique_service_name: String,
    pub timers: Vec<JoinHandle<()>>,
}

impl Entry {
    pub fn new(advertisement: Advertisement) -> Self {
        let unique_service_name = format!(
            "uuid:{}::{}",
            advertisement.device_uuid, advertisement.service_type
        );
        Self {
            advertisement,
            unique_service_name,
            timers: Vec::new(),
        }
    }

    pub fn stop_timers(&self) {
        for timer in &self.timers {
            timer.abort();
        }
    }
}

/// In-memory indexes of locally advertised services and of the search
/// targets the client is listening for.
///
/// The device-UUID index owns the entries; service-type buckets hold
/// UUIDs in registration order, so an entry appears in its type bucket
/// exactly when it appears in the UUID index.
#[derive(Default)]
pub(crate) struct Registry {
    by_device_uuid: HashMap<String, Entry>,
    by_service_type: HashMap<String, Vec<String>>,
    listen_targets: HashSet<String>,
}

impl Registry {
    /// Register an entry, displacing any previous advertisement for the
    /// same device UUID. The displaced entry is handed back so the
    /// caller can stop its timers.
    pub fn insert(&mut self, entry: Entry) -> Option<Entry> {
        let device_uuid = entry.advertisement.device_uuid.clone();
        let displaced = self.remove(&device_uuid);
        self.by_service_type
            .entry(entry.advertisement.service_type.clone())
            .or_default()
            .push(device_uuid.clone());
        self.by_device_uuid.insert(device_uuid, entry);
        displaced
    }

    pub fn remove(&mut self, device_uuid: &str) -> Option<Entry> {
        let entry = self.by_device_uuid.remove(device_uuid)?;
        let service_type = &entry.advertisement.service_type;
        if let Some(bucket) = self.by_service_type.get_mut(service_type) {
            bucket.retain(|uuid| uuid != device_uuid);
            if bucket.is_empty() {
                self.by_service_type.remove(service_type);
            }
        }
        Some(entry)
    }

    pub fn get(&self, device_uuid: &str) -> Option<&Entry> {
        self.by_device_uuid.get(device_uuid)
    }

    pub fn get_mut(&mut self, device_uuid: &str) -> Option<&mut Entry> {
        self.by_device_uuid.get_mut(device_uuid)
    }

    /// The advertisements a search target selects: everything for
    /// `ssdp:all`, otherwise a device-UUID match, otherwise the
    /// service-type bucket.
    pub fn matches(&self, search_target: &str) -> Vec<&Entry> {
        if search_target == "ssdp:all" {
            return self.by_device_uuid.values().collect();
        }
        if let Some(entry) = self.by_device_uuid.get(search_target) {
            return vec![entry];
        }
        if let Some(bucket) = self.by_service_type.get(search_target) {
            return bucket
                .iter()
                .filter_map(|uuid| self.by_device_uuid.get(uuid))
                .collect();
        }
        Vec::new()
    }

    /// Unregister everything, handing the entries back for byebye
    /// announcements.
    pub fn drain(&mut self) -> Vec<Entry> {
        self.by_service_type.clear();
        self.by_device_uuid.drain().map(|(_, entry)| entry).collect()
    }

    pub fn listen_for(&mut self, search_target: &str) {
        self.listen_targets.insert(search_target.to_string());
    }

    pub fn wants(&self, notification_type: &str) -> bool {
        self.listen_targets.contains(notification_type)
    }
}
