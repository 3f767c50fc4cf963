use crate::instance::InstanceHandle;
use std::collections::BTreeMap;

/// Every instance this node manages, keyed by listening port.
#[derive(Default)]
pub struct InstanceRegistry {
    handles: BTreeMap<u16, InstanceHandle>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_mut(&mut self, port: u16) -> Option<&mut InstanceHandle> {
        self.handles.get_mut(&port)
    }

    pub fn contains(&self, port: u16) -> bool {
        self.handles.contains_key(&port)
    }

    /// Returns the handle previously registered on the same port, if any.
    pub fn insert(&mut self, handle: InstanceHandle) -> Option<InstanceHandle> {
        self.handles.insert(handle.port(), handle)
    }

    pub fn remove(&mut self, port: u16) -> Option<InstanceHandle> {
        self.handles.remove(&port)
    }

    pub fn ports(&self) -> Vec<u16> {
        self.handles.keys().copied().collect()
    }

    pub fn running_ports(&self) -> Vec<u16> {
        self.handles
            .values()
            .filter(|handle| handle.is_running())
            .map(InstanceHandle::port)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstanceHandle> {
        self.handles.values()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
