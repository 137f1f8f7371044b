//! Round-robin rotation over host keys.

use std::collections::VecDeque;

use crate::load_balancer::host::HostAddr;

/// FIFO ring of host keys: take from the front, put back at the end.
#[derive(Debug, Default, Clone)]
pub struct Rotation {
    keys: VecDeque<HostAddr>,
}

impl Rotation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the front key to the back and return it.
    pub fn rotate(&mut self) -> Option<HostAddr> {
        let key = self.keys.pop_front()?;
        self.keys.push_back(key);
        Some(key)
    }

    pub fn push_back(&mut self, key: HostAddr) {
        self.keys.push_back(key);
    }

    /// Remove a key wherever it sits. Returns false if it was not present.
    pub fn remove(&mut self, key: &HostAddr) -> bool {
        match self.keys.iter().position(|k| k == key) {
            Some(index) => {
                self.keys.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &HostAddr) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostAddr> {
        self.keys.iter()
    }
}
