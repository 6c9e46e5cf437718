use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Files on every simulated host, keyed by `(host, path)`.
#[derive(Debug, Clone, Default)]
pub struct SimulatedFilesystem {
    files: Arc<Mutex<BTreeMap<(String, String), String>>>,
}

impl SimulatedFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, host: &str, path: &str, contents: String) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((host.to_string(), path.to_string()), contents);
    }

    pub fn read(&self, host: &str, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(host.to_string(), path.to_string()))
            .cloned()
    }

    pub fn remove(&self, host: &str, path: &str) -> bool {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(host.to_string(), path.to_string()))
            .is_some()
    }

    /// Paths currently stored on `host`.
    pub fn list(&self, host: &str) -> Vec<String> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|(h, _)| h == host)
            .map(|(_, path)| path.clone())
            .collect()
    }
}

/// One call observed by the simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimEvent {
    pub seq: usize,
    pub node: String,
    pub op: String,
}

/// Ordered record of every call made against simulated hosts.
#[derive(Debug, Clone, Default)]
pub struct SimulationLog {
    events: Arc<Mutex<Vec<SimEvent>>>,
}

impl SimulationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, node: &str, op: &str) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = events.len();
        events.push(SimEvent {
            seq,
            node: node.to_string(),
            op: op.to_string(),
        });
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Sequence number of the first `op` on `node`.
    pub fn first(&self, node: &str, op: &str) -> Option<usize> {
        self.events()
            .into_iter()
            .find(|e| e.node == node && e.op == op)
            .map(|e| e.seq)
    }

    /// Sequence number of the last `op` on `node`.
    pub fn last(&self, node: &str, op: &str) -> Option<usize> {
        self.events()
            .into_iter()
            .rev()
            .find(|e| e.node == node && e.op == op)
            .map(|e| e.seq)
    }

    pub fn ops_for(&self, node: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.node == node)
            .map(|e| e.op)
            .collect()
    }
}
