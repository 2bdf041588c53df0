//! Port allocation for server processes.

use std::collections::BTreeSet;
use std::net::TcpListener;
use std::sync::{Mutex, PoisonError};

use infera_core::PortError;
use tracing::debug;

/// Check if a port can be bound right now.
///
/// This binds and immediately drops the listener. Used only for diagnostics:
/// allocation itself is pure bookkeeping so results are reproducible.
pub fn is_port_bindable(host: &str, port: u16) -> bool {
    TcpListener::bind((host, port))
        .and_then(|listener| listener.local_addr())
        .is_ok()
}

/// Exclusive ports from a fixed inclusive range `[base, max]`.
///
/// Always hands out the lowest free port. Safe to share between tasks.
#[derive(Debug)]
pub struct PortAllocator {
    base: u16,
    max: u16,
    used: Mutex<BTreeSet<u16>>,
}

impl PortAllocator {
    /// Create an allocator for `[base, max]`. Bounds are swapped if reversed.
    pub fn new(base: u16, max: u16) -> Self {
        let (base, max) = if base <= max { (base, max) } else { (max, base) };
        Self {
            base,
            max,
            used: Mutex::new(BTreeSet::new()),
        }
    }

    pub const fn base(&self) -> u16 {
        self.base
    }

    pub const fn max(&self) -> u16 {
        self.max
    }

    fn used(&self) -> std::sync::MutexGuard<'_, BTreeSet<u16>> {
        self.used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the lowest free port in the range.
    pub fn allocate(&self) -> Result<u16, PortError> {
        let mut used = self.used();
        let port = (self.base..=self.max)
            .find(|p| !used.contains(p))
            .ok_or(PortError::Exhausted {
                base: self.base,
                max: self.max,
            })?;
        used.insert(port);
        debug!(port = %port, in_use = %used.len(), "Allocated port");
        Ok(port)
    }

    /// Return a port to the pool. Releasing a free port is a no-op.
    pub fn release(&self, port: u16) {
        if self.used().remove(&port) {
            debug!(port = %port, "Released port");
        }
    }

    /// Mark a specific port as busy without going through `allocate`.
    ///
    /// Returns `false` if the port is out of range or already held.
    pub fn reserve(&self, port: u16) -> bool {
        if !self.in_range(port) {
            return false;
        }
        self.used().insert(port)
    }

    /// Whether `port` is in range and not held.
    pub fn is_available(&self, port: u16) -> bool {
        self.in_range(port) && !self.used().contains(&port)
    }

    /// Number of ports currently held.
    pub fn in_use(&self) -> usize {
        self.used().len()
    }

    const fn in_range(&self, port: u16) -> bool {
        port >= self.base && port <= self.max
    }
}
