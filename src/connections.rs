//! Non-owning table of live connections, kept by the accept loop for shutdown.
//!
//! Sessions hold the only strong reference to their socket. A slot here is a weak
//! handle stamped with a generation so a reused index never aliases an old entry.

use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub index: usize,
    pub generation: u64,
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    entry: Option<(Weak<TcpStream>, SocketAddr)>,
}

#[derive(Debug, Default)]
pub struct ConnectionTable {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release slots whose session has already dropped its socket.
    pub fn prune(&mut self) -> usize {
        let mut pruned = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let dead = matches!(&slot.entry, Some((weak, _)) if weak.strong_count() == 0);
            if dead {
                slot.entry = None;
                self.free.push(index);
                pruned += 1;
            }
        }
        pruned
    }

    pub fn insert(&mut self, stream: &Arc<TcpStream>, peer: SocketAddr) -> ConnectionId {
        let entry = Some((Arc::downgrade(stream), peer));
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.generation += 1;
                slot.entry = entry;
                ConnectionId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot { generation: 0, entry });
                ConnectionId {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        }
    }

    /// Upgrade `id` if it still names the same, still-open connection.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<TcpStream>> {
        let slot = self.slots.get(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref().and_then(|(weak, _)| weak.upgrade())
    }

    pub fn live(&self) -> Vec<(ConnectionId, SocketAddr)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match &slot.entry {
                Some((weak, peer)) if weak.strong_count() > 0 => Some((
                    ConnectionId {
                        index,
                        generation: slot.generation,
                    },
                    *peer,
                )),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best-effort shutdown of every reachable socket. Sessions blocked on a read
    /// see end-of-stream or an I/O error. Returns the failures for logging.
    pub fn close_all(&mut self) -> Vec<(SocketAddr, std::io::Error)> {
        let mut failures = Vec::new();
        for slot in &mut self.slots {
            if let Some((weak, peer)) = slot.entry.take() {
                if let Some(stream) = weak.upgrade() {
                    if let Err(e) = stream.shutdown(Shutdown::Both) {
                        failures.push((peer, e));
                    }
                }
            }
        }
        self.slots.clear();
        self.free.clear();
        failures
    }
}
