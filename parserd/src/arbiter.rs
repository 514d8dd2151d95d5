//! Serialises per-client report directory access across workers.
//!
//! Two workers handling submissions from the same client would otherwise race
//! on the client's report subdirectory. The arbiter keeps a set of currently
//! held client ids; acquiring a held id blocks until the holder releases.
//! Each worker holds at most one slot at a time, so the arbiter cannot
//! deadlock.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};

use crate::types::ClientId;

/// Process-wide arbiter over per-client report subdirectories.
#[derive(Debug, Default)]
pub struct ReportDirArbiter {
    held: Mutex<HashSet<ClientId>>,
    released: Condvar,
}

impl ReportDirArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires exclusive access to `client_id`'s report subdirectory,
    /// blocking while another worker holds it.
    ///
    /// The returned slot releases on drop, so release runs on every exit
    /// path of a worker iteration.
    pub fn acquire(self: &Arc<Self>, client_id: ClientId) -> ClientDirSlot {
        let mut held = self.held.lock().unwrap();
        while held.contains(&client_id) {
            held = self.released.wait(held).unwrap();
        }
        held.insert(client_id.clone());
        drop(held);

        ClientDirSlot {
            arbiter: Arc::clone(self),
            client_id: Some(client_id),
        }
    }

    /// Returns `true` while some worker holds `client_id`.
    pub fn is_held(&self, client_id: &ClientId) -> bool {
        self.held.lock().unwrap().contains(client_id)
    }

    fn release(&self, client_id: &ClientId) {
        let mut held = self.held.lock().unwrap();
        held.remove(client_id);
        drop(held);
        self.released.notify_all();
    }
}

/// Exclusive hold on one client's report subdirectory.
///
/// Releasing is idempotent: [`ClientDirSlot::release`] and the drop
/// implementation release at most once between them.
#[derive(Debug)]
pub struct ClientDirSlot {
    arbiter: Arc<ReportDirArbiter>,
    client_id: Option<ClientId>,
}

impl ClientDirSlot {
    /// The client this slot belongs to.
    pub fn client_id(&self) -> Option<&ClientId> {
        self.client_id.as_ref()
    }

    /// Releases the slot early.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(client_id) = self.client_id.take() {
            self.arbiter.release(&client_id);
        }
    }
}

impl Drop for ClientDirSlot {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn slot_is_exclusive_per_client() {
        let arbiter = Arc::new(ReportDirArbiter::new());
        let client = ClientId::from("client-a");

        let slot = arbiter.acquire(client.clone());
        assert!(arbiter.is_held(&client));

        // A second acquire for the same client must wait for the release.
        let contender = {
            let arbiter = arbiter.clone();
            let client = client.clone();
            thread::spawn(move || {
                let _slot = arbiter.acquire(client);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!contender.is_finished());

        drop(slot);
        contender.join().unwrap();
        assert!(!arbiter.is_held(&client));
    }

    #[test]
    fn different_clients_do_not_contend() {
        let arbiter = Arc::new(ReportDirArbiter::new());

        let slot_a = arbiter.acquire(ClientId::from("client-a"));
        let slot_b = arbiter.acquire(ClientId::from("client-b"));

        assert!(arbiter.is_held(&ClientId::from("client-a")));
        assert!(arbiter.is_held(&ClientId::from("client-b")));

        drop(slot_a);
        drop(slot_b);
    }

    #[test]
    fn release_is_idempotent() {
        let arbiter = Arc::new(ReportDirArbiter::new());
        let client = ClientId::from("client-a");

        let slot = arbiter.acquire(client.clone());
        slot.release();
        assert!(!arbiter.is_held(&client));

        // Releasing again via a fresh slot's drop must not disturb another
        // worker's hold.
        let held = arbiter.acquire(client.clone());
        assert!(arbiter.is_held(&client));
        drop(held);
    }

    #[test]
    fn contended_workers_serialize() {
        let arbiter = Arc::new(ReportDirArbiter::new());
        let overlap = Arc::new(Mutex::new((0usize, 0usize))); // (current, max)

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let arbiter = arbiter.clone();
                let overlap = overlap.clone();
                thread::spawn(move || {
                    for _ in 0..10 {
                        let _slot = arbiter.acquire(ClientId::from("shared"));
                        {
                            let mut counts = overlap.lock().unwrap();
                            counts.0 += 1;
                            counts.1 = counts.1.max(counts.0);
                        }
                        thread::sleep(Duration::from_millis(1));
                        overlap.lock().unwrap().0 -= 1;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(overlap.lock().unwrap().1, 1);
    }
}
