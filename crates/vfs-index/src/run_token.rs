//! Exclusive ownership of "a build is in progress".
//!
//! A `RunSlot` holds at most one `RunToken`. Acquisition is a single
//! compare-and-swap on the owner id: a second build fails fast with
//! `BuildAlreadyRunning` instead of queueing behind the first.
//!
//! The token also carries the build's single-slot stop channel and the live
//! flag that walker workers poll. The flag is best-effort: a worker past its
//! check may still finish one listing after the build stops.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{IndexError, Result};

/// Slot value meaning "no build".
const NO_OWNER: u64 = 0;

#[derive(Debug)]
pub struct RunToken {
    id: u64,
    running: Arc<AtomicBool>,
    stop_tx: mpsc::Sender<()>,
}

impl RunToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Live flag handed to walker workers.
    pub fn live_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Clears the live flag. Written once, by the control loop on exit.
    pub(crate) fn mark_stopped(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Sends a stop without blocking. A pending stop absorbs later ones.
    pub fn request_stop(&self) {
        match self.stop_tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => {
                log::debug!("stop for build {} ignored, control loop already exited", self.id);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct RunSlot {
    owner: AtomicU64,
    next_id: AtomicU64,
    token: Mutex<Option<Arc<RunToken>>>,
}

impl RunSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide slot shared by every builder that does not bring its own.
    pub fn global() -> Arc<RunSlot> {
        static GLOBAL: OnceLock<Arc<RunSlot>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(RunSlot::new())).clone()
    }

    /// Takes the slot. Returns the token and the receiving end of its stop channel.
    pub fn acquire(&self) -> Result<(Arc<RunToken>, mpsc::Receiver<()>)> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.owner
            .compare_exchange(NO_OWNER, id, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| IndexError::BuildAlreadyRunning)?;

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let token = Arc::new(RunToken {
            id,
            running: Arc::new(AtomicBool::new(true)),
            stop_tx,
        });
        *self.token.lock() = Some(token.clone());
        Ok((token, stop_rx))
    }

    pub fn is_running(&self) -> bool {
        self.owner.load(Ordering::SeqCst) != NO_OWNER
    }

    /// Whether the build identified by `id` still owns the slot.
    pub fn is_owner(&self, id: u64) -> bool {
        self.owner.load(Ordering::SeqCst) == id
    }

    /// Asks the running build to stop. `BuildNotRunning` if the slot is empty.
    pub fn request_stop(&self) -> Result<()> {
        let token = self.token.lock().clone();
        match token {
            Some(token) => {
                token.request_stop();
                Ok(())
            }
            None => Err(IndexError::BuildNotRunning),
        }
    }

    /// Frees the slot if `id` still owns it.
    pub(crate) fn release(&self, id: u64) {
        {
            let mut token = self.token.lock();
            if token.as_ref().is_some_and(|token| token.id == id) {
                *token = None;
            }
        }
        let _ = self
            .owner
            .compare_exchange(id, NO_OWNER, Ordering::SeqCst, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_fast() {
        let slot = RunSlot::new();
        let (token, _rx) = slot.acquire().expect("first");
        assert!(slot.is_running());
        assert!(slot.is_owner(token.id()));

        let error = slot.acquire().expect_err("second");
        assert!(error.is_already_running());

        slot.release(token.id());
        assert!(!slot.is_running());
        let (next, _rx) = slot.acquire().expect("after release");
        assert_ne!(next.id(), token.id());
    }

    #[test]
    fn release_of_stale_id_is_ignored() {
        let slot = RunSlot::new();
        let (token, _rx) = slot.acquire().expect("acquire");
        slot.release(token.id() + 100);
        assert!(slot.is_owner(token.id()));
    }

    #[test]
    fn stop_requests_coalesce() {
        let slot = RunSlot::new();
        assert!(matches!(slot.request_stop(), Err(IndexError::BuildNotRunning)));

        let (_token, mut rx) = slot.acquire().expect("acquire");
        slot.request_stop().expect("stop");
        slot.request_stop().expect("stop again");

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn live_flag_clears_once() {
        let slot = RunSlot::new();
        let (token, _rx) = slot.acquire().expect("acquire");
        assert!(token.is_running());
        token.mark_stopped();
        assert!(!token.is_running());
    }

    #[test]
    fn concurrent_acquire_has_single_winner() {
        let slot = Arc::new(RunSlot::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let slot = slot.clone();
                std::thread::spawn(move || slot.acquire().map(|(token, rx)| (token.id(), rx)).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
