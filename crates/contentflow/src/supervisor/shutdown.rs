use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

/// Stop signal shared by a supervisor and its workers.
///
/// Signalling drops the only sender, which disconnects every receiver at once
/// and wakes all pending waits.
#[derive(Clone)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    sender: Arc<Mutex<Option<Sender<()>>>>,
    receiver: Receiver<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }

    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            flag: Arc::clone(&self.flag),
            receiver: self.receiver.clone(),
        }
    }

    /// Idempotent.
    pub fn signal(&self) {
        self.flag.store(true, Ordering::SeqCst);
        match self.sender.lock() {
            Ok(mut sender) => {
                sender.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }
    }

    pub fn is_signalled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`Shutdown`].
#[derive(Clone)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
    receiver: Receiver<()>,
}

impl ShutdownToken {
    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleeps for up to `timeout`. Returns `true` as soon as shutdown is
    /// signalled, `false` if the full timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_shutdown() {
            return true;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => self.is_shutdown(),
        }
    }

    /// Blocks until shutdown is signalled.
    pub fn wait(&self) {
        while !self.wait_timeout(Duration::from_secs(3600)) {}
    }
}
