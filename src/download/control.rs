//! Run/hold/cancel signalling between a download handle and its transfer task.
//!
//! The handle owns a [`TransferControl`]; the transfer task observes the
//! matching [`ControlReceiver`] at its suspension points (before the request,
//! while awaiting response headers, between body chunks). Dropping the
//! control side is treated as cancellation.

use tokio::sync::watch;

/// Signal currently requested for a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Do not start, or pause between body chunks.
    Hold,
    /// Proceed.
    Run,
    /// Abort at the next suspension point.
    Cancel,
}

/// Sending side of a transfer's control channel.
#[derive(Debug)]
pub struct TransferControl {
    tx: watch::Sender<Signal>,
}

/// Receiving side of a transfer's control channel.
#[derive(Debug, Clone)]
pub struct ControlReceiver {
    rx: watch::Receiver<Signal>,
}

/// Marker returned when a transfer has been cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl TransferControl {
    /// Creates a channel starting at `initial`.
    #[must_use]
    pub fn new(initial: Signal) -> (Self, ControlReceiver) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx }, ControlReceiver { rx })
    }

    /// Requests `signal`. A cancelled transfer stays cancelled.
    pub fn send(&self, signal: Signal) {
        self.tx.send_if_modified(|current| {
            if *current == Signal::Cancel || *current == signal {
                false
            } else {
                *current = signal;
                true
            }
        });
    }

    /// Returns the currently requested signal.
    #[must_use]
    pub fn current(&self) -> Signal {
        *self.tx.borrow()
    }
}

impl ControlReceiver {
    /// A receiver that is permanently in [`Signal::Run`], for unattended fetches.
    #[must_use]
    pub fn running() -> Self {
        // The receiver keeps the last value after the sender is gone.
        let (_tx, rx) = watch::channel(Signal::Run);
        Self { rx }
    }

    /// Returns the currently requested signal.
    #[must_use]
    pub fn current(&self) -> Signal {
        *self.rx.borrow()
    }

    /// Returns true once cancellation was requested or the control side is gone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self.current() {
            Signal::Cancel => true,
            Signal::Run => false,
            Signal::Hold => self.rx.has_changed().is_err(),
        }
    }

    /// Waits until the transfer may proceed.
    ///
    /// Returns immediately while in [`Signal::Run`], waits while held, and
    /// fails on cancellation.
    pub async fn ready(&mut self) -> Result<(), Cancelled> {
        loop {
            match *self.rx.borrow_and_update() {
                Signal::Run => return Ok(()),
                Signal::Cancel => return Err(Cancelled),
                Signal::Hold => {}
            }
            if self.rx.changed().await.is_err() {
                return Err(Cancelled);
            }
        }
    }

    /// Resolves once cancellation is requested.
    ///
    /// Never resolves for a receiver whose sender is gone while in
    /// [`Signal::Run`].
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() == Signal::Cancel {
                return;
            }
            if self.rx.changed().await.is_err() {
                if self.current() == Signal::Run {
                    std::future::pending::<()>().await;
                }
                return;
            }
        }
    }
}
