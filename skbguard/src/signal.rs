//! Termination signalling.
//!
//! The wait is a blocking channel receive satisfied by an external
//! event; nothing polls and no global flag is shared with the handler.

use std::sync::mpsc::{self, Receiver, Sender};

use crate::error::LoaderError;
use crate::Result;

/// Wakes a [`ShutdownSignal`]. May be fired from any thread; only the
/// first trigger is observed.
pub struct ShutdownTrigger {
    tx: Sender<()>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

/// A one-shot termination event.
pub struct ShutdownSignal {
    rx: Receiver<()>,
}

impl ShutdownSignal {
    /// Installs a SIGINT/SIGTERM handler wired to the returned signal.
    pub fn install() -> Result<Self> {
        let (trigger, signal) = Self::manual();
        ctrlc::set_handler(move || trigger.trigger())
            .map_err(|err| LoaderError::Signal(err.to_string()))?;
        Ok(signal)
    }

    /// An explicit trigger/signal pair, for callers that terminate the
    /// run themselves (tests, embedders).
    pub fn manual() -> (ShutdownTrigger, Self) {
        let (tx, rx) = mpsc::channel();
        (ShutdownTrigger { tx }, Self { rx })
    }

    /// Blocks until the signal fires. Also returns if every trigger has
    /// been dropped unfired, so a wait can never hang forever.
    pub fn wait(&self) {
        let _ = self.rx.recv();
    }
}
