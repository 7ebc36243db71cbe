//! Interrupt handling for interrupt-driven teardown
//!
//! An [`Interrupt`] is a one-shot, cloneable flag. The first trigger wins;
//! later triggers are ignored rather than queued, so a second Ctrl+C while
//! tearing down cannot start a second teardown.
//!
//! Listening and arming are separate. An OS-backed interrupt listens from
//! before setup, so a Ctrl+C while processes are still starting also ends
//! in teardown; the handler is only armed once both are running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct Interrupt {
    inner: Arc<Inner>,
}

struct Inner {
    fired: watch::Sender<bool>,
    armed: AtomicBool,
    listening: AtomicBool,
    os_signals: bool,
}

impl Interrupt {
    /// Interrupt fed only by [`Interrupt::trigger`]
    pub fn manual() -> Self {
        Self::with_os_signals(false)
    }

    /// Interrupt that, once listening, is also triggered by SIGINT / SIGTERM
    pub fn from_os_signals() -> Self {
        Self::with_os_signals(true)
    }

    fn with_os_signals(os_signals: bool) -> Self {
        let (fired, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                fired,
                armed: AtomicBool::new(false),
                listening: AtomicBool::new(false),
                os_signals,
            }),
        }
    }

    /// Fire the interrupt. Returns `true` only for the first call.
    pub fn trigger(&self) -> bool {
        let first = self.inner.fired.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        });
        if first {
            info!("Interrupt received, tearing down");
        } else {
            warn!("Interrupt ignored: teardown already in progress");
        }
        first
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.fired.borrow()
    }

    /// Resolves once the interrupt has fired
    pub async fn triggered(&self) {
        let mut fired = self.inner.fired.subscribe();
        // The sender lives in `self`, so the channel cannot close under us
        let _ = fired.wait_for(|fired| *fired).await;
    }

    /// Install the SIGINT / SIGTERM handlers for OS-backed interrupts.
    /// Later calls, and calls on manual interrupts, do nothing. Must run
    /// inside a tokio runtime.
    pub fn listen(&self) {
        if !self.inner.os_signals || self.inner.listening.swap(true, Ordering::SeqCst) {
            return;
        }
        listen_for_signals(self.clone());
    }

    pub fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::SeqCst)
    }

    /// Mark the handler armed, listening first if that has not happened
    /// yet. Only the first call has any effect; it returns `true`.
    pub fn arm(&self) -> bool {
        if self.inner.armed.swap(true, Ordering::SeqCst) {
            debug!("Interrupt handler already armed");
            return false;
        }
        self.listen();
        true
    }

    pub fn is_armed(&self) -> bool {
        self.inner.armed.load(Ordering::SeqCst)
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::manual()
    }
}

#[cfg(unix)]
fn listen_for_signals(interrupt: Interrupt) {
    use tokio::signal::unix::{signal, SignalKind};

    // Register synchronously so a signal right after arming is not missed
    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(int), Ok(term)) => (int, term),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "Failed to install signal handlers");
            return;
        }
    };

    tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                received = sigint.recv() => match received {
                    Some(()) => "SIGINT",
                    None => break,
                },
                received = sigterm.recv() => match received {
                    Some(()) => "SIGTERM",
                    None => break,
                },
            };
            debug!(signal = name, "Signal received");
            interrupt.trigger();
        }
    });
}

#[cfg(not(unix))]
fn listen_for_signals(interrupt: Interrupt) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                break;
            }
            interrupt.trigger();
        }
    });
}
