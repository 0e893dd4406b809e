use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Runs a callback on its own thread every `period` until stopped or dropped.
///
/// The first run happens immediately. The callback receives the tick number (starting
/// at 1) and returns `false` to end the loop early.
pub struct Ticker {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn start<F>(name: &str, period: Duration, mut tick: F) -> std::io::Result<Ticker>
    where
        F: FnMut(u64) -> bool + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name(format!("ticker-{}", name))
            .spawn(move || {
                let mut n: u64 = 0;
                loop {
                    n += 1;
                    if !tick(n) {
                        break;
                    }
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        // Explicit stop, or the owner went away.
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;
        Ok(Ticker {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Signals the thread and waits for the in-flight tick to finish.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("ticker thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}
