//! Log capture shared by tests that assert on emitted lines.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// In-memory log sink behind a `fmt` subscriber.
#[derive(Clone, Default)]
pub(crate) struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogCapture {
    pub(crate) fn dispatch(&self) -> tracing::Dispatch {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_target(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::Dispatch::new(subscriber)
    }

    /// Route events from the current thread into this capture.
    pub(crate) fn install(&self) -> tracing::dispatcher::DefaultGuard {
        tracing::dispatcher::set_default(&self.dispatch())
    }

    /// Multi-thread runtime whose workers all log into this capture.
    pub(crate) fn runtime(&self) -> tokio::runtime::Runtime {
        let dispatch = self.dispatch();
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .on_thread_start(move || {
                // worker threads live as long as the runtime
                std::mem::forget(tracing::dispatcher::set_default(&dispatch));
            })
            .build()
            .unwrap()
    }

    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Return everything captured so far and start over.
    pub(crate) fn take(&self) -> String {
        let bytes = std::mem::take(&mut *self.0.lock().unwrap());
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub(crate) fn count(&self, needle: &str) -> usize {
        self.contents().lines().filter(|line| line.contains(needle)).count()
    }
}

/// Values of every `Total connections: <n>` line, in order.
pub(crate) fn total_connection_counts(log: &str) -> Vec<usize> {
    const MARK: &str = "Total connections:";
    log.lines()
        .filter_map(|line| line.split_once(MARK))
        .map(|(_, rest)| rest.trim().parse().unwrap())
        .collect()
}

/// The line ending in "shutting down" and everything after it.
pub(crate) fn lines_from_shutdown(log: &str) -> Vec<&str> {
    log.lines()
        .skip_while(|line| !line.to_lowercase().ends_with("shutting down"))
        .collect()
}
