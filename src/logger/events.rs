//! Activity logger front-end: a bounded channel into a dedicated writer
//! thread so pipeline code never blocks on log IO.
//!
//! Sends are non-blocking; when the channel is full the event is dropped and
//! counted rather than stalling a copy or delete in progress.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::core::config::LoggingConfig;
use crate::logger::jsonl::{EventKind, JsonlWriter, LogEntry, Severity};

const CHANNEL_CAPACITY: usize = 4096;
const IDLE_TICK: Duration = Duration::from_secs(1);
const RECOVER_EVERY_TICKS: u32 = 60;

enum Command {
    Event(Box<LogEntry>),
    Flush,
    Shutdown,
}

/// Cheap cloneable sender into the logger thread. A `null()` handle discards
/// everything, for tests and for contexts without a logger.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Option<Sender<Command>>,
    dropped: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// A handle that discards all events.
    #[must_use]
    pub fn null() -> Self {
        Self {
            tx: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue an entry. Never blocks; a full channel increments the dropped
    /// counter instead.
    pub fn log(&self, entry: LogEntry) {
        if let Some(tx) = &self.tx
            && tx.try_send(Command::Event(Box::new(entry))).is_err()
        {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Shorthand for an event with no extra fields.
    pub fn event(&self, kind: EventKind, severity: Severity) {
        self.log(LogEntry::new(kind, severity));
    }

    /// Ask the writer thread to flush its buffers.
    pub fn flush(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(Command::Flush);
        }
    }

    /// Events dropped because the channel was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Owns the logger thread. Dropping without `shutdown()` detaches the thread;
/// the daemon calls `shutdown()` on exit to fsync the tail of the log.
pub struct ActivityLogger {
    handle: ActivityLoggerHandle,
    tx: Sender<Command>,
    join: Option<JoinHandle<()>>,
}

impl ActivityLogger {
    /// Spawn the writer thread for the given logging configuration.
    #[must_use]
    pub fn spawn(config: LoggingConfig) -> Self {
        let (tx, rx) = bounded::<Command>(CHANNEL_CAPACITY);
        let join = std::thread::Builder::new()
            .name("efms-logger".to_string())
            .spawn(move || writer_loop(&rx, JsonlWriter::open(config)))
            .ok();
        Self {
            handle: ActivityLoggerHandle {
                tx: Some(tx.clone()),
                dropped: Arc::new(AtomicU64::new(0)),
            },
            tx,
            join,
        }
    }

    #[must_use]
    pub fn handle(&self) -> ActivityLoggerHandle {
        self.handle.clone()
    }

    /// Drain and fsync, then stop the writer thread.
    pub fn shutdown(mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn writer_loop(rx: &Receiver<Command>, mut writer: JsonlWriter) {
    let mut ticks_since_recover = 0_u32;
    loop {
        match rx.recv_timeout(IDLE_TICK) {
            Ok(Command::Event(entry)) => writer.write_entry(&entry),
            Ok(Command::Flush) => writer.flush(),
            Ok(Command::Shutdown) => break,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                writer.flush();
                ticks_since_recover += 1;
                if ticks_since_recover >= RECOVER_EVERY_TICKS {
                    writer.try_recover();
                    ticks_since_recover = 0;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }
    writer.fsync();
}
