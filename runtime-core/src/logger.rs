//! A channeled logger: every call site gets a `Logger` tagged with its own
//! channel name, and every emission goes to two places at once —
//! `tracing` (for operators watching stdout/structured logs) and a
//! process-wide listener registry (for an embedding devtools inspector that
//! wants to subscribe programmatically without standing up a
//! `tracing_subscriber::Layer`). Neither surface is redundant with the
//! other; `tracing`'s own subscriber is a separate, independent concern
//! from these in-process listeners.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Severity of a single log emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Debug,
    Log,
    Warn,
    Error,
}

/// One emitted log event, as delivered to registered listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub level: Level,
    pub channel: String,
    pub message: String,
    pub args: serde_json::Value,
    pub timestamp: u64,
}

type Listener = Box<dyn Fn(&LogEvent) + Send + 'static>;

struct GlobalLoggerState {
    min_level: Level,
    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
}

impl Default for GlobalLoggerState {
    fn default() -> Self {
        GlobalLoggerState {
            min_level: Level::Debug,
            listeners: Vec::new(),
            next_listener_id: 0,
        }
    }
}

fn global_state() -> &'static Mutex<GlobalLoggerState> {
    static STATE: OnceLock<Mutex<GlobalLoggerState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(GlobalLoggerState::default()))
}

/// Sets the process-wide minimum level; events below it are still sent to
/// `tracing` but skip the listener registry.
pub fn set_global_level(level: Level) {
    global_state().lock().expect("logger state poisoned").min_level = level;
}

/// Registers a process-wide listener, returning a handle for
/// [`remove_listener`].
pub fn add_listener<F>(listener: F) -> u64
where
    F: Fn(&LogEvent) + Send + 'static,
{
    let mut state = global_state().lock().expect("logger state poisoned");
    let id = state.next_listener_id;
    state.next_listener_id += 1;
    state.listeners.push((id, Box::new(listener)));
    id
}

/// Removes a previously registered listener.
pub fn remove_listener(id: u64) {
    let mut state = global_state().lock().expect("logger state poisoned");
    state.listeners.retain(|(listener_id, _)| *listener_id != id);
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A logger bound to one channel name (typically the module or subsystem
/// emitting through it, e.g. `"runtime"` or `"lobby"`).
#[derive(Debug, Clone)]
pub struct Logger {
    channel: String,
}

impl Logger {
    pub fn new(channel: impl Into<String>) -> Self {
        Logger {
            channel: channel.into(),
        }
    }

    pub fn debug(&self, message: &str, args: serde_json::Value) {
        tracing::debug!(channel = %self.channel, %message, ?args);
        self.emit(Level::Debug, message, args);
    }

    pub fn log(&self, message: &str, args: serde_json::Value) {
        tracing::info!(channel = %self.channel, %message, ?args);
        self.emit(Level::Log, message, args);
    }

    pub fn warn(&self, message: &str, args: serde_json::Value) {
        tracing::warn!(channel = %self.channel, %message, ?args);
        self.emit(Level::Warn, message, args);
    }

    pub fn error(&self, message: &str, args: serde_json::Value) {
        tracing::error!(channel = %self.channel, %message, ?args);
        self.emit(Level::Error, message, args);
    }

    fn emit(&self, level: Level, message: &str, args: serde_json::Value) {
        let state = global_state().lock().expect("logger state poisoned");
        if level < state.min_level || state.listeners.is_empty() {
            return;
        }
        let event = LogEvent {
            level,
            channel: self.channel.clone(),
            message: message.to_string(),
            args,
            timestamp: now_ms(),
        };
        for (_, listener) in &state.listeners {
            listener(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn listener_receives_emitted_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let id = add_listener(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let logger = Logger::new("test-channel");
        logger.warn("something happened", serde_json::json!({"x": 1}));

        remove_listener(id);
        assert!(count.load(Ordering::SeqCst) >= 1);
    }
}
