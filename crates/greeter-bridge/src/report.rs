//! Caller-side reporting hooks.

use crate::dispatch::CallShape;
use core::fmt;

/// Identity of the thread a call was made from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadContext {
    pub name: Option<String>,
    pub id: String,
}

impl ThreadContext {
    pub fn current() -> Self {
        let thread = std::thread::current();
        Self {
            name: thread.name().map(str::to_string),
            id: format!("{:?}", thread.id()),
        }
    }
}

impl fmt::Display for ThreadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Client Thread: {} (ID: {})",
            self.name.as_deref().unwrap_or("<unnamed>"),
            self.id
        )
    }
}

/// Told about every call as it starts, on the caller's thread.
pub trait CallReporter: Send + Sync {
    fn call_started(&self, shape: CallShape, caller: &ThreadContext);
}

/// Logs call starts at `info`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogReporter;

impl CallReporter for LogReporter {
    fn call_started(&self, shape: CallShape, caller: &ThreadContext) {
        tracing::info!(%shape, "{caller}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn current_describes_a_named_thread() {
        let context = thread::Builder::new()
            .name("greeter-worker-3".to_string())
            .spawn(ThreadContext::current)
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(context.name.as_deref(), Some("greeter-worker-3"));
        assert!(context.id.starts_with("ThreadId("));
        assert!(
            context
                .to_string()
                .starts_with("Client Thread: greeter-worker-3 (ID: ThreadId(")
        );
    }

    #[test]
    fn distinct_threads_have_distinct_ids() {
        let here = ThreadContext::current();
        let there = thread::spawn(ThreadContext::current).join().unwrap();
        assert_ne!(here.id, there.id);
    }
}
