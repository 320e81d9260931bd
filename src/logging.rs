//! Logging capability and subscriber setup.
//!
//! Kernel components never reach for a global logger. They receive an
//! `Arc<dyn Logger>` at construction and report through it. The binary wires
//! in [`TracingLogger`], which forwards to `tracing`; tests and library users
//! that want silence pass [`NullLogger`].
//!
//! All log output goes to **stderr** so that stdout remains free for the MCP
//! JSON-RPC stream and for scriptable command output.

use std::sync::Arc;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding an `EnvFilter` directive (e.g. `rulem=debug`).
pub const LOG_ENV_VAR: &str = "RULEM_LOG";

/// Leveled log sink injected into kernel components.
pub trait Logger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards to the `tracing` macros under the `rulem` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "rulem", "{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "rulem", "{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "rulem", "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "rulem", "{}", message);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn debug(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// Shorthand for the logger most callers want.
pub fn tracing_logger() -> Arc<dyn Logger> {
    Arc::new(TracingLogger)
}

pub fn null_logger() -> Arc<dyn Logger> {
    Arc::new(NullLogger)
}

/// Install the global `tracing` subscriber for the binary.
///
/// `RULEM_LOG` takes precedence; otherwise `verbose` selects `rulem=debug`
/// over the default `rulem=warn`.
pub fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let default_directive = if verbose { "rulem=debug" } else { "rulem=warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| anyhow::anyhow!("invalid log filter: {}", e))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {}", e))?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Logger;
    use std::sync::Mutex;

    /// Captures messages so tests can assert on warnings.
    #[derive(Default)]
    pub struct MemoryLogger {
        pub entries: Mutex<Vec<(&'static str, String)>>,
    }

    impl MemoryLogger {
        pub fn messages(&self, level: &str) -> Vec<String> {
            self.entries
                .lock()
                .unwrap()
                .iter()
                .filter(|(l, _)| *l == level)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    impl Logger for MemoryLogger {
        fn debug(&self, message: &str) {
            self.entries.lock().unwrap().push(("debug", message.to_string()));
        }
        fn info(&self, message: &str) {
            self.entries.lock().unwrap().push(("info", message.to_string()));
        }
        fn warn(&self, message: &str) {
            self.entries.lock().unwrap().push(("warn", message.to_string()));
        }
        fn error(&self, message: &str) {
            self.entries.lock().unwrap().push(("error", message.to_string()));
        }
    }
}
