//! # Events Module
//!
//! Progress reporting as a passive observer.
//!
//! The engine publishes scan, per-file and run-level events; renderers
//! drain them on their own thread. Nothing on the receiving side feeds
//! back into a pipeline decision, and a run with nobody listening behaves
//! exactly like one with a progress bar attached.
//!
//! ```rust,ignore
//! let (sender, receiver) = EventChannel::new();
//! let watcher = std::thread::spawn(move || {
//!     receiver
//!         .results()
//!         .filter(|r| r.state == TerminalState::Failed)
//!         .count()
//! });
//! let report = sanitizer.run_with_events(&sender)?;
//! drop(sender);
//! assert_eq!(watcher.join().unwrap(), report.failures.len());
//! ```

mod channel;
mod types;

pub use channel::{null_sender, EventChannel, EventReceiver, EventSender};
pub use types::*;
