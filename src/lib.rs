//! Background engine for per-site daily time limits, shipped as a browser
//! native messaging host. The extension shell forwards tab-lifecycle events
//! over stdin; the engine accrues foreground time against tracked sites,
//! persists usage, and answers with block and warning decisions over stdout.
//!

pub mod engine;
pub mod host;
pub mod utils;
