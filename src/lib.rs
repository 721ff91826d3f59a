//! beaminit - PID 1 supervisor for a BEAM runtime
//!
//! Boots a minimal system, launches exactly one runtime process and
//! supervises it. When the runtime exits, or a halt/reboot/poweroff is
//! requested, the system is torn down and the kernel told what to do.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                    beaminit                      │
//! ├─────────────────────────────────────────────────┤
//! │  Options  │  Release discovery  │  Hostname/TTY  │
//! ├─────────────────────────────────────────────────┤
//! │  Signal gate → Supervisor → Graceful → Teardown │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod console;
pub mod hostname;
pub mod logging;
pub mod options;
pub mod pid1;
pub mod release;
pub mod report;

pub use options::Config;
