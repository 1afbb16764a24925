//! `kevinbot-kernel` – safety and ordering
//!
//! The bridge's brainstem.  It does no I/O of its own; it owns the runtime
//! record, decides what a request is allowed to do, and orders the side
//! effects that follow.
//!
//! # Modules
//!
//! - [`state`] – [`StateManager`]: lock-guarded [`RuntimeState`].
//! - [`command_queue`] – [`CommandQueue`]: FIFO, one-at-a-time execution
//!   of queued side effects on a dedicated thread.
//! - [`safety`] – enable / disable / fault decisions.
//! - [`battery`] – low-voltage warning debounce.
//! - [`roster`] – chunking and reassembly of the remote roster.
//! - [`watchdog`] – [`LinkWatchdog`]: detects silent links.

pub mod battery;
pub mod command_queue;
pub mod roster;
pub mod safety;
pub mod state;
pub mod watchdog;

pub use battery::{BatteryAlert, BatteryPolicy, LowCell};
pub use command_queue::{CommandQueue, ExecutorHandle, QueueStats, QueuedCommand};
pub use roster::RosterAssembler;
pub use safety::{EnableDecision, EnableState, decide_enable};
pub use state::{RuntimeState, StateManager};
pub use watchdog::{LinkHealth, LinkWatchdog};
