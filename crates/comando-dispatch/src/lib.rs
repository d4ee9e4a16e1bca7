//! # comando-dispatch
//!
//! The notification dispatch loop for Comando Central:
//!
//! - [`process::EventProcessor`] turns pending inbox events into
//!   notification rows against the tenant's active rules.
//! - [`deliver::NotificationRunner`] attempts delivery of due
//!   notifications with bounded retries.
//! - [`tick::TickRunner`] orchestrates both stages across bounded passes.
//! - [`replay::ReplayRunner`] is the manual recovery lever for stuck or
//!   failed work.

pub mod deliver;
pub mod process;
pub mod replay;
pub mod stages;
pub mod tick;

#[cfg(test)]
pub(crate) mod testing;

pub use deliver::{HttpDeliveryTransport, NotificationRunner};
pub use process::EventProcessor;
pub use replay::{clamp_window_days, ensure_replay_allowed, plan_replay, ReplayAction, ReplayRunner};
pub use stages::LocalStages;
pub use tick::{TickConfig, TickRunner};
