//! Outbound notifications. Nothing in the probe path posts here; the binary
//! exposes it through the `notify` subcommand.

pub mod slack;

pub use slack::{NotifyError, SlackClient};
