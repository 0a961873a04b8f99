//! NetLimit: cap inbound and outbound bandwidth through a privileged shaping helper.
//!
//! The [`controller::Controller`] runs in the user's process and drives a
//! separately elevated [`helper`] through a single-slot command file. The
//! helper translates limits into OS traffic-shaping commands produced by a
//! [`backends::shaping::ShapingBackend`].

pub mod ack;
pub mod backends;
pub mod channel;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod helper;
pub mod keybindings;
pub mod limit;
pub mod session;
pub mod ui;

pub use controller::{Controller, Timing};
pub use error::ShapingError;
pub use limit::{Rate, ShapingLimit};
pub use session::{Session, SessionState};
