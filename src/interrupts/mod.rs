//! Trap dispatch for both privilege levels.
//!
//! Machine mode only re-arms the timer and reports faults; everything that
//! touches processes happens in the supervisor handler.

pub mod cause;
pub mod mtrap;
pub mod strap;

pub use cause::{MachineTrap, SupervisorTrap};
pub use mtrap::MachineTrapHandler;
pub use strap::handle_strap;
