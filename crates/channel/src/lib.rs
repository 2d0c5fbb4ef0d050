//! Access channel to an inspected process.
//!
//! # Purpose
//!
//! Everything the engine learns about a target flows through two primitives
//! with very different prices:
//!
//! * [`AccessChannel::evaluate`]: runs an expression inside the stopped
//!   target. Costs tens of milliseconds per call.
//! * [`AccessChannel::read_memory`]: copies bytes out of the target. Costs
//!   well under a millisecond.
//!
//! Expressions are typed ([`Expr`]) and render to runtime expression source
//! through `Display`, so host adapters can hand them to a debugger verbatim
//! while test doubles interpret them structurally.
//!
//! # Aggregates
//!
//! Expressions that produce more than one word return the address of a
//! count-prefixed buffer described in [`layout`]. Decoding such a buffer only
//! ever uses `read_memory`.

mod channel;
mod expr;
pub mod layout;
#[cfg(feature = "sim")]
pub mod sim;

pub use channel::{AccessChannel, ChannelError, EvalOptions, Result, Value};
pub use expr::{Expr, ExprKind};
