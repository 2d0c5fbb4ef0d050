use std::time::Duration;

use objscope_primitives::ProcessIdentity;

use crate::expr::Expr;

/// Result alias for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Failures reported by a host debugger.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
	/// The inspected process is running; evaluation and reads need it quiesced.
	#[error("target process is not stopped")]
	TargetNotStopped,
	/// No process is attached.
	#[error("no inspected process")]
	NoProcess,
	/// A read touched unmapped target memory.
	#[error("invalid address 0x{address:x} (+{len})")]
	InvalidAddress { address: u64, len: usize },
	/// An evaluation did not finish within its budget.
	#[error("evaluation timed out after {after:?}")]
	Timeout { after: Duration },
	/// The host reported an evaluation error (compile failure, crash in target, ...).
	#[error("evaluation failed: {0}")]
	Evaluation(String),
	/// The result did not have the expected shape.
	#[error("unexpected result value: {0}")]
	UnexpectedValue(String),
}

impl ChannelError {
	/// Per-entity or per-window failures that callers degrade around instead of aborting.
	pub fn is_recoverable(&self) -> bool {
		matches!(self, ChannelError::InvalidAddress { .. } | ChannelError::Timeout { .. })
	}
}

/// Per-call evaluation settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalOptions {
	/// Abort the evaluation after this long; `None` leaves it to the host.
	pub timeout: Option<Duration>,
}

impl EvalOptions {
	pub fn with_timeout(timeout: Duration) -> Self {
		Self { timeout: Some(timeout) }
	}
}

/// Value produced by an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
	/// A single machine word (pointer, integer, boolean).
	Scalar(u64),
	/// Address of a count-prefixed aggregate buffer (see [`crate::layout`]).
	Aggregate(u64),
}

impl Value {
	/// Returns the aggregate buffer address, rejecting scalars and nil.
	pub fn aggregate_address(self) -> Result<u64> {
		match self {
			Value::Aggregate(0) => Err(ChannelError::UnexpectedValue("nil aggregate".into())),
			Value::Aggregate(addr) => Ok(addr),
			Value::Scalar(v) => Err(ChannelError::UnexpectedValue(format!(
				"expected aggregate, got scalar 0x{v:x}"
			))),
		}
	}
}

/// The two primitives the engine is built on, plus process state queries.
///
/// Implementations must be read-only with respect to the target's own
/// program state; scratch allocations made by evaluated expressions are the
/// only permitted side effect.
pub trait AccessChannel: Send + Sync {
	/// Identity of the currently inspected process, if any.
	fn identity(&self) -> Option<ProcessIdentity>;

	/// Whether the inspected process is stopped.
	fn is_stopped(&self) -> bool;

	/// Evaluates `expr` in the stopped target. Expensive.
	fn evaluate(&self, expr: &Expr, options: EvalOptions) -> Result<Value>;

	/// Copies `len` bytes of target memory starting at `address`. Cheap.
	fn read_memory(&self, address: u64, len: usize) -> Result<Vec<u8>>;
}

impl<T: AccessChannel + ?Sized> AccessChannel for std::sync::Arc<T> {
	fn identity(&self) -> Option<ProcessIdentity> {
		(**self).identity()
	}

	fn is_stopped(&self) -> bool {
		(**self).is_stopped()
	}

	fn evaluate(&self, expr: &Expr, options: EvalOptions) -> Result<Value> {
		(**self).evaluate(expr, options)
	}

	fn read_memory(&self, address: u64, len: usize) -> Result<Vec<u8>> {
		(**self).read_memory(address, len)
	}
}
