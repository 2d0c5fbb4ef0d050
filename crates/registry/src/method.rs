use std::time::Duration;

use objscope_channel::layout::{METHOD_IMP_SIZE, MethodImpRecord, read_aggregate};
use objscope_channel::{AccessChannel, EvalOptions, Expr};
use objscope_primitives::{EntityHandle, MethodSignature};

use crate::error::{EngineError, Result};

/// Where a method signature resolves to in the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodTarget {
	pub signature: MethodSignature,
	pub class: EntityHandle,
	/// Class searched for the implementation: the metaclass for `+` methods.
	pub lookup_class: EntityHandle,
	/// Registered selector address.
	pub selector: u64,
	/// Implementation address, possibly inherited from a superclass.
	pub imp: u64,
}

/// Resolves `signature` to its implementation with one evaluate.
///
/// Each lookup step that comes back nil maps to its own error, in lookup
/// order: class, selector, implementation.
pub fn resolve_method<C>(channel: &C, signature: &MethodSignature, timeout: Duration) -> Result<MethodTarget>
where
	C: AccessChannel + ?Sized,
{
	let expr = Expr::MethodImplementation {
		class_name: signature.class_name.clone(),
		selector: signature.selector.clone(),
		class_method: signature.is_class_method(),
	};
	let value = channel.evaluate(&expr, EvalOptions::with_timeout(timeout))?;
	let (count, bytes) = read_aggregate(channel, value, METHOD_IMP_SIZE)?;
	let record = if count == 0 || bytes.len() < METHOD_IMP_SIZE {
		MethodImpRecord::default()
	} else {
		MethodImpRecord::decode(&bytes[..METHOD_IMP_SIZE])
	};

	let Some(class) = EntityHandle::new(record.class) else {
		return Err(EngineError::ClassNotFound(signature.class_name.clone()));
	};
	if record.selector == 0 {
		return Err(EngineError::SelectorNotFound(signature.selector.clone()));
	}
	let lookup_class = EntityHandle::new(record.lookup_class).unwrap_or(class);
	if record.imp == 0 {
		return Err(EngineError::ImplementationNotFound(signature.to_string()));
	}

	tracing::debug!(%signature, %class, imp = record.imp, "resolved method");
	Ok(MethodTarget {
		signature: signature.clone(),
		class,
		lookup_class,
		selector: record.selector,
		imp: record.imp,
	})
}

#[cfg(test)]
mod tests {
	use objscope_channel::sim::{SimRuntime, SimTarget};
	use pretty_assertions::assert_eq;

	use super::*;

	fn resolve(target: &SimTarget, signature: &str) -> Result<MethodTarget> {
		resolve_method(target, &signature.parse::<MethodSignature>()?, Duration::from_secs(1))
	}

	#[test]
	fn instance_method_resolves_on_class() {
		let target = SimTarget::new(SimRuntime::foundation(), 1);
		let resolved = resolve(&target, "-[NSString length]").unwrap();
		assert_eq!(Some(resolved.class.addr()), target.handle_of("NSString"));
		assert_eq!(resolved.lookup_class, resolved.class);
		assert_ne!(resolved.imp, 0);
	}

	#[test]
	fn class_method_uses_metaclass() {
		let target = SimTarget::new(SimRuntime::foundation(), 1);
		let resolved = resolve(&target, "+[NSString stringWithFormat:]").unwrap();
		assert_eq!(Some(resolved.lookup_class.addr()), target.metaclass_of("NSString"));
	}

	#[test]
	fn inherited_implementation_is_found() {
		let target = SimTarget::new(SimRuntime::foundation(), 1);
		let inherited = resolve(&target, "-[NSMutableString length]").unwrap();
		let declared = resolve(&target, "-[NSString length]").unwrap();
		assert_eq!(inherited.imp, declared.imp);
	}

	#[test]
	fn each_failing_step_has_its_own_error() {
		let target = SimTarget::new(SimRuntime::foundation(), 1);
		assert_eq!(
			resolve(&target, "-[NSNothing length]").unwrap_err(),
			EngineError::ClassNotFound("NSNothing".into())
		);
		assert_eq!(
			resolve(&target, "-[NSString noSuchSelector]").unwrap_err(),
			EngineError::SelectorNotFound("noSuchSelector".into())
		);
		// Registered selector, but NSDate does not implement it.
		assert_eq!(
			resolve(&target, "-[NSDate appendString:]").unwrap_err(),
			EngineError::ImplementationNotFound("-[NSDate appendString:]".into())
		);
	}

	#[test]
	fn malformed_signature_is_rejected() {
		let target = SimTarget::new(SimRuntime::foundation(), 1);
		assert!(matches!(resolve(&target, "NSString length"), Err(EngineError::Signature(_))));
		assert_eq!(target.total_evaluations(), 0);
	}
}
