use objscope_primitives::{EntityHandle, EntityView};
use rustc_hash::FxHashSet as HashSet;

use crate::error::{EngineError, Result};

/// Follows superclass keys from `start` to a root.
///
/// Returns the chain ordered from `start` to the root, inclusive. The walk is
/// stateless: `parent_of` looks each superclass up in whatever source the
/// caller has (a generation, or the target one handle at a time). A
/// superclass `parent_of` cannot resolve truncates the chain.
///
/// Revisiting an entity, or taking more than `max_steps` superclass steps,
/// is reported as [`EngineError::CycleDetected`].
pub fn walk<F>(start: EntityView, mut parent_of: F, max_steps: usize) -> Result<Vec<EntityView>>
where
	F: FnMut(EntityHandle) -> Result<Option<EntityView>>,
{
	let origin = start.handle;
	let mut visited = HashSet::default();
	visited.insert(origin);
	let mut chain = vec![start];
	let mut steps = 0;

	while let Some(parent) = chain.last().and_then(|view| view.superclass) {
		steps += 1;
		if steps > max_steps || !visited.insert(parent) {
			tracing::warn!(start = %origin, at = %parent, steps, "superclass cycle");
			return Err(EngineError::CycleDetected {
				start: origin,
				at: parent,
				steps,
			});
		}
		match parent_of(parent)? {
			Some(view) => chain.push(view),
			None => {
				tracing::warn!(start = %origin, missing = %parent, "superclass unresolvable, truncating chain");
				break;
			}
		}
	}

	Ok(chain)
}
