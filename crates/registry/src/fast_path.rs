use std::time::Duration;

use objscope_channel::layout::{ENTITY_RECORD_SIZE, EntityRecord, read_aggregate};
use objscope_channel::{AccessChannel, ChannelError, EvalOptions, Expr};

use crate::generation::Entity;

/// Resolves one class by exact name with a single evaluate.
///
/// `Ok(None)` means the runtime has no class of that name.
pub fn resolve_named<C>(channel: &C, name: &str, timeout: Duration) -> Result<Option<Entity>, ChannelError>
where
	C: AccessChannel + ?Sized,
{
	let value = channel.evaluate(
		&Expr::ResolveNamed { name: name.to_owned() },
		EvalOptions::with_timeout(timeout),
	)?;
	let (count, bytes) = read_aggregate(channel, value, ENTITY_RECORD_SIZE)?;
	if count == 0 || bytes.len() < ENTITY_RECORD_SIZE {
		return Ok(None);
	}
	let entity = crate::resolver::decode_entity(channel, &EntityRecord::decode(&bytes[..ENTITY_RECORD_SIZE]))?;
	// The runtime is case-sensitive, a host bridge may not be.
	Ok(entity.filter(|e| e.name == name))
}
