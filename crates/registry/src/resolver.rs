//! Windowed entity resolution.
//!
//! Handles are resolved `batch_size` at a time: one expensive evaluate per
//! window builds all of the window's records in the target, and the records
//! are then decoded with cheap memory reads. Cancellation is honoured between
//! windows only.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::time::Duration;

use objscope_channel::layout::{
	ENTITY_RECORD_SIZE, EntityRecord, STRING_REF_SIZE, StringRef, read_aggregate, read_array, read_string,
};
use objscope_channel::{AccessChannel, ChannelError, EvalOptions, Expr};
use objscope_primitives::EntityHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::generation::Entity;

/// Outcome of resolving a set of handles.
#[derive(Debug, Default)]
pub struct Resolution {
	pub entities: Vec<Entity>,
	pub unresolved: Vec<EntityHandle>,
	pub windows: usize,
	pub timed_out_windows: usize,
}

/// Decodes one record into an entity.
///
/// Returns `Ok(None)` for records the target flagged as unresolved.
/// Unreadable protocol names are skipped; an unreadable entity name fails
/// the record.
pub fn decode_entity<C>(channel: &C, record: &EntityRecord) -> std::result::Result<Option<Entity>, ChannelError>
where
	C: AccessChannel + ?Sized,
{
	let Some(handle) = EntityHandle::new(record.handle).filter(|_| record.is_resolved()) else {
		return Ok(None);
	};
	let name = read_string(channel, record.name)?;
	if name.is_empty() {
		return Ok(None);
	}

	let mut protocols = BTreeSet::new();
	if record.protocols != 0 && record.protocol_count > 0 {
		let refs = read_array(channel, record.protocols, record.protocol_count as usize, STRING_REF_SIZE)?;
		for chunk in refs.chunks_exact(STRING_REF_SIZE) {
			match read_string(channel, StringRef::decode(chunk)) {
				Ok(protocol) if !protocol.is_empty() => {
					protocols.insert(protocol);
				}
				Ok(_) => {}
				Err(err) if err.is_recoverable() => {
					tracing::debug!(%handle, error = %err, "skipping unreadable protocol name");
				}
				Err(err) => return Err(err),
			}
		}
	}

	Ok(Some(Entity::new(
		handle,
		name,
		record.is_metaclass(),
		EntityHandle::new(record.superclass),
		protocols,
	)))
}

/// Resolves `handles` in windows of `batch_size`.
///
/// Issues exactly `ceil(handles.len() / batch_size)` evaluates unless
/// cancelled. A window whose evaluate times out or fails marks all of its
/// handles unresolved; an entity whose record cannot be read is skipped.
/// Only precondition failures and cancellation abort the pass.
pub fn resolve_windows<C>(
	channel: &C,
	handles: &[EntityHandle],
	batch_size: NonZeroUsize,
	timeout: Duration,
	cancel: Option<&CancellationToken>,
) -> Result<Resolution>
where
	C: AccessChannel + ?Sized,
{
	let mut resolution = Resolution::default();
	resolution.entities.reserve(handles.len());

	for (index, window) in handles.chunks(batch_size.get()).enumerate() {
		if cancel.is_some_and(CancellationToken::is_cancelled) {
			tracing::debug!(window = index, resolved = resolution.entities.len(), "resolution cancelled");
			return Err(EngineError::Cancelled);
		}

		resolution.windows += 1;
		let expr = Expr::ResolveWindow {
			handles: window.to_vec(),
		};
		let records = channel
			.evaluate(&expr, EvalOptions::with_timeout(timeout))
			.and_then(|value| read_aggregate(channel, value, ENTITY_RECORD_SIZE));

		let (count, bytes) = match records {
			Ok(records) => records,
			Err(err @ (ChannelError::TargetNotStopped | ChannelError::NoProcess)) => return Err(err.into()),
			Err(err) => {
				if matches!(err, ChannelError::Timeout { .. }) {
					resolution.timed_out_windows += 1;
				}
				tracing::warn!(window = index, handles = window.len(), error = %err, "window unresolved");
				resolution.unresolved.extend_from_slice(window);
				continue;
			}
		};

		let mut seen = 0;
		for chunk in bytes.chunks_exact(ENTITY_RECORD_SIZE).take(count) {
			let record = EntityRecord::decode(chunk);
			seen += 1;
			match decode_entity(channel, &record) {
				Ok(Some(entity)) => resolution.entities.push(entity),
				Ok(None) => {
					tracing::trace!(handle = record.handle, "not a class");
					resolution.unresolved.extend(EntityHandle::new(record.handle));
				}
				Err(err @ (ChannelError::TargetNotStopped | ChannelError::NoProcess)) => return Err(err.into()),
				Err(err) => {
					tracing::debug!(handle = record.handle, error = %err, "skipping unreadable entity");
					resolution.unresolved.extend(EntityHandle::new(record.handle));
				}
			}
		}
		// Records the target did not return for this window.
		resolution.unresolved.extend_from_slice(&window[seen.min(window.len())..]);
		tracing::trace!(window = index, records = count, "resolved window");
	}

	Ok(resolution)
}
