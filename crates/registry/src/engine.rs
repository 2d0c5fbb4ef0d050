//! Lookup orchestration.
//!
//! # Role
//!
//! [`Engine`] is the entry point callers use. It maps the live process to its
//! session, decides between the cached generation, the single-name fast path
//! and a full enumeration, and runs the downstream queries (members,
//! hierarchy, protocols, method resolution) against the result.
//!
//! # Invariants
//!
//! * Every operation that touches the target checks for a live, stopped
//!   process before issuing any evaluate.
//! * An exact-name lookup against a populated cache issues no evaluate; a
//!   cache miss issues exactly one.
//! * A full enumeration issues one class-list evaluate plus one resolution
//!   evaluate per window, and publishes its generation atomically or not
//!   at all.
//! * Results are owned [`EntityView`]s ordered by name and stay valid across
//!   later reloads, clears and detaches.
//!
//! # Failure modes
//!
//! * Precondition failures surface as [`EngineError::TargetNotStopped`] or
//!   [`EngineError::NoProcess`].
//! * Unresolvable entities and timed-out windows are recorded in the
//!   [`EnumerationReport`] and never fail a lookup.
//! * Cancellation between windows returns [`EngineError::Cancelled`] and
//!   keeps the previous generation.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use objscope_channel::layout::read_aggregate;
use objscope_channel::{AccessChannel, ChannelError, EvalOptions, Expr};
use objscope_matcher::{MatchMode, Pattern, compile_with};
use objscope_primitives::{EntityHandle, EntityView, Members, MethodSignature, ProcessIdentity};
use rustc_hash::FxHashSet as HashSet;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::fast_path::resolve_named;
use crate::generation::{EnumerationReport, Generation, Matches};
use crate::hierarchy::walk;
use crate::members::{fetch_members, filter_members};
use crate::method::{MethodTarget, resolve_method};
use crate::resolver::resolve_windows;
use crate::session::Session;
use crate::table::SessionTable;

/// Per-call lookup flags.
#[derive(Debug, Clone, Default)]
pub struct LookupOptions {
	/// Re-enumerate even if a generation is published.
	pub reload: bool,
	/// Drop the published generation and return no results.
	pub clear_cache: bool,
	/// Window size for an enumeration this call starts.
	pub batch_size: Option<NonZeroUsize>,
	pub mode: MatchMode,
	/// Checked between windows of an enumeration this call leads.
	pub cancel: Option<CancellationToken>,
}

impl LookupOptions {
	pub fn reload(mut self) -> Self {
		self.reload = true;
		self
	}

	pub fn clear_cache(mut self) -> Self {
		self.clear_cache = true;
		self
	}

	pub fn with_batch_size(mut self, batch_size: NonZeroUsize) -> Self {
		self.batch_size = Some(batch_size);
		self
	}

	pub fn with_mode(mut self, mode: MatchMode) -> Self {
		self.mode = mode;
		self
	}

	pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
		self.cancel = Some(cancel);
		self
	}
}

/// Introspection engine over one access channel.
#[derive(Debug)]
pub struct Engine<C> {
	channel: C,
	sessions: SessionTable,
	config: EngineConfig,
}

impl<C: AccessChannel> Engine<C> {
	pub fn new(channel: C) -> Self {
		Self::with_config(channel, EngineConfig::default())
	}

	pub fn with_config(channel: C, config: EngineConfig) -> Self {
		Self {
			channel,
			sessions: SessionTable::new(),
			config,
		}
	}

	pub fn channel(&self) -> &C {
		&self.channel
	}

	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	pub fn sessions(&self) -> &SessionTable {
		&self.sessions
	}

	/// Session of the live, stopped process.
	fn session(&self) -> Result<Arc<Session>> {
		let identity = self.channel.identity().ok_or(EngineError::NoProcess)?;
		if !self.channel.is_stopped() {
			return Err(EngineError::TargetNotStopped);
		}
		Ok(self.sessions.get_or_create(identity))
	}

	/// Entities whose name matches `spec`, ordered by name.
	///
	/// An empty result means nothing matched. With `clear_cache` set the call
	/// only drops the cached generation and returns nothing.
	pub fn lookup(&self, spec: &str, options: &LookupOptions) -> Result<Vec<EntityView>> {
		let session = self.session()?;
		if options.clear_cache {
			session.clear();
			return Ok(Vec::new());
		}
		let pattern = Pattern::compile(spec, options.mode);

		let views = if options.reload {
			self.enumerate(&session, options)?
				.matching(&pattern, self.config.match_threads)
		} else if let Some(name) = pattern.as_exact() {
			self.lookup_exact(&session, name, options)?
		} else {
			self.current_or_enumerate(&session, options)?
				.matching(&pattern, self.config.match_threads)
		};

		tracing::debug!(identity = %session.identity(), %pattern, results = views.len(), "lookup");
		Ok(views)
	}

	fn lookup_exact(&self, session: &Session, name: &str, options: &LookupOptions) -> Result<Vec<EntityView>> {
		let current = session.current();
		if let Some(generation) = &current
			&& let Some(entity) = generation.get_by_name(name)
		{
			return Ok(vec![generation.view_of(entity)]);
		}

		match resolve_named(&self.channel, name, self.config.eval_timeout()) {
			Ok(Some(entity)) => {
				let superclass_name = entity
					.superclass
					.zip(current.as_deref())
					.and_then(|(handle, generation)| generation.name_of(handle))
					.map(str::to_owned);
				Ok(vec![entity.view(superclass_name)])
			}
			Ok(None) => Ok(Vec::new()),
			Err(err @ (ChannelError::TargetNotStopped | ChannelError::NoProcess)) => Err(err.into()),
			// One full pass answers, warm cache or cold.
			Err(err) => {
				tracing::warn!(name, error = %err, cached = current.is_some(), "direct lookup failed, enumerating");
				let generation = self.enumerate(session, options)?;
				Ok(generation.get_by_name(name).map(|e| generation.view_of(e)).into_iter().collect())
			}
		}
	}

	fn current_or_enumerate(&self, session: &Session, options: &LookupOptions) -> Result<Arc<Generation>> {
		let batch_size = options.batch_size.unwrap_or(self.config.batch_size);
		session.ensure(|number| self.build(session.identity(), number, batch_size, options.cancel.as_ref()))
	}

	fn enumerate(&self, session: &Session, options: &LookupOptions) -> Result<Arc<Generation>> {
		let batch_size = options.batch_size.unwrap_or(self.config.batch_size);
		session.enumerate(|number| self.build(session.identity(), number, batch_size, options.cancel.as_ref()))
	}

	fn build(
		&self,
		identity: ProcessIdentity,
		number: u64,
		batch_size: NonZeroUsize,
		cancel: Option<&CancellationToken>,
	) -> Result<Generation> {
		let span = tracing::info_span!("enumerate", %identity, generation = number, batch_size = batch_size.get());
		let _enter = span.enter();
		let started = Instant::now();

		if cancel.is_some_and(CancellationToken::is_cancelled) {
			return Err(EngineError::Cancelled);
		}

		let enumeration_error = |err: ChannelError| match err {
			ChannelError::TargetNotStopped | ChannelError::NoProcess => EngineError::from(err),
			other => EngineError::Enumeration(other),
		};
		let value = self
			.channel
			.evaluate(&Expr::ClassList, EvalOptions::with_timeout(self.config.enumeration_timeout()))
			.map_err(enumeration_error)?;
		let (count, bytes) = read_aggregate(&self.channel, value, 8).map_err(enumeration_error)?;

		let mut seen = HashSet::default();
		let handles: Vec<EntityHandle> = bytes
			.chunks_exact(8)
			.take(count)
			.filter_map(|word| {
				let mut raw = [0u8; 8];
				raw.copy_from_slice(word);
				EntityHandle::new(u64::from_le_bytes(raw))
			})
			.filter(|handle| seen.insert(*handle))
			.collect();
		tracing::debug!(count, distinct = handles.len(), "class list");

		let resolution = resolve_windows(&self.channel, &handles, batch_size, self.config.eval_timeout(), cancel)?;
		let report = EnumerationReport {
			requested: handles.len(),
			resolved: resolution.entities.len(),
			unresolved: resolution.unresolved,
			windows: resolution.windows,
			timed_out_windows: resolution.timed_out_windows,
			elapsed: started.elapsed(),
		};
		if !report.unresolved.is_empty() {
			tracing::warn!(
				unresolved = report.unresolved.len(),
				timed_out_windows = report.timed_out_windows,
				"enumeration incomplete"
			);
		}
		tracing::info!(
			resolved = report.resolved,
			windows = report.windows,
			elapsed = ?report.elapsed,
			"enumerated"
		);
		Ok(Generation::new(identity, number, resolution.entities, report))
	}

	/// The first entity matching `spec`, by name order.
	pub fn first_match(&self, spec: &str, mode: MatchMode) -> Result<Option<EntityView>> {
		let pattern = Pattern::compile(spec, mode);
		if pattern.is_exact() {
			let options = LookupOptions::default().with_mode(mode);
			return Ok(self.lookup(spec, &options)?.into_iter().next());
		}
		Ok(self.iter_matches(spec, mode)?.next())
	}

	/// Returns true if any entity matches `spec`.
	pub fn exists(&self, spec: &str, mode: MatchMode) -> Result<bool> {
		Ok(self.first_match(spec, mode)?.is_some())
	}

	/// Lazily matches `spec` against the current generation, enumerating
	/// first if the cache is empty.
	pub fn iter_matches(&self, spec: &str, mode: MatchMode) -> Result<Matches> {
		let session = self.session()?;
		let generation = self.current_or_enumerate(&session, &LookupOptions::default())?;
		Ok(Matches::new(generation, Pattern::compile(spec, mode)))
	}

	/// Forces a full enumeration and returns its report.
	pub fn reload(&self, batch_size: Option<NonZeroUsize>) -> Result<EnumerationReport> {
		let session = self.session()?;
		let options = LookupOptions {
			batch_size,
			..LookupOptions::default()
		};
		Ok(self.enumerate(&session, &options)?.report().clone())
	}

	/// Like [`Engine::reload`], checking `cancel` between windows.
	pub fn reload_with_cancel(
		&self,
		batch_size: Option<NonZeroUsize>,
		cancel: CancellationToken,
	) -> Result<EnumerationReport> {
		let session = self.session()?;
		let options = LookupOptions {
			batch_size,
			cancel: Some(cancel),
			..LookupOptions::default()
		};
		Ok(self.enumerate(&session, &options)?.report().clone())
	}

	/// Drops the live process's cached generation. Does not touch the target.
	pub fn clear_cache(&self) {
		if let Some(session) = self.channel.identity().and_then(|id| self.sessions.get(id)) {
			session.clear();
		}
	}

	/// Forgets everything cached for `identity`.
	pub fn detach(&self, identity: ProcessIdentity) {
		self.sessions.evict(identity);
	}

	/// The published generation of the live process, if any.
	pub fn generation(&self) -> Option<Arc<Generation>> {
		let identity = self.channel.identity()?;
		self.sessions.get(identity)?.current()
	}

	/// Report of the published generation, if any.
	pub fn report(&self) -> Option<EnumerationReport> {
		self.generation().map(|g| g.report().clone())
	}

	/// Superclass chain of `entity`, from `entity` to its root.
	///
	/// Ancestors are taken from the published generation; ancestors it lacks
	/// are resolved from the target one handle at a time.
	pub fn walk_hierarchy(&self, entity: &EntityView) -> Result<Vec<EntityView>> {
		let session = self.session()?;
		let generation = session.current();
		let cached = generation.as_deref().filter(|g| g.get(entity.handle).is_some());

		let (start, max_steps) = match cached {
			Some(generation) => (
				generation.view(entity.handle).unwrap_or_else(|| entity.clone()),
				generation.len() + generation.report().unresolved.len(),
			),
			None => (entity.clone(), self.config.max_detached_depth),
		};

		let parent_of = |handle: EntityHandle| -> Result<Option<EntityView>> {
			if let Some(view) = generation.as_deref().and_then(|g| g.view(handle)) {
				return Ok(Some(view));
			}
			self.resolve_detached(handle)
		};
		let mut chain = walk(start, parent_of, max_steps.max(1))?;

		for idx in 1..chain.len() {
			let parent = chain[idx].name.clone();
			chain[idx - 1].superclass_name.get_or_insert(parent);
		}
		Ok(chain)
	}

	fn resolve_detached(&self, handle: EntityHandle) -> Result<Option<EntityView>> {
		let resolution = resolve_windows(
			&self.channel,
			&[handle],
			NonZeroUsize::MIN,
			self.config.eval_timeout(),
			None,
		)?;
		Ok(resolution.entities.first().map(|e| e.view(None)))
	}

	/// Member metadata of `entity`, fetched once per generation.
	pub fn members(&self, entity: &EntityView) -> Result<Arc<Members>> {
		let session = self.session()?;
		let handle = entity.handle;
		let fetch = || {
			fetch_members(&self.channel, handle, self.config.member_timeout()).map_err(|source| match source {
				ChannelError::TargetNotStopped | ChannelError::NoProcess => EngineError::from(source),
				source => EngineError::Members { handle, source },
			})
		};

		let generation = session.current();
		match generation.as_deref().and_then(|g| g.get(handle)) {
			Some(cached) => cached.members_with(fetch),
			None => fetch().map(Arc::new),
		}
	}

	/// Methods, ivars and properties of `entity` whose names match `spec`.
	///
	/// Plain specs are case-insensitive substrings; `*` and `?` make a glob.
	pub fn search_members(&self, entity: &EntityView, spec: &str) -> Result<Members> {
		let members = self.members(entity)?;
		Ok(filter_members(&members, &compile_with(spec, MatchMode::Member)))
	}

	/// Entities conforming, directly or by inheritance, to a protocol
	/// matching `spec`.
	pub fn conforming_to(&self, spec: &str) -> Result<Vec<EntityView>> {
		let session = self.session()?;
		let generation = self.current_or_enumerate(&session, &LookupOptions::default())?;
		Ok(generation.conforming(&compile_with(spec, MatchMode::Member)))
	}

	/// Resolves a `-[Class selector]` / `+[Class selector]` signature to its
	/// implementation address.
	pub fn resolve_method(&self, signature: &str) -> Result<MethodTarget> {
		let signature = MethodSignature::parse(signature)?;
		self.session()?;
		resolve_method(&self.channel, &signature, self.config.member_timeout())
	}
}

#[cfg(test)]
mod tests {
	use objscope_channel::ExprKind;
	use objscope_channel::sim::{SimRuntime, SimTarget};
	use pretty_assertions::assert_eq;

	use super::*;

	fn engine() -> Engine<SimTarget> {
		Engine::new(SimTarget::new(SimRuntime::foundation(), 1))
	}

	fn names(views: &[EntityView]) -> Vec<&str> {
		views.iter().map(|v| v.name.as_str()).collect()
	}

	#[test]
	fn wildcard_lookup_enumerates_once() {
		let engine = engine();
		let views = engine.lookup("NS*String", &LookupOptions::default()).unwrap();
		assert_eq!(names(&views), ["NSMutableString", "NSString"]);
		assert_eq!(engine.channel().calls(ExprKind::ClassList), 1);

		engine.lookup("*View", &LookupOptions::default()).unwrap();
		assert_eq!(engine.channel().calls(ExprKind::ClassList), 1);
	}

	#[test]
	fn exact_lookup_on_cold_cache_uses_one_evaluate() {
		let engine = engine();
		let views = engine.lookup("IDSService", &LookupOptions::default()).unwrap();
		assert_eq!(names(&views), ["IDSService"]);
		assert_eq!(engine.channel().total_evaluations(), 1);
		assert_eq!(engine.channel().calls(ExprKind::ResolveNamed), 1);
		assert!(engine.generation().is_none());
	}

	#[test]
	fn exact_lookup_on_warm_cache_is_free() {
		let engine = engine();
		engine.reload(None).unwrap();
		engine.channel().reset_counters();
		let views = engine.lookup("NSString", &LookupOptions::default()).unwrap();
		assert_eq!(views[0].superclass_name.as_deref(), Some("NSObject"));
		assert_eq!(engine.channel().total_evaluations(), 0);
	}

	#[test]
	fn preconditions_are_checked_first() {
		let engine = engine();
		engine.channel().set_stopped(false);
		assert_eq!(engine.lookup("NS*", &LookupOptions::default()), Err(EngineError::TargetNotStopped));
		engine.channel().set_stopped(true);
		engine.channel().detach();
		assert_eq!(engine.lookup("NS*", &LookupOptions::default()), Err(EngineError::NoProcess));
		assert_eq!(engine.channel().total_evaluations(), 0);
	}

	#[test]
	fn walk_fills_superclass_names() {
		let engine = engine();
		let start = engine.first_match("NSMutableString", MatchMode::ClassName).unwrap().unwrap();
		let chain = engine.walk_hierarchy(&start).unwrap();
		assert_eq!(names(&chain), ["NSMutableString", "NSString", "NSObject"]);
		assert_eq!(chain[0].superclass_name.as_deref(), Some("NSString"));
		assert_eq!(chain[2].superclass_name, None);
	}

	#[test]
	fn first_match_and_exists() {
		let engine = engine();
		assert_eq!(
			engine.first_match("_ui*", MatchMode::ClassName).unwrap().map(|v| v.name),
			Some("_UIView".to_owned())
		);
		assert!(engine.exists("NSDate", MatchMode::ClassName).unwrap());
		assert!(!engine.exists("NSNothing", MatchMode::ClassName).unwrap());
	}

	#[test]
	fn resolve_method_parses_first() {
		let engine = engine();
		assert!(matches!(engine.resolve_method("length"), Err(EngineError::Signature(_))));
		let target = engine.resolve_method("+[NSDate date]").unwrap();
		assert_eq!(target.signature.to_string(), "+[NSDate date]");
	}
}
