//! Immutable cache snapshots.
//!
//! # Role
//!
//! A [`Generation`] is everything one enumeration pass learned about one
//! process: entities indexed by handle and by name, a name-ordered index for
//! pattern matching, and the [`EnumerationReport`] of the pass. Generations
//! are built once, then published by the session through an atomic swap.
//!
//! # Invariants
//!
//! * `by_handle` and `by_name` index the same entity vector and can never
//!   disagree.
//! * `entities` is ordered by `(name, handle)`; lookups return views in that
//!   order.
//! * Member metadata is the only interior mutability: each entity memoizes
//!   its members at most once per generation.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use objscope_matcher::{Pattern, match_list_parallel};
use objscope_primitives::{EntityHandle, EntityView, Members, ProcessIdentity};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};

/// One class-like runtime entity.
#[derive(Debug)]
pub struct Entity {
	pub handle: EntityHandle,
	pub name: String,
	pub is_metaclass: bool,
	/// Lookup key only; the superclass may be absent from the generation.
	pub superclass: Option<EntityHandle>,
	pub protocols: BTreeSet<String>,
	members: Mutex<Option<Arc<Members>>>,
}

impl Entity {
	pub fn new(
		handle: EntityHandle,
		name: String,
		is_metaclass: bool,
		superclass: Option<EntityHandle>,
		protocols: BTreeSet<String>,
	) -> Self {
		Self {
			handle,
			name,
			is_metaclass,
			superclass,
			protocols,
			members: Mutex::new(None),
		}
	}

	/// Returns memoized members, running `fetch` on first access.
	///
	/// The memo lock is held across `fetch`, so concurrent callers for the
	/// same entity wait for one fetch instead of issuing their own. Failures
	/// are not memoized.
	pub fn members_with<E>(&self, fetch: impl FnOnce() -> Result<Members, E>) -> Result<Arc<Members>, E> {
		let mut slot = self.members.lock();
		if let Some(members) = slot.as_ref() {
			return Ok(Arc::clone(members));
		}
		let members = Arc::new(fetch()?);
		*slot = Some(Arc::clone(&members));
		Ok(members)
	}

	/// Returns true once members have been fetched.
	pub fn has_members(&self) -> bool {
		self.members.lock().is_some()
	}

	/// A detached copy. `superclass_name` is filled by the caller.
	pub fn view(&self, superclass_name: Option<String>) -> EntityView {
		EntityView {
			handle: self.handle,
			name: self.name.clone(),
			is_metaclass: self.is_metaclass,
			superclass: self.superclass,
			superclass_name,
			protocols: self.protocols.clone(),
		}
	}
}

/// Statistics of the enumeration pass that produced a generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumerationReport {
	/// Distinct handles returned by the class list.
	pub requested: usize,
	pub resolved: usize,
	/// Handles that could not be resolved, in enumeration order.
	pub unresolved: Vec<EntityHandle>,
	/// Resolution evaluates issued.
	pub windows: usize,
	pub timed_out_windows: usize,
	pub elapsed: Duration,
}

/// An immutable, atomically published cache snapshot.
#[derive(Debug)]
pub struct Generation {
	identity: ProcessIdentity,
	number: u64,
	entities: Vec<Entity>,
	by_handle: HashMap<EntityHandle, usize>,
	by_name: HashMap<String, usize>,
	report: EnumerationReport,
	built_at: Instant,
}

impl Generation {
	/// Indexes `entities`. Duplicate handles keep their first occurrence.
	pub fn new(identity: ProcessIdentity, number: u64, entities: Vec<Entity>, report: EnumerationReport) -> Self {
		let mut seen = HashSet::default();
		let mut entities: Vec<Entity> = entities.into_iter().filter(|e| seen.insert(e.handle)).collect();
		entities.sort_by(|a, b| a.name.cmp(&b.name).then(a.handle.cmp(&b.handle)));

		let mut by_handle = HashMap::default();
		by_handle.reserve(entities.len());
		let mut by_name: HashMap<String, usize> = HashMap::default();
		by_name.reserve(entities.len());

		for (idx, entity) in entities.iter().enumerate() {
			by_handle.insert(entity.handle, idx);
			match by_name.get(&entity.name) {
				// A class shares its name with its metaclass; the class wins.
				Some(&prev) if !entities[prev].is_metaclass || entity.is_metaclass => {}
				_ => {
					by_name.insert(entity.name.clone(), idx);
				}
			}
		}

		Self {
			identity,
			number,
			entities,
			by_handle,
			by_name,
			report,
			built_at: Instant::now(),
		}
	}

	pub fn identity(&self) -> ProcessIdentity {
		self.identity
	}

	/// Monotonic number within the session; 1 after a cold start or clear.
	pub fn number(&self) -> u64 {
		self.number
	}

	pub fn report(&self) -> &EnumerationReport {
		&self.report
	}

	pub fn built_at(&self) -> Instant {
		self.built_at
	}

	pub fn len(&self) -> usize {
		self.entities.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entities.is_empty()
	}

	pub fn get(&self, handle: EntityHandle) -> Option<&Entity> {
		self.by_handle.get(&handle).map(|&idx| &self.entities[idx])
	}

	pub fn get_by_name(&self, name: &str) -> Option<&Entity> {
		self.by_name.get(name).map(|&idx| &self.entities[idx])
	}

	/// Entities in name order.
	pub fn iter(&self) -> impl Iterator<Item = &Entity> {
		self.entities.iter()
	}

	/// Name of `handle`, if cached.
	pub fn name_of(&self, handle: EntityHandle) -> Option<&str> {
		self.get(handle).map(|e| e.name.as_str())
	}

	/// Detached view of `entity` with its superclass name filled in.
	pub fn view_of(&self, entity: &Entity) -> EntityView {
		let superclass_name = entity.superclass.and_then(|s| self.name_of(s)).map(str::to_owned);
		entity.view(superclass_name)
	}

	pub fn view(&self, handle: EntityHandle) -> Option<EntityView> {
		self.get(handle).map(|e| self.view_of(e))
	}

	/// Every entity matching `pattern`, in name order.
	///
	/// Exact patterns are answered from the name index.
	pub fn matching(&self, pattern: &Pattern, max_threads: usize) -> Vec<EntityView> {
		if let Some(name) = pattern.as_exact() {
			return self.get_by_name(name).map(|e| self.view_of(e)).into_iter().collect();
		}
		let names: Vec<&str> = self.entities.iter().map(|e| e.name.as_str()).collect();
		match_list_parallel(pattern, &names, max_threads)
			.into_iter()
			.map(|idx| self.view_of(&self.entities[idx]))
			.collect()
	}

	/// Entities declaring, directly or through a superclass, a protocol
	/// matching `pattern`.
	pub fn conforming(&self, pattern: &Pattern) -> Vec<EntityView> {
		let mut memo: HashMap<EntityHandle, bool> = HashMap::default();
		self.entities
			.iter()
			.filter(|e| self.conforms(e, pattern, &mut memo))
			.map(|e| self.view_of(e))
			.collect()
	}

	fn conforms(&self, start: &Entity, pattern: &Pattern, memo: &mut HashMap<EntityHandle, bool>) -> bool {
		let mut chain = Vec::new();
		let mut visited = HashSet::default();
		let mut current = Some(start);
		let mut found = false;
		while let Some(entity) = current {
			if let Some(&known) = memo.get(&entity.handle) {
				found = known;
				break;
			}
			if !visited.insert(entity.handle) {
				break;
			}
			chain.push(entity.handle);
			if entity.protocols.iter().any(|p| pattern.matches(p)) {
				found = true;
				break;
			}
			current = entity.superclass.and_then(|s| self.get(s));
		}
		// Every entity walked below the deciding one shares its outcome.
		for handle in chain {
			memo.insert(handle, found);
		}
		found
	}
}

/// Lazy iterator over the matches of one pattern in one generation.
///
/// Holds its generation, so it keeps yielding from the snapshot it started
/// on even if the cache is reloaded meanwhile.
#[derive(Debug)]
pub struct Matches {
	generation: Arc<Generation>,
	pattern: Pattern,
	pos: usize,
}

impl Matches {
	pub(crate) fn new(generation: Arc<Generation>, pattern: Pattern) -> Self {
		Self {
			generation,
			pattern,
			pos: 0,
		}
	}

	/// The generation this iterator reads.
	pub fn generation(&self) -> &Arc<Generation> {
		&self.generation
	}
}

impl Iterator for Matches {
	type Item = EntityView;

	fn next(&mut self) -> Option<EntityView> {
		while let Some(entity) = self.generation.entities.get(self.pos) {
			self.pos += 1;
			if self.pattern.matches(&entity.name) {
				return Some(self.generation.view_of(entity));
			}
		}
		None
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use objscope_matcher::{MatchMode, compile, compile_with};
	use pretty_assertions::assert_eq;

	use super::*;

	pub(crate) fn handle(addr: u64) -> EntityHandle {
		EntityHandle::new(addr).unwrap()
	}

	pub(crate) fn entity(addr: u64, name: &str, superclass: Option<u64>, protocols: &[&str]) -> Entity {
		Entity::new(
			handle(addr),
			name.to_owned(),
			false,
			superclass.map(handle),
			protocols.iter().map(|p| (*p).to_owned()).collect(),
		)
	}

	fn sample() -> Generation {
		Generation::new(
			ProcessIdentity::new(1, 1),
			1,
			vec![
				entity(0x300, "NSString", Some(0x100), &["NSCopying"]),
				entity(0x100, "NSObject", None, &["NSObject"]),
				entity(0x400, "NSMutableString", Some(0x300), &[]),
				entity(0x200, "IDSService", Some(0x100), &[]),
			],
			EnumerationReport::default(),
		)
	}

	/// Both indexes resolve every entity to the same record.
	#[test]
	fn indexes_agree() {
		let generation = sample();
		for entity in generation.iter() {
			assert_eq!(generation.get(entity.handle).map(|e| e.name.as_str()), Some(entity.name.as_str()));
			assert_eq!(generation.get_by_name(&entity.name).map(|e| e.handle), Some(entity.handle));
		}
		let names: Vec<_> = generation.iter().map(|e| e.name.as_str()).collect();
		assert_eq!(names, ["IDSService", "NSMutableString", "NSObject", "NSString"]);
	}

	#[test]
	fn class_wins_name_over_metaclass() {
		let meta = Entity::new(handle(0x180), "NSObject".into(), true, Some(handle(0x100)), BTreeSet::new());
		let generation = Generation::new(
			ProcessIdentity::new(1, 1),
			1,
			vec![meta, entity(0x100, "NSObject", None, &[])],
			EnumerationReport::default(),
		);
		assert_eq!(generation.get_by_name("NSObject").map(|e| e.handle), Some(handle(0x100)));
		assert_eq!(generation.len(), 2);
	}

	#[test]
	fn duplicate_handles_are_dropped() {
		let generation = Generation::new(
			ProcessIdentity::new(1, 1),
			1,
			vec![entity(0x100, "A", None, &[]), entity(0x100, "B", None, &[])],
			EnumerationReport::default(),
		);
		assert_eq!(generation.len(), 1);
		assert!(generation.get_by_name("B").is_none());
	}

	#[test]
	fn views_carry_superclass_name() {
		let generation = sample();
		let view = generation.view(handle(0x400)).unwrap();
		assert_eq!(view.superclass_name.as_deref(), Some("NSString"));
		assert!(generation.view(handle(0x100)).unwrap().is_root());
	}

	#[test]
	fn matching_is_name_ordered() {
		let generation = sample();
		let names = |pattern: &Pattern| -> Vec<String> {
			generation.matching(pattern, 1).into_iter().map(|v| v.name).collect()
		};
		assert_eq!(names(&compile("NS*String")), ["NSMutableString", "NSString"]);
		assert_eq!(names(&compile("NSString")), ["NSString"]);
		assert_eq!(names(&compile("nsstring")), Vec::<String>::new());
		assert_eq!(names(&compile("")).len(), 4);
	}

	#[test]
	fn conformance_is_inherited() {
		let generation = sample();
		let names: Vec<_> = generation
			.conforming(&compile_with("copying", MatchMode::Member))
			.into_iter()
			.map(|v| v.name)
			.collect();
		assert_eq!(names, ["NSMutableString", "NSString"]);
		assert_eq!(generation.conforming(&compile("NSObject")).len(), 4);
	}

	#[test]
	fn conformance_walk_survives_cycles() {
		let generation = Generation::new(
			ProcessIdentity::new(1, 1),
			1,
			vec![entity(0x100, "A", Some(0x200), &[]), entity(0x200, "B", Some(0x100), &[])],
			EnumerationReport::default(),
		);
		assert!(generation.conforming(&compile("P")).is_empty());
	}

	#[test]
	fn matches_iterator_is_lazy() {
		let generation = Arc::new(sample());
		let mut matches = Matches::new(Arc::clone(&generation), compile("NS*"));
		assert_eq!(matches.next().map(|v| v.name), Some("NSMutableString".to_owned()));
		assert_eq!(matches.pos, 2);
		assert_eq!(matches.count(), 2);
		assert_eq!(Matches::new(generation, compile("UI*")).count(), 0);
	}

	#[test]
	fn members_are_fetched_once() {
		let entity = entity(0x100, "NSObject", None, &[]);
		let mut fetches = 0;
		for _ in 0..3 {
			let members = entity
				.members_with(|| {
					fetches += 1;
					Ok::<_, ()>(Members::default())
				})
				.unwrap();
			assert!(members.is_empty());
		}
		assert_eq!(fetches, 1);
		assert!(entity.has_members());
	}

	#[test]
	fn failed_member_fetch_is_retried() {
		let entity = entity(0x100, "NSObject", None, &[]);
		assert_eq!(entity.members_with(|| Err("boom")), Err("boom"));
		assert!(!entity.has_members());
		assert!(entity.members_with(|| Ok::<_, &str>(Members::default())).is_ok());
	}
}
