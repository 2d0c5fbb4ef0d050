//! Per-process cache state.
//!
//! # Role
//!
//! A [`Session`] owns the published generation of one process and
//! serializes full enumerations against it.
//!
//! # Invariants
//!
//! * Readers load the current generation with a single atomic pointer read
//!   and never observe a partially built one.
//! * At most one enumeration runs per session. Callers arriving while one is
//!   in flight block on it and receive its outcome (including failure and
//!   cancellation) instead of starting their own.
//! * A generation is published before the in-flight slot is cleared, and
//!   [`Session::ensure`] checks for it while holding the slot lock, so a
//!   caller that only needs some generation never starts a second pass.

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use objscope_primitives::ProcessIdentity;
use parking_lot::{Condvar, Mutex};

use crate::error::{EngineError, Result};
use crate::generation::Generation;

/// Outcome slot shared by an enumeration leader and its joiners.
#[derive(Debug, Default)]
struct Flight {
	outcome: Mutex<Option<Result<Arc<Generation>>>>,
	done: Condvar,
}

impl Flight {
	fn complete(&self, outcome: Result<Arc<Generation>>) {
		let mut slot = self.outcome.lock();
		if slot.is_none() {
			*slot = Some(outcome);
		}
		self.done.notify_all();
	}

	fn wait(&self) -> Result<Arc<Generation>> {
		let mut slot = self.outcome.lock();
		loop {
			if let Some(outcome) = slot.as_ref() {
				return outcome.clone();
			}
			self.done.wait(&mut slot);
		}
	}
}

/// Completes the flight with [`EngineError::Abandoned`] if the leader
/// unwinds before finishing.
struct LeaderGuard<'a> {
	session: &'a Session,
	flight: Arc<Flight>,
	finished: bool,
}

impl LeaderGuard<'_> {
	fn finish(mut self, outcome: Result<Arc<Generation>>) {
		self.session.in_flight.lock().take();
		self.flight.complete(outcome);
		self.finished = true;
	}
}

impl Drop for LeaderGuard<'_> {
	fn drop(&mut self) {
		if !self.finished {
			self.session.in_flight.lock().take();
			self.flight.complete(Err(EngineError::Abandoned));
		}
	}
}

/// Cache state of one inspected process.
#[derive(Debug)]
pub struct Session {
	identity: ProcessIdentity,
	current: ArcSwapOption<Generation>,
	in_flight: Mutex<Option<Arc<Flight>>>,
	created_at: Instant,
}

impl Session {
	pub fn new(identity: ProcessIdentity) -> Self {
		Self {
			identity,
			current: ArcSwapOption::empty(),
			in_flight: Mutex::new(None),
			created_at: Instant::now(),
		}
	}

	pub fn identity(&self) -> ProcessIdentity {
		self.identity
	}

	pub fn created_at(&self) -> Instant {
		self.created_at
	}

	/// The published generation, if any.
	pub fn current(&self) -> Option<Arc<Generation>> {
		self.current.load_full()
	}

	/// Drops the published generation. An enumeration in flight still
	/// publishes when it finishes.
	pub fn clear(&self) -> Option<Arc<Generation>> {
		let previous = self.current.swap(None);
		if let Some(previous) = &previous {
			tracing::debug!(identity = %self.identity, generation = previous.number(), "cleared cache");
		}
		previous
	}

	/// Returns true while an enumeration is running.
	pub fn is_enumerating(&self) -> bool {
		self.in_flight.lock().is_some()
	}

	/// Runs `build` as the only enumeration of this session, or joins the one
	/// already running.
	///
	/// `build` receives the number the new generation must carry. On success
	/// its generation is published; on failure the previous one stays.
	pub fn enumerate<F>(&self, build: F) -> Result<Arc<Generation>>
	where
		F: FnOnce(u64) -> Result<Generation>,
	{
		self.run(build, false)
	}

	/// Returns the published generation, or enumerates as [`Session::enumerate`]
	/// does when there is none.
	pub fn ensure<F>(&self, build: F) -> Result<Arc<Generation>>
	where
		F: FnOnce(u64) -> Result<Generation>,
	{
		if let Some(generation) = self.current() {
			return Ok(generation);
		}
		self.run(build, true)
	}

	fn run<F>(&self, build: F, reuse_current: bool) -> Result<Arc<Generation>>
	where
		F: FnOnce(u64) -> Result<Generation>,
	{
		let flight = {
			let mut slot = self.in_flight.lock();
			// A leader that finished since the caller's last look has already
			// published; the slot lock orders the two.
			if reuse_current
				&& slot.is_none()
				&& let Some(generation) = self.current()
			{
				return Ok(generation);
			}
			match slot.as_ref() {
				Some(flight) => Err(Arc::clone(flight)),
				None => {
					let flight = Arc::new(Flight::default());
					*slot = Some(Arc::clone(&flight));
					Ok(flight)
				}
			}
		};

		let flight = match flight {
			Ok(flight) => flight,
			Err(joined) => {
				tracing::debug!(identity = %self.identity, "joining in-flight enumeration");
				return joined.wait();
			}
		};

		let guard = LeaderGuard {
			session: self,
			flight,
			finished: false,
		};
		let number = self.current.load_full().map_or(1, |g| g.number() + 1);
		let outcome = build(number).map(|generation| {
			let generation = Arc::new(generation);
			self.current.store(Some(Arc::clone(&generation)));
			tracing::debug!(
				identity = %self.identity,
				generation = number,
				entities = generation.len(),
				"published generation"
			);
			generation
		});
		guard.finish(outcome.clone());
		outcome
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Barrier;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	use pretty_assertions::assert_eq;

	use super::*;
	use crate::generation::EnumerationReport;
	use crate::generation::tests::entity;

	const PID: ProcessIdentity = ProcessIdentity::new(9, 1);

	fn build(number: u64) -> Result<Generation> {
		Ok(Generation::new(
			PID,
			number,
			vec![entity(0x100, "NSObject", None, &[])],
			EnumerationReport::default(),
		))
	}

	#[test]
	fn numbers_increase_and_reset_on_clear() {
		let session = Session::new(PID);
		assert!(session.current().is_none());
		assert_eq!(session.enumerate(build).unwrap().number(), 1);
		assert_eq!(session.enumerate(build).unwrap().number(), 2);
		assert_eq!(session.clear().map(|g| g.number()), Some(2));
		assert!(session.current().is_none());
		assert_eq!(session.enumerate(build).unwrap().number(), 1);
	}

	#[test]
	fn failure_keeps_previous_generation() {
		let session = Session::new(PID);
		session.enumerate(build).unwrap();
		let err = session.enumerate(|_| Err(EngineError::Cancelled)).unwrap_err();
		assert_eq!(err, EngineError::Cancelled);
		assert_eq!(session.current().map(|g| g.number()), Some(1));
		assert!(!session.is_enumerating());
	}

	/// Concurrent callers share one build and its result.
	#[test]
	fn concurrent_enumerations_share_one_build() {
		let session = Session::new(PID);
		let builds = AtomicUsize::new(0);
		let barrier = Barrier::new(4);
		let numbers: Vec<u64> = std::thread::scope(|s| {
			let tasks: Vec<_> = (0..4)
				.map(|_| {
					s.spawn(|| {
						barrier.wait();
						session
							.enumerate(|n| {
								builds.fetch_add(1, Ordering::SeqCst);
								std::thread::sleep(Duration::from_millis(200));
								build(n)
							})
							.unwrap()
							.number()
					})
				})
				.collect();
			tasks.into_iter().map(|t| t.join().unwrap()).collect()
		});
		assert_eq!(builds.load(Ordering::SeqCst), 1);
		assert_eq!(numbers, vec![1; 4]);
	}

	#[test]
	fn ensure_reuses_published_generation() {
		let session = Session::new(PID);
		assert_eq!(session.ensure(build).unwrap().number(), 1);
		let reused = session.ensure(|_| -> Result<Generation> { panic!("must not rebuild") });
		assert_eq!(reused.unwrap().number(), 1);
		assert_eq!(session.enumerate(build).unwrap().number(), 2);
	}

	/// Callers arriving during and after the leader's pass all get its
	/// generation; none of them starts another pass.
	#[test]
	fn staggered_ensure_builds_once() {
		let session = Session::new(PID);
		let builds = AtomicUsize::new(0);
		let numbers: Vec<u64> = std::thread::scope(|s| {
			let tasks: Vec<_> = (0..8u64)
				.map(|i| {
					let session = &session;
					let builds = &builds;
					s.spawn(move || {
						std::thread::sleep(Duration::from_millis(i * 15));
						session
							.ensure(|n| {
								builds.fetch_add(1, Ordering::SeqCst);
								std::thread::sleep(Duration::from_millis(50));
								build(n)
							})
							.unwrap()
							.number()
					})
				})
				.collect();
			tasks.into_iter().map(|t| t.join().unwrap()).collect()
		});
		assert_eq!(builds.load(Ordering::SeqCst), 1);
		assert_eq!(numbers, vec![1; 8]);
	}

	#[test]
	fn panicking_leader_abandons_flight() {
		let session = Session::new(PID);
		let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
			session.enumerate(|_| -> Result<Generation> { panic!("leader died") })
		}));
		assert!(result.is_err());
		assert!(!session.is_enumerating());
		assert_eq!(session.enumerate(build).unwrap().number(), 1);
	}
}
