//! Single-flight enumeration and lock-free readers.

use std::sync::Barrier;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use objscope_channel::ExprKind;
use objscope_channel::sim::{Faults, SimRuntime, SimTarget};
use objscope_registry::{Engine, LookupOptions};
use pretty_assertions::assert_eq;

fn slow_engine(classes: usize, latency_ms: u64) -> Engine<SimTarget> {
	let _ = tracing_subscriber::fmt::try_init();
	Engine::new(SimTarget::with_faults(
		SimRuntime::synthetic(classes),
		7,
		Faults {
			latency: Duration::from_millis(latency_ms),
			..Default::default()
		},
	))
}

/// Concurrent reloads of one process run a single enumeration.
#[test]
fn concurrent_reloads_share_one_pass() {
	let engine = slow_engine(100, 40);
	let barrier = Barrier::new(2);

	let reports: Vec<_> = std::thread::scope(|s| {
		let tasks: Vec<_> = (0..2)
			.map(|_| {
				s.spawn(|| {
					barrier.wait();
					engine.reload(None)
				})
			})
			.collect();
		tasks.into_iter().map(|t| t.join().unwrap()).collect()
	});

	assert_eq!(engine.channel().calls(ExprKind::ClassList), 1);
	assert_eq!(reports[0], reports[1]);
	assert!(reports[0].is_ok());
	assert_eq!(engine.generation().unwrap().number(), 1);
}

#[test]
fn concurrent_wildcard_lookups_on_cold_cache() {
	let engine = slow_engine(50, 30);
	let barrier = Barrier::new(8);

	let results: Vec<_> = std::thread::scope(|s| {
		let tasks: Vec<_> = (0..8)
			.map(|_| {
				s.spawn(|| {
					barrier.wait();
					engine.lookup("Synth000*", &LookupOptions::default()).unwrap().len()
				})
			})
			.collect();
		tasks.into_iter().map(|t| t.join().unwrap()).collect()
	});

	assert_eq!(results, vec![10; 8]);
	assert_eq!(engine.channel().calls(ExprKind::ClassList), 1);
}

/// Callers that arrive while a cold pass runs, or just after it publishes,
/// reuse that pass instead of enumerating again.
#[test]
fn staggered_cold_lookups_enumerate_once() {
	let engine = slow_engine(50, 10);

	let numbers: Vec<u64> = std::thread::scope(|s| {
		let tasks: Vec<_> = (0..6u64)
			.map(|i| {
				let engine = &engine;
				s.spawn(move || {
					std::thread::sleep(Duration::from_millis(i * 10));
					engine.lookup("Synth*", &LookupOptions::default()).unwrap();
					engine.generation().unwrap().number()
				})
			})
			.collect();
		tasks.into_iter().map(|t| t.join().unwrap()).collect()
	});

	assert_eq!(numbers, vec![1; 6]);
	assert_eq!(engine.channel().calls(ExprKind::ClassList), 1);
}

/// Readers during reloads only ever see complete, self-consistent generations.
#[test]
fn readers_never_observe_partial_generations() {
	let engine = slow_engine(300, 2);
	engine.reload(None).unwrap();
	let expected = engine.generation().unwrap().len();
	let done = AtomicBool::new(false);

	std::thread::scope(|s| {
		let reader = s.spawn(|| {
			let mut last = 0;
			let mut observed = 0;
			while !done.load(Ordering::Acquire) {
				let generation = engine.generation().unwrap();
				assert!(generation.number() >= last);
				last = generation.number();
				assert_eq!(generation.len(), expected);
				for entity in generation.iter() {
					assert_eq!(generation.get(entity.handle).map(|e| &e.name), Some(&entity.name));
					assert_eq!(generation.get_by_name(&entity.name).map(|e| e.handle), Some(entity.handle));
				}
				observed += 1;
			}
			observed
		});

		for _ in 0..3 {
			engine.reload(None).unwrap();
		}
		done.store(true, Ordering::Release);
		assert!(reader.join().unwrap() > 0);
	});

	assert_eq!(engine.generation().unwrap().number(), 4);
}
