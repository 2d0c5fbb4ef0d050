use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use objscope_primitives::ProcessIdentity;
use parking_lot::Mutex;
use rustc_hash::FxHashMap as HashMap;

use super::memory::Memory;
use super::{SimClass, SimRuntime};
use crate::channel::{AccessChannel, ChannelError, EvalOptions, Result, Value};
use crate::expr::{Expr, ExprKind};
use crate::layout::{
	EntityRecord, IvarEntry, MemberTable, MethodEntry, MethodImpRecord, PropertyEntry, RecordFlags,
	StringRef,
};

const CLASS_BASE: u64 = 0x1_0000_0000;
const EPOCH_STRIDE: u64 = 0x1000_0000;
const CLASS_STRIDE: u64 = 0x100;
const META_OFFSET: u64 = 0x80;
const IMP_BASE: u64 = 0x2_0000_0000;
/// Never mapped; used for names marked unreadable.
const UNMAPPED: u64 = 0xdead_0000_0000;

/// Injectable faults of a [`SimTarget`].
#[derive(Debug, Clone, Default)]
pub struct Faults {
	/// Sleep inside every evaluation. Exceeding the call's timeout yields a timeout.
	pub latency: Duration,
	/// Extra non-class addresses appended to the class list.
	pub bogus_handles: Vec<u64>,
	/// Classes whose name pointer refers to unmapped memory.
	pub unreadable_names: Vec<String>,
	/// Zero-based indices of window resolutions that time out.
	pub timeout_windows: Vec<usize>,
	/// Make the class list evaluation itself fail.
	pub fail_class_list: bool,
	/// Make every by-name resolution time out.
	pub timeout_named: bool,
	/// `(class, superclass)` links replacing the declared ones.
	pub superclass_overrides: Vec<(String, Option<String>)>,
}

#[derive(Debug)]
struct Installed {
	class: SimClass,
	handle: u64,
	meta: u64,
	superclass: Option<usize>,
	imps: Vec<u64>,
	class_imps: Vec<u64>,
}

#[derive(Debug, Default)]
struct Graph {
	classes: Vec<Installed>,
	/// Handle to (class index, is metaclass).
	by_handle: HashMap<u64, (usize, bool)>,
	by_name: HashMap<String, usize>,
	selectors: HashMap<String, u64>,
}

impl Graph {
	fn build(runtime: &SimRuntime, epoch: u64, faults: &Faults) -> Self {
		let base = CLASS_BASE + epoch * EPOCH_STRIDE;
		let mut graph = Graph::default();
		let mut next_imp = IMP_BASE;
		let mut next_sel = IMP_BASE * 2;

		for (idx, class) in runtime.classes.iter().enumerate() {
			let handle = base + idx as u64 * CLASS_STRIDE;
			let meta = handle + META_OFFSET;
			graph.by_handle.insert(handle, (idx, false));
			graph.by_handle.insert(meta, (idx, true));
			graph.by_name.entry(class.name.clone()).or_insert(idx);

			let mut alloc_imps = |methods: &[(String, String)]| {
				methods
					.iter()
					.map(|_| {
						next_imp += 0x10;
						next_imp
					})
					.collect::<Vec<_>>()
			};
			let imps = alloc_imps(&class.methods);
			let class_imps = alloc_imps(&class.class_methods);

			for (sel, _) in class.methods.iter().chain(&class.class_methods) {
				graph.selectors.entry(sel.clone()).or_insert_with(|| {
					next_sel += 0x8;
					next_sel
				});
			}

			graph.classes.push(Installed {
				class: class.clone(),
				handle,
				meta,
				superclass: None,
				imps,
				class_imps,
			});
		}

		for idx in 0..graph.classes.len() {
			let name = graph.classes[idx].class.name.clone();
			let declared = graph.classes[idx].class.superclass.clone();
			let link = faults
				.superclass_overrides
				.iter()
				.find(|(class, _)| *class == name)
				.map(|(_, sup)| sup.clone())
				.unwrap_or(declared);
			graph.classes[idx].superclass = link.and_then(|sup| graph.by_name.get(&sup).copied());
		}

		graph
	}

	fn superclass_handle(&self, idx: usize, is_meta: bool) -> u64 {
		let installed = &self.classes[idx];
		match (installed.superclass, is_meta) {
			(Some(sup), false) => self.classes[sup].handle,
			(Some(sup), true) => self.classes[sup].meta,
			// Root metaclass inherits from the root class.
			(None, true) => installed.handle,
			(None, false) => 0,
		}
	}

	/// Walks the superclass chain from `idx` looking for `selector`.
	fn find_imp(&self, idx: usize, selector: &str, class_method: bool) -> u64 {
		let mut current = Some(idx);
		let mut steps = 0;
		while let Some(i) = current {
			let installed = &self.classes[i];
			let (methods, imps) = if class_method {
				(&installed.class.class_methods, &installed.class_imps)
			} else {
				(&installed.class.methods, &installed.imps)
			};
			if let Some(pos) = methods.iter().position(|(sel, _)| sel == selector) {
				return imps[pos];
			}
			steps += 1;
			if steps > self.classes.len() {
				return 0;
			}
			current = installed.superclass;
		}
		0
	}
}

#[derive(Debug)]
struct State {
	identity: Option<ProcessIdentity>,
	runtime: SimRuntime,
	graph: Graph,
	memory: Memory,
	faults: Faults,
	window_calls: usize,
}

/// An [`AccessChannel`] backed by a [`SimRuntime`].
#[derive(Debug)]
pub struct SimTarget {
	state: Mutex<State>,
	stopped: AtomicBool,
	calls: Mutex<HashMap<ExprKind, usize>>,
	reads: AtomicUsize,
}

impl SimTarget {
	/// Creates a stopped target for `runtime` with pid `pid`, epoch 1.
	pub fn new(runtime: SimRuntime, pid: u32) -> Self {
		Self::with_faults(runtime, pid, Faults::default())
	}

	pub fn with_faults(runtime: SimRuntime, pid: u32, faults: Faults) -> Self {
		let identity = ProcessIdentity::new(pid, 1);
		let graph = Graph::build(&runtime, identity.launch_epoch, &faults);
		Self {
			state: Mutex::new(State {
				identity: Some(identity),
				runtime,
				graph,
				memory: Memory::new(),
				faults,
				window_calls: 0,
			}),
			stopped: AtomicBool::new(true),
			calls: Mutex::new(HashMap::default()),
			reads: AtomicUsize::new(0),
		}
	}

	/// Number of evaluations of `kind` so far.
	pub fn calls(&self, kind: ExprKind) -> usize {
		self.calls.lock().get(&kind).copied().unwrap_or(0)
	}

	/// Number of evaluations of any kind so far.
	pub fn total_evaluations(&self) -> usize {
		self.calls.lock().values().sum()
	}

	/// Number of memory reads so far.
	pub fn reads(&self) -> usize {
		self.reads.load(Ordering::Relaxed)
	}

	/// Resets call and read counters.
	pub fn reset_counters(&self) {
		self.calls.lock().clear();
		self.reads.store(0, Ordering::Relaxed);
	}

	pub fn set_stopped(&self, stopped: bool) {
		self.stopped.store(stopped, Ordering::Release);
	}

	/// Replaces the injected faults and rebuilds superclass links.
	pub fn set_faults(&self, faults: Faults) {
		let mut state = self.state.lock();
		let epoch = state.identity.map_or(1, |id| id.launch_epoch);
		state.graph = Graph::build(&state.runtime, epoch, &faults);
		state.faults = faults;
		state.window_calls = 0;
	}

	/// Replaces the class graph of the running process (e.g. after `dlopen`).
	pub fn set_runtime(&self, runtime: SimRuntime) {
		let mut state = self.state.lock();
		let epoch = state.identity.map_or(1, |id| id.launch_epoch);
		state.graph = Graph::build(&runtime, epoch, &state.faults);
		state.runtime = runtime;
	}

	/// Simulates a relaunch: same pid, next epoch, relocated classes, fresh memory.
	pub fn relaunch(&self) -> ProcessIdentity {
		let mut state = self.state.lock();
		let previous = state.identity.unwrap_or(ProcessIdentity::new(0, 0));
		let identity = ProcessIdentity::new(previous.pid, previous.launch_epoch + 1);
		state.graph = Graph::build(&state.runtime, identity.launch_epoch, &state.faults);
		state.memory = Memory::new();
		state.identity = Some(identity);
		state.window_calls = 0;
		identity
	}

	/// Simulates the process exiting.
	pub fn detach(&self) {
		self.state.lock().identity = None;
	}

	/// Handle of the class named `name` in the current run.
	pub fn handle_of(&self, name: &str) -> Option<u64> {
		let state = self.state.lock();
		state.graph.by_name.get(name).map(|&idx| state.graph.classes[idx].handle)
	}

	/// Metaclass handle of the class named `name` in the current run.
	pub fn metaclass_of(&self, name: &str) -> Option<u64> {
		let state = self.state.lock();
		state.graph.by_name.get(name).map(|&idx| state.graph.classes[idx].meta)
	}

	/// Number of mapped scratch regions, a proxy for target-side allocations.
	pub fn allocations(&self) -> usize {
		self.state.lock().memory.region_count()
	}

	fn record(state: &mut State, handle: u64) -> EntityRecord {
		let Some(&(idx, is_meta)) = state.graph.by_handle.get(&handle) else {
			return EntityRecord {
				handle,
				..Default::default()
			};
		};
		let class = &state.graph.classes[idx].class;
		let name = if state.faults.unreadable_names.contains(&class.name) {
			StringRef {
				ptr: UNMAPPED + idx as u64 * 0x100,
				len: class.name.len() as u64,
			}
		} else {
			let name = class.name.clone();
			let (ptr, len) = state.memory.alloc_str(&name);
			StringRef { ptr, len }
		};

		let (protocols, protocol_count) = if is_meta || class.protocols.is_empty() {
			(0, 0)
		} else {
			let protocol_names = class.protocols.clone();
			let mut refs = Vec::with_capacity(protocol_names.len() * 16);
			for protocol in &protocol_names {
				let (ptr, len) = state.memory.alloc_str(protocol);
				StringRef { ptr, len }.encode(&mut refs);
			}
			(state.memory.alloc(refs), protocol_names.len() as u32)
		};

		let mut flags = RecordFlags::RESOLVED;
		if is_meta {
			flags |= RecordFlags::METACLASS;
		}

		EntityRecord {
			handle,
			name,
			superclass: state.graph.superclass_handle(idx, is_meta),
			protocols,
			protocol_count,
			flags,
		}
	}

	fn aggregate(state: &mut State, count: usize, records: Vec<u8>) -> Value {
		let mut buf = Vec::with_capacity(8 + records.len());
		buf.extend_from_slice(&(count as u64).to_le_bytes());
		buf.extend_from_slice(&records);
		Value::Aggregate(state.memory.alloc(buf))
	}

	fn member_table(state: &mut State, handle: u64) -> Result<Value> {
		let Some(&(idx, is_meta)) = state.graph.by_handle.get(&handle) else {
			return Err(ChannelError::Evaluation(format!(
				"EXC_BAD_ACCESS reading class at 0x{handle:x}"
			)));
		};
		let installed = &state.graph.classes[idx];
		let (methods, class_methods, imps, class_imps) = if is_meta {
			(installed.class.class_methods.clone(), Vec::new(), installed.class_imps.clone(), Vec::new())
		} else {
			(
				installed.class.methods.clone(),
				installed.class.class_methods.clone(),
				installed.imps.clone(),
				installed.class_imps.clone(),
			)
		};
		let ivars = if is_meta { Vec::new() } else { installed.class.ivars.clone() };
		let properties = if is_meta { Vec::new() } else { installed.class.properties.clone() };

		let mut method_bytes = Vec::new();
		for ((sel, types), imp) in methods.iter().zip(&imps).chain(class_methods.iter().zip(&class_imps)) {
			let (sp, sl) = state.memory.alloc_str(sel);
			let (tp, tl) = state.memory.alloc_str(types);
			MethodEntry {
				selector: StringRef { ptr: sp, len: sl },
				types: StringRef { ptr: tp, len: tl },
				imp: *imp,
			}
			.encode(&mut method_bytes);
		}
		let mut ivar_bytes = Vec::new();
		for (name, types, offset) in &ivars {
			let (np, nl) = state.memory.alloc_str(name);
			let (tp, tl) = state.memory.alloc_str(types);
			IvarEntry {
				name: StringRef { ptr: np, len: nl },
				types: StringRef { ptr: tp, len: tl },
				offset: *offset,
			}
			.encode(&mut ivar_bytes);
		}
		let mut property_bytes = Vec::new();
		for (name, attrs) in &properties {
			let (np, nl) = state.memory.alloc_str(name);
			let (ap, al) = state.memory.alloc_str(attrs);
			PropertyEntry {
				name: StringRef { ptr: np, len: nl },
				attributes: StringRef { ptr: ap, len: al },
			}
			.encode(&mut property_bytes);
		}

		let table = MemberTable {
			methods: state.memory.alloc(method_bytes),
			ivars: state.memory.alloc(ivar_bytes),
			properties: state.memory.alloc(property_bytes),
			method_count: methods.len() as u16,
			class_method_count: class_methods.len() as u16,
			ivar_count: ivars.len() as u16,
			property_count: properties.len() as u16,
		};
		let mut record = Vec::new();
		table.encode(&mut record);
		Ok(Self::aggregate(state, 1, record))
	}

	fn method_imp(state: &mut State, class_name: &str, selector: &str, class_method: bool) -> Value {
		let mut record = MethodImpRecord::default();
		if let Some(&idx) = state.graph.by_name.get(class_name) {
			let installed = &state.graph.classes[idx];
			record.class = installed.handle;
			record.selector = state.graph.selectors.get(selector).copied().unwrap_or(0);
			record.lookup_class = if class_method { installed.meta } else { installed.handle };
			if record.selector != 0 {
				record.imp = state.graph.find_imp(idx, selector, class_method);
			}
		}
		let mut bytes = Vec::new();
		record.encode(&mut bytes);
		Self::aggregate(state, 1, bytes)
	}
}

impl AccessChannel for SimTarget {
	fn identity(&self) -> Option<ProcessIdentity> {
		self.state.lock().identity
	}

	fn is_stopped(&self) -> bool {
		self.stopped.load(Ordering::Acquire)
	}

	fn evaluate(&self, expr: &Expr, options: EvalOptions) -> Result<Value> {
		let latency = {
			let state = self.state.lock();
			if state.identity.is_none() {
				return Err(ChannelError::NoProcess);
			}
			state.faults.latency
		};
		if !self.is_stopped() {
			return Err(ChannelError::TargetNotStopped);
		}
		*self.calls.lock().entry(expr.kind()).or_insert(0) += 1;
		tracing::trace!(kind = ?expr.kind(), "sim evaluate");

		if let Some(timeout) = options.timeout.filter(|t| latency > *t) {
			std::thread::sleep(timeout);
			return Err(ChannelError::Timeout { after: timeout });
		}
		if !latency.is_zero() {
			std::thread::sleep(latency);
		}

		let mut state = self.state.lock();
		let state = &mut *state;
		match expr {
			Expr::ClassList => {
				if state.faults.fail_class_list {
					return Err(ChannelError::Evaluation("objc_copyClassList returned NULL".into()));
				}
				let mut handles: Vec<u64> = state.graph.classes.iter().map(|c| c.handle).collect();
				handles.extend(state.faults.bogus_handles.iter().copied());
				let mut bytes = Vec::with_capacity(handles.len() * 8);
				for handle in &handles {
					bytes.extend_from_slice(&handle.to_le_bytes());
				}
				Ok(Self::aggregate(state, handles.len(), bytes))
			}
			Expr::ResolveWindow { handles } => {
				let window = state.window_calls;
				state.window_calls += 1;
				if state.faults.timeout_windows.contains(&window) {
					return Err(ChannelError::Timeout {
						after: options.timeout.unwrap_or(Duration::from_secs(1)),
					});
				}
				let mut bytes = Vec::new();
				for handle in handles {
					Self::record(state, handle.addr()).encode(&mut bytes);
				}
				Ok(Self::aggregate(state, handles.len(), bytes))
			}
			Expr::ResolveNamed { name } => {
				if state.faults.timeout_named {
					return Err(ChannelError::Timeout {
						after: options.timeout.unwrap_or(Duration::from_secs(1)),
					});
				}
				let handle = state.graph.by_name.get(name).map(|&idx| state.graph.classes[idx].handle);
				let mut bytes = Vec::new();
				let count = match handle {
					Some(handle) => {
						Self::record(state, handle).encode(&mut bytes);
						1
					}
					None => 0,
				};
				Ok(Self::aggregate(state, count, bytes))
			}
			Expr::MemberTable { handle } => Self::member_table(state, handle.addr()),
			Expr::MethodImplementation {
				class_name,
				selector,
				class_method,
			} => Ok(Self::method_imp(state, class_name, selector, *class_method)),
		}
	}

	fn read_memory(&self, address: u64, len: usize) -> Result<Vec<u8>> {
		if self.state.lock().identity.is_none() {
			return Err(ChannelError::NoProcess);
		}
		if !self.is_stopped() {
			return Err(ChannelError::TargetNotStopped);
		}
		self.reads.fetch_add(1, Ordering::Relaxed);
		self.state.lock().memory.read(address, len)
	}
}
