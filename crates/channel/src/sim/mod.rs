//! Simulated target runtime.
//!
//! [`SimTarget`] implements [`crate::AccessChannel`] against an in-memory
//! class graph described by [`SimRuntime`]. Expressions are interpreted
//! structurally and their aggregate results are laid out in simulated target
//! memory with the real record formats, so decoders exercise the same byte
//! paths they would against a live debugger.
//!
//! Every call is counted per [`crate::ExprKind`], and faults (unresolvable
//! handles, unreadable names, window timeouts, latency, running state,
//! relaunches, forced superclass links) can be injected.

mod memory;
mod target;

pub use target::{Faults, SimTarget};

/// One class of the simulated runtime.
#[derive(Debug, Clone, Default)]
pub struct SimClass {
	pub name: String,
	pub superclass: Option<String>,
	pub protocols: Vec<String>,
	pub methods: Vec<(String, String)>,
	pub class_methods: Vec<(String, String)>,
	pub ivars: Vec<(String, String, u64)>,
	pub properties: Vec<(String, String)>,
}

impl SimClass {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			..Default::default()
		}
	}

	pub fn superclass(mut self, name: impl Into<String>) -> Self {
		self.superclass = Some(name.into());
		self
	}

	pub fn protocol(mut self, name: impl Into<String>) -> Self {
		self.protocols.push(name.into());
		self
	}

	pub fn method(mut self, selector: impl Into<String>, types: impl Into<String>) -> Self {
		self.methods.push((selector.into(), types.into()));
		self
	}

	pub fn class_method(mut self, selector: impl Into<String>, types: impl Into<String>) -> Self {
		self.class_methods.push((selector.into(), types.into()));
		self
	}

	pub fn ivar(mut self, name: impl Into<String>, types: impl Into<String>, offset: u64) -> Self {
		self.ivars.push((name.into(), types.into(), offset));
		self
	}

	pub fn property(mut self, name: impl Into<String>, attributes: impl Into<String>) -> Self {
		self.properties.push((name.into(), attributes.into()));
		self
	}
}

/// Class graph of a simulated process.
#[derive(Debug, Clone, Default)]
pub struct SimRuntime {
	pub classes: Vec<SimClass>,
}

impl SimRuntime {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, class: SimClass) -> Self {
		self.classes.push(class);
		self
	}

	/// A small Foundation-like graph used across tests.
	pub fn foundation() -> Self {
		Self::new()
			.with(
				SimClass::new("NSObject")
					.protocol("NSObject")
					.method("init", "@16@0:8")
					.method("description", "@16@0:8")
					.class_method("alloc", "@16@0:8")
					.ivar("isa", "#", 0),
			)
			.with(
				SimClass::new("NSString")
					.superclass("NSObject")
					.protocol("NSCopying")
					.protocol("NSSecureCoding")
					.method("length", "Q16@0:8")
					.method("stringValue", "@16@0:8")
					.method("characterAtIndex:", "S24@0:8Q16")
					.class_method("stringWithFormat:", "@24@0:8@16")
					.property("length", "TQ,R,N"),
			)
			.with(
				SimClass::new("NSMutableString")
					.superclass("NSString")
					.method("appendString:", "v24@0:8@16"),
			)
			.with(
				SimClass::new("NSDate")
					.superclass("NSObject")
					.protocol("NSCopying")
					.class_method("date", "@16@0:8")
					.method("timeIntervalSinceNow", "d16@0:8"),
			)
			.with(
				SimClass::new("IDSService")
					.superclass("NSObject")
					.method("serviceIdentifier", "@16@0:8")
					.method("_internal", "@16@0:8")
					.method("_initWithService:", "@24@0:8@16")
					.ivar("_serviceIdentifier", "@\"NSString\"", 8)
					.property("serviceIdentifier", "T@\"NSString\",R,N,V_serviceIdentifier"),
			)
			.with(SimClass::new("NSIDSService").superclass("IDSService"))
			.with(SimClass::new("_UIView").superclass("NSObject"))
			.with(SimClass::new("_UIXView").superclass("_UIView"))
	}

	/// `count` generated classes (`Synth00000`, ...) under a single `NSObject` root.
	pub fn synthetic(count: usize) -> Self {
		let mut runtime = Self::new().with(SimClass::new("NSObject"));
		for i in 0..count {
			runtime = runtime.with(
				SimClass::new(format!("Synth{i:05}"))
					.superclass("NSObject")
					.method(format!("value{i}"), "@16@0:8"),
			);
		}
		runtime
	}
}
