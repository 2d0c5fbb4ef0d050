use std::collections::BTreeSet;

use crate::ids::EntityHandle;

/// Caller-owned copy of a cached entity.
///
/// Views never borrow from a cache generation, so they stay valid across
/// reloads and clears. The superclass is carried both as a lookup key and,
/// when the cache could resolve it, as a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityView {
	pub handle: EntityHandle,
	pub name: String,
	pub is_metaclass: bool,
	pub superclass: Option<EntityHandle>,
	pub superclass_name: Option<String>,
	pub protocols: BTreeSet<String>,
}

impl EntityView {
	/// Returns true if the entity declares conformance to `protocol` (exact name).
	pub fn conforms_to(&self, protocol: &str) -> bool {
		self.protocols.contains(protocol)
	}

	/// Returns true if the entity has no superclass.
	pub fn is_root(&self) -> bool {
		self.superclass.is_none()
	}
}

/// A method as reported by the target runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
	pub selector: String,
	pub type_encoding: String,
	/// Implementation address; zero when the runtime reported none.
	pub imp: u64,
}

/// An instance variable declared by a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvarInfo {
	pub name: String,
	pub type_encoding: String,
	pub offset: u64,
}

/// A declared property and its raw attribute string (e.g. `T@"NSString",C,N`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
	pub name: String,
	pub attributes: String,
}

/// Member metadata of one entity, fetched on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Members {
	/// Instance methods (`-`).
	pub methods: Vec<MethodInfo>,
	/// Class methods (`+`), taken from the metaclass.
	pub class_methods: Vec<MethodInfo>,
	pub ivars: Vec<IvarInfo>,
	pub properties: Vec<PropertyInfo>,
}

impl Members {
	/// Total number of members of every kind.
	pub fn len(&self) -> usize {
		self.methods.len() + self.class_methods.len() + self.ivars.len() + self.properties.len()
	}

	/// Returns true if no member of any kind is present.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
