//! Core types for object-model introspection: handles, identities, entity views and signatures.

/// Entity views and lazily fetched member metadata.
pub mod entity;
/// Identifier types for inspected processes and target-side entities.
pub mod ids;
/// Method signature parsing (`-[Class sel]` / `+[Class sel]`).
pub mod signature;

pub use entity::{EntityView, IvarInfo, Members, MethodInfo, PropertyInfo};
pub use ids::{EntityHandle, ProcessIdentity};
pub use signature::{MethodKind, MethodSignature, SignatureError};
