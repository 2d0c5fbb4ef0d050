//! Method signature syntax.
//!
//! Signatures use the runtime's own notation: `-[NSString length]` names an
//! instance method, `+[NSDate date]` a class method. Selectors may contain
//! colons and, for multi-part selectors, no whitespace.

use std::fmt;
use std::str::FromStr;

/// Errors produced while parsing a method signature.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
	#[error("expected -[ClassName selector:] or +[ClassName selector:]")]
	MissingPrefix,
	#[error("expected whitespace between class name and selector in {0:?}")]
	MissingSelector(String),
}

/// Which side of the class a method lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
	/// `-`: looked up on the class.
	Instance,
	/// `+`: looked up on the metaclass.
	Class,
}

impl MethodKind {
	/// The sigil used in signature syntax.
	pub const fn sigil(self) -> char {
		match self {
			MethodKind::Instance => '-',
			MethodKind::Class => '+',
		}
	}
}

/// A parsed `±[Class selector]` signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
	pub kind: MethodKind,
	pub class_name: String,
	pub selector: String,
}

impl MethodSignature {
	/// Creates a signature from parts.
	pub fn new(kind: MethodKind, class_name: impl Into<String>, selector: impl Into<String>) -> Self {
		Self {
			kind,
			class_name: class_name.into(),
			selector: selector.into(),
		}
	}

	/// Parses `-[ClassName selector:]` or `+[ClassName selector:]`.
	///
	/// Leading and trailing whitespace is ignored, and the closing bracket is
	/// optional.
	pub fn parse(input: &str) -> Result<Self, SignatureError> {
		let input = input.trim();
		let kind = if input.starts_with("-[") {
			MethodKind::Instance
		} else if input.starts_with("+[") {
			MethodKind::Class
		} else {
			return Err(SignatureError::MissingPrefix);
		};

		let body = &input[2..];
		let body = body.strip_suffix(']').unwrap_or(body);

		let Some((class_name, selector)) = body.trim().split_once(char::is_whitespace) else {
			return Err(SignatureError::MissingSelector(input.to_owned()));
		};
		let selector = selector.trim();
		if class_name.is_empty() || selector.is_empty() {
			return Err(SignatureError::MissingSelector(input.to_owned()));
		}

		Ok(Self::new(kind, class_name, selector))
	}

	/// Returns true for `+` methods.
	pub fn is_class_method(&self) -> bool {
		self.kind == MethodKind::Class
	}
}

impl FromStr for MethodSignature {
	type Err = SignatureError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl fmt::Display for MethodSignature {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}[{} {}]", self.kind.sigil(), self.class_name, self.selector)
	}
}
