use std::fmt;

use crate::wildcard::Wildcard;

/// How a wildcard-free spec is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MatchMode {
	/// Class lookups: a plain spec is an exact, case-sensitive name.
	#[default]
	ClassName,
	/// Member (selector, ivar, property, protocol) lookups: a plain spec is a
	/// case-insensitive substring.
	Member,
}

/// A compiled lookup spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
	/// Case-sensitive whole-name equality. Eligible for the fast path.
	Exact(String),
	/// Case-insensitive containment. An empty needle matches everything.
	Substring {
		needle: String,
		folded: String,
	},
	/// Case-insensitive anchored glob.
	Wildcard(Wildcard),
}

/// Compiles `spec` as a class-name lookup.
pub fn compile(spec: &str) -> Pattern {
	Pattern::compile(spec, MatchMode::ClassName)
}

/// Compiles `spec` in the given mode.
pub fn compile_with(spec: &str, mode: MatchMode) -> Pattern {
	Pattern::compile(spec, mode)
}

impl Pattern {
	/// Compiles `spec`.
	///
	/// Surrounding whitespace is ignored. An empty spec matches every
	/// candidate in either mode.
	pub fn compile(spec: &str, mode: MatchMode) -> Self {
		let spec = spec.trim();
		if spec.contains(['*', '?']) {
			return Pattern::Wildcard(Wildcard::new(spec));
		}
		match mode {
			MatchMode::ClassName if !spec.is_empty() => Pattern::Exact(spec.to_owned()),
			_ => Pattern::substring(spec),
		}
	}

	fn substring(needle: &str) -> Self {
		Pattern::Substring {
			needle: needle.to_owned(),
			folded: needle.to_lowercase(),
		}
	}

	/// Returns true if `candidate` satisfies the pattern.
	pub fn matches(&self, candidate: &str) -> bool {
		match self {
			Pattern::Exact(name) => name == candidate,
			Pattern::Substring { needle, folded } => {
				if needle.is_empty() {
					true
				} else if needle.is_ascii() && candidate.is_ascii() {
					candidate
						.as_bytes()
						.windows(needle.len())
						.any(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
				} else {
					candidate.to_lowercase().contains(folded.as_str())
				}
			}
			Pattern::Wildcard(glob) => glob.matches(candidate),
		}
	}

	/// Returns true for [`Pattern::Exact`].
	pub fn is_exact(&self) -> bool {
		matches!(self, Pattern::Exact(_))
	}

	/// The exact name, if this is an exact pattern.
	pub fn as_exact(&self) -> Option<&str> {
		match self {
			Pattern::Exact(name) => Some(name),
			_ => None,
		}
	}

	/// Returns true if every candidate matches.
	pub fn matches_all(&self) -> bool {
		match self {
			Pattern::Substring { needle, .. } => needle.is_empty(),
			Pattern::Wildcard(glob) => glob.as_str().chars().all(|c| c == '*'),
			Pattern::Exact(_) => false,
		}
	}
}

impl fmt::Display for Pattern {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Pattern::Exact(name) => f.write_str(name),
			Pattern::Substring { needle, .. } => f.write_str(needle),
			Pattern::Wildcard(glob) => fmt::Display::fmt(glob, f),
		}
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use proptest::prelude::*;

	use super::*;

	#[test]
	fn plain_class_spec_is_exact() {
		assert_eq!(compile("NSString"), Pattern::Exact("NSString".into()));
		assert!(compile("NSString").is_exact());
		assert!(!compile("NSString").matches("nsstring"));
		assert!(!compile("NSString").matches("NSMutableString"));
	}

	#[test]
	fn plain_member_spec_is_substring() {
		let pattern = compile_with("string", MatchMode::Member);
		let names = ["length", "stringValue", "init"];
		let hits: Vec<_> = names.iter().filter(|n| pattern.matches(n)).collect();
		assert_eq!(hits, vec![&"stringValue"]);
		assert!(pattern.matches("initWithSTRING:"));
	}

	#[test]
	fn wildcard_in_either_mode() {
		for mode in [MatchMode::ClassName, MatchMode::Member] {
			let pattern = compile_with("IDS*", mode);
			assert!(matches!(pattern, Pattern::Wildcard(_)));
			assert!(pattern.matches("IDSService"));
			assert!(!pattern.matches("NSIDSService"));
		}
	}

	#[test]
	fn empty_spec_matches_everything() {
		let pattern = compile("  ");
		assert!(pattern.matches_all());
		assert!(pattern.matches("anything"));
		assert!(compile_with("", MatchMode::Member).matches(""));
		assert!(compile("**").matches_all());
		assert!(!compile("NS*").matches_all());
	}

	#[test]
	fn non_ascii_substring_folds_case() {
		let pattern = compile_with("ÉTÉ", MatchMode::Member);
		assert!(pattern.matches("prefix_été_suffix"));
	}

	proptest! {
		#[test]
		fn star_wrapped_literal_agrees_with_substring(
			needle in "[A-Za-z_:]{1,8}",
			candidate in "[A-Za-z_:]{0,24}",
		) {
			let glob = compile(&format!("*{needle}*"));
			let substring = compile_with(&needle, MatchMode::Member);
			prop_assert_eq!(glob.matches(&candidate), substring.matches(&candidate));
		}

		#[test]
		fn exact_matches_only_itself(name in "[A-Za-z_][A-Za-z0-9_]{0,16}", other in "[A-Za-z0-9_]{0,16}") {
			let pattern = compile(&name);
			prop_assert!(pattern.matches(&name));
			prop_assert_eq!(pattern.matches(&other), name == other);
		}
	}
}
