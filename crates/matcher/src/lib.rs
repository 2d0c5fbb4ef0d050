//! Name matching for object-model lookups.
//!
//! A lookup spec compiles into one of three [`Pattern`]s:
//!
//! | Spec | Mode | Pattern | Case |
//! |---|---|---|---|
//! | no `*` / `?` | [`MatchMode::ClassName`] | [`Pattern::Exact`] | sensitive |
//! | no `*` / `?` | [`MatchMode::Member`] | [`Pattern::Substring`] | insensitive |
//! | contains `*` or `?` | either | [`Pattern::Wildcard`] | insensitive |
//!
//! `*` matches any run of characters (including none) and `?` exactly one.
//! Wildcards are anchored at both ends: `IDS*` matches `IDSService` but not
//! `NSIDSService`. There is no regular-expression syntax.
//!
//! Patterns are immutable and matching has no side effects, so a compiled
//! pattern can be shared across threads; [`match_list_parallel`] does so for
//! large candidate lists.

mod list;
mod pattern;
mod wildcard;

pub use list::{match_list, match_list_parallel};
pub use pattern::{MatchMode, Pattern, compile, compile_with};
pub use wildcard::Wildcard;
