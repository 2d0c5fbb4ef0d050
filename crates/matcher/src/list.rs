use crate::pattern::Pattern;

/// Below this many candidates per thread, spawning is slower than matching.
const MIN_ITEMS_PER_THREAD: usize = 2500;

/// Indices of `haystacks` matching `pattern`, in input order.
pub fn match_list<S: AsRef<str>>(pattern: &Pattern, haystacks: &[S]) -> Vec<usize> {
	let mut matches = Vec::new();
	match_list_impl(pattern, haystacks, 0, &mut matches);
	matches
}

fn match_list_impl<S: AsRef<str>>(pattern: &Pattern, haystacks: &[S], index_offset: usize, out: &mut Vec<usize>) {
	if pattern.matches_all() {
		out.extend(index_offset..index_offset + haystacks.len());
		return;
	}
	for (idx, haystack) in haystacks.iter().enumerate() {
		if pattern.matches(haystack.as_ref()) {
			out.push(index_offset + idx);
		}
	}
}

/// Like [`match_list`], splitting large inputs across scoped threads.
///
/// Output order is the input order regardless of thread count.
pub fn match_list_parallel<S: AsRef<str> + Sync>(pattern: &Pattern, haystacks: &[S], max_threads: usize) -> Vec<usize> {
	let thread_count = (haystacks.len() / MIN_ITEMS_PER_THREAD).clamp(1, max_threads.max(1));
	if thread_count == 1 || pattern.matches_all() {
		return match_list(pattern, haystacks);
	}

	let items_per_thread = haystacks.len().div_ceil(thread_count);
	let mut matches = Vec::new();

	std::thread::scope(|s| {
		let mut tasks = Vec::with_capacity(thread_count);
		for (thread_idx, chunk) in haystacks.chunks(items_per_thread).enumerate() {
			let index_offset = thread_idx * items_per_thread;
			tasks.push(s.spawn(move || {
				let mut local = Vec::new();
				match_list_impl(pattern, chunk, index_offset, &mut local);
				local
			}));
		}

		// Joining in spawn order keeps chunks, and therefore indices, ordered.
		for task in tasks {
			matches.extend(task.join().expect("parallel match worker panicked"));
		}
	});

	matches
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{MatchMode, compile, compile_with};

	#[test]
	fn list_preserves_order() {
		let names = ["NSArray", "NSString", "UIView", "NSSet"];
		assert_eq!(match_list(&compile("NS*"), &names), vec![0, 1, 3]);
		assert_eq!(match_list(&compile_with("", MatchMode::Member), &names), vec![0, 1, 2, 3]);
	}

	#[test]
	fn parallel_agrees_with_sequential() {
		let names: Vec<String> = (0..12_000).map(|i| format!("Class{i:05}")).collect();
		let pattern = compile("Class1?9*");
		assert_eq!(match_list_parallel(&pattern, &names, 4), match_list(&pattern, &names));
		assert_eq!(match_list_parallel(&pattern, &names, 4).len(), 200);
	}
}
