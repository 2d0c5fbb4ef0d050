use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<T> {
	/// `*`
	Star,
	/// `?`
	One,
	/// Case-folded literal.
	Lit(T),
}

/// A compiled case-insensitive glob.
///
/// Literals are folded at compile time. ASCII patterns keep a byte program
/// so ASCII candidates (the overwhelmingly common case for runtime names) are
/// matched without decoding or allocating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wildcard {
	source: String,
	chars: Vec<Token<char>>,
	bytes: Option<Vec<Token<u8>>>,
}

#[inline]
fn fold_char(c: char) -> char {
	if c.is_ascii() {
		c.to_ascii_lowercase()
	} else {
		c.to_lowercase().next().unwrap_or(c)
	}
}

impl Wildcard {
	/// Compiles `source`; every character other than `*` and `?` is literal.
	pub fn new(source: &str) -> Self {
		let mut chars: Vec<Token<char>> = Vec::with_capacity(source.len());
		for c in source.chars() {
			let token = match c {
				'*' => Token::Star,
				'?' => Token::One,
				c => Token::Lit(fold_char(c)),
			};
			// Consecutive stars are equivalent to one.
			if token == Token::Star && chars.last() == Some(&Token::Star) {
				continue;
			}
			chars.push(token);
		}

		let bytes = source.is_ascii().then(|| {
			chars
				.iter()
				.map(|t| match *t {
					Token::Star => Token::Star,
					Token::One => Token::One,
					Token::Lit(c) => Token::Lit(c as u8),
				})
				.collect()
		});

		Self {
			source: source.to_owned(),
			chars,
			bytes,
		}
	}

	/// The glob as written.
	pub fn as_str(&self) -> &str {
		&self.source
	}

	/// Returns true if the whole of `candidate` matches.
	pub fn matches(&self, candidate: &str) -> bool {
		match &self.bytes {
			Some(program) if candidate.is_ascii() => {
				run(program, candidate.as_bytes(), |b: u8| b.to_ascii_lowercase())
			}
			_ => {
				let text: Vec<char> = candidate.chars().collect();
				run(&self.chars, &text, fold_char)
			}
		}
	}
}

impl fmt::Display for Wildcard {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.source)
	}
}

/// Greedy matcher with single-star backtracking; linear in practice,
/// `O(pattern * text)` worst case.
fn run<T: Copy + PartialEq>(program: &[Token<T>], text: &[T], fold: impl Fn(T) -> T) -> bool {
	let (mut p, mut t) = (0, 0);
	// Position after the most recent star, and the text index it is anchored at.
	let mut resume: Option<(usize, usize)> = None;

	while t < text.len() {
		match program.get(p) {
			Some(Token::Star) => {
				resume = Some((p + 1, t));
				p += 1;
				continue;
			}
			Some(Token::One) => {
				p += 1;
				t += 1;
				continue;
			}
			Some(Token::Lit(c)) if *c == fold(text[t]) => {
				p += 1;
				t += 1;
				continue;
			}
			_ => {}
		}

		match resume {
			Some((after_star, anchor)) => {
				p = after_star;
				t = anchor + 1;
				resume = Some((after_star, anchor + 1));
			}
			None => return false,
		}
	}

	program[p..].iter().all(|tok| *tok == Token::Star)
}
