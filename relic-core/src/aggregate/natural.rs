//! Numeric-aware string ordering
//!
//! Digit runs compare by value and other runs lexicographically, so "10.0"
//! sorts after "2.0". Digit runs sort before text runs.

use std::cmp::Ordering;

#[derive(Debug, PartialEq, Eq)]
enum Chunk<'a> {
    Number(&'a str),
    Text(&'a str),
}

fn chunks(s: &str) -> Vec<Chunk<'_>> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut digits = None;
    for (index, c) in s.char_indices() {
        let is_digit = c.is_ascii_digit();
        match digits {
            Some(previous) if previous != is_digit => {
                chunks.push(chunk(&s[start..index], previous));
                start = index;
            }
            _ => {}
        }
        digits = Some(is_digit);
    }
    if let Some(previous) = digits {
        chunks.push(chunk(&s[start..], previous));
    }
    chunks
}

fn chunk(s: &str, digits: bool) -> Chunk<'_> {
    if digits {
        Chunk::Number(s)
    } else {
        Chunk::Text(s)
    }
}

fn compare_numbers(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Total order: natural comparison, falling back to plain comparison on ties
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let left = chunks(a);
    let right = chunks(b);
    for (x, y) in left.iter().zip(right.iter()) {
        let ordering = match (x, y) {
            (Chunk::Number(x), Chunk::Number(y)) => compare_numbers(x, y),
            (Chunk::Text(x), Chunk::Text(y)) => x.cmp(y),
            (Chunk::Number(_), Chunk::Text(_)) => Ordering::Less,
            (Chunk::Text(_), Chunk::Number(_)) => Ordering::Greater,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left.len().cmp(&right.len()).then_with(|| a.cmp(b))
}
