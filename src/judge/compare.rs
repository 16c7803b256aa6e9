//! Output comparison.
//!
//! Both sides have every `'\n'` removed before an exact comparison, so line
//! breaks are ignored while spaces, tabs and carriage returns still count.

/// True when the outputs are equal once newlines are dropped.
pub(crate) fn outputs_match(actual: &str, expected: &str) -> bool {
    strip_newlines(actual).eq(strip_newlines(expected))
}

fn strip_newlines(s: &str) -> impl Iterator<Item = char> + '_ {
    s.chars().filter(|&c| c != '\n')
}
