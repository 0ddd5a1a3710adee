/*!
`dsv-core` provides the scanner underneath the [`dsv`](https://docs.rs/dsv)
crate: a resumable state machine that walks delimited text and emits rows of
fields, malformed-quote diagnostics and a cursor.

The scanner is deliberately small. It knows nothing about headers, delimiter
guessing, chunk transports or callbacks; all of that lives in `dsv`. What it
does know is how to be fed a buffer that may end in the middle of a row and
hand back only the rows whose terminators it has actually seen, so a larger
buffer can complete the rest on a later call.

# Example

This example scans two rows and shows the cursor landing at the end of the
input once every row has been committed.

```
use dsv_core::{Scanner, ScannerBuilder};

let mut scanner = ScannerBuilder::new().build();
let scan = scanner.scan("a,b,c\nx,y,z", 0, false);
assert_eq!(scan.rows, vec![
    vec!["a".to_string(), "b".to_string(), "c".to_string()],
    vec!["x".to_string(), "y".to_string(), "z".to_string()],
]);
assert!(scan.errors.is_empty());
assert_eq!(scan.cursor, 11);
```

# Partial input

Passing `ignore_last_row = true` tells the scanner the buffer may be a
prefix of the real input. Any row whose terminator has not been seen is
withheld and the cursor is left at the start of that row, so the caller can
re-feed everything from the cursor onward together with more data:

```
use dsv_core::ScannerBuilder;

let mut scanner = ScannerBuilder::new().build();
let scan = scanner.scan("a,b\nc,", 0, true);
assert_eq!(scan.rows.len(), 1);
assert_eq!(scan.cursor, 4);
```
*/

#![deny(missing_docs)]

pub use crate::scanner::{
    Newline, ParseError, ParseErrorCode, ParseErrorKind, Scan, Scanner,
    ScannerBuilder,
};

mod scanner;
#[cfg(feature = "serde")]
mod serde_impl;

/// The ASCII record separator (`0x1E`).
///
/// Together with [`UNIT_SEPARATOR`] this forms the classic ASCII-delimited
/// text configuration, and both are part of the default candidate set for
/// delimiter detection in `dsv`.
pub const RECORD_SEPARATOR: char = '\x1e';

/// The ASCII unit separator (`0x1F`).
pub const UNIT_SEPARATOR: char = '\x1f';

/// The Unicode byte order mark, stripped when it leads the input.
pub const BYTE_ORDER_MARK: char = '\u{feff}';

/// Characters that may never appear in a delimiter.
///
/// A delimiter containing any of these would be indistinguishable from row
/// terminators, quotes or the leading byte order mark.
pub const BAD_DELIMITERS: &[char] = &['\r', '\n', '"', BYTE_ORDER_MARK];

/// Returns true if `delim` is non-empty and contains no forbidden character.
pub fn is_valid_delimiter(delim: &str) -> bool {
    !delim.is_empty() && !delim.chars().any(|c| BAD_DELIMITERS.contains(&c))
}
