/*!
The `dsv` crate provides a streaming parser for delimited text: CSV in the
RFC 4180 family, extended with configurable quoting and escaping, comment
lines, auto-detection of delimiters and newlines, header interpretation, and
chunked consumption of in-memory or remote inputs.

# Brief overview

The two types most programs touch are [`ParserBuilder`], which holds the
configuration and callbacks for one parse, and [`ParseOutput`], the final
data/errors/metadata bundle. Underneath, the [`dsv-core`](dsv_core) crate's
[`Scanner`] walks the text one buffer at a time and the [`Streamer`] feeds
it chunks, carrying the unconsumed tail of each buffer over to the next.

Malformed input never stops a parse: quoting problems, an undetectable
delimiter and header/row width mismatches are recorded as [`ParseError`]
values in the results while parsing continues. Only configuration
contradictions and transport failures are fatal ([`Error`]).

# Example

Parse a string with headers:

```
let mut builder = dsv::ParserBuilder::new();
builder.header(true);
let out = builder.parse_str("city,pop\nBoston,4628910\nConcord,42695")?;

assert_eq!(out.data.len(), 2);
let boston = out.data[0].keyed().unwrap();
assert_eq!(boston.get("pop"), Some("4628910"));
assert_eq!(out.meta.fields.as_deref(), Some(&["city".to_string(), "pop".to_string()][..]));
# Ok::<(), dsv::Error>(())
```

Stream a large input row by row with bounded memory:

```
let mut builder = dsv::ParserBuilder::new();
builder.chunk_size(64).on_step(|step, _handle| {
    // one row at a time; nothing accumulates
    assert!(!step.row.is_empty());
});
let big = "a,b\n".repeat(1000);
let out = builder.parse_str(&big)?;
assert!(out.data.is_empty());
# Ok::<(), dsv::Error>(())
```

# Remote input

Remote resources are ingested through the [`RangeFetcher`] trait, a minimal
byte-range contract; this crate ships no HTTP stack. See
[`ParserBuilder::parse_remote`].
*/

#![deny(missing_docs)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub use dsv_core::{
    is_valid_delimiter, Newline, ParseError, ParseErrorCode, ParseErrorKind,
    Scan, Scanner, ScannerBuilder, BAD_DELIMITERS, BYTE_ORDER_MARK,
    RECORD_SEPARATOR, UNIT_SEPARATOR,
};

pub use crate::error::{Error, ErrorKind, Result};
pub use crate::record::{
    KeyedRow, KeyedRowIter, ParseMeta, ParseOutput, Row, PARSED_EXTRA_KEY,
};
pub use crate::streamer::{
    AbortHandle, ChunkResult, ParserBuilder, SkipEmptyLines, StepResult,
    Streamer,
};
pub use crate::transport::{
    Chunk, ChunkSource, RangeFetcher, RangeRequest, RangeResponse,
    RemoteSource, StringSource,
};

mod detect;
mod error;
mod header;
mod record;
mod serializer;
mod streamer;
mod transport;

/// Parse an in-memory string with the default configuration.
///
/// # Example
///
/// ```
/// let out = dsv::parse_str("a,b\nc,d")?;
/// assert_eq!(out.data.len(), 2);
/// # Ok::<(), dsv::Error>(())
/// ```
pub fn parse_str(input: &str) -> Result<ParseOutput> {
    ParserBuilder::new().parse_str(input)
}

static REMOTE_CHUNK_SIZE: AtomicUsize = AtomicUsize::new(5 * 1024 * 1024);
static DEFAULT_DELIMITER: Mutex<Option<String>> = Mutex::new(None);

/// The process-wide default for bytes requested per remote range.
///
/// Builders snapshot this value when they are created.
pub fn remote_chunk_size() -> usize {
    REMOTE_CHUNK_SIZE.load(Ordering::Relaxed)
}

/// Change the process-wide default for bytes requested per remote range.
pub fn set_remote_chunk_size(bytes: usize) {
    REMOTE_CHUNK_SIZE.store(bytes.max(1), Ordering::Relaxed);
}

/// The process-wide delimiter used when auto-detection fails.
///
/// Builders snapshot this value when they are created. Unless changed with
/// [`set_default_delimiter`], it is `","`.
pub fn default_delimiter() -> String {
    let guard = DEFAULT_DELIMITER
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.clone().unwrap_or_else(|| ",".to_string())
}

/// Change the process-wide delimiter used when auto-detection fails.
pub fn set_default_delimiter(delim: &str) {
    let mut guard = DEFAULT_DELIMITER
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = Some(delim.to_string());
}
