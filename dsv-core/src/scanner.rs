use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use memchr::{memchr, memchr2, memchr3};

/// A row terminator.
///
/// The default is `Auto`, which watches for the first `\r` or `\n` outside a
/// quoted field and locks the matching sequence for the rest of the parse.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Newline {
    /// Detect the terminator from the input, then lock the choice.
    #[default]
    Auto,
    /// `\n`
    Lf,
    /// `\r`
    Cr,
    /// `\r\n`
    CrLf,
    /// An arbitrary single-character terminator, for formats that keep
    /// `\r` and `\n` as field content (such as ASCII-delimited text
    /// terminated by the record separator).
    Any(char),
}

impl Newline {
    /// The literal terminator sequence, or `None` when still undetected.
    pub fn sequence(&self) -> Option<String> {
        match *self {
            Newline::Auto => None,
            Newline::Lf => Some("\n".to_string()),
            Newline::Cr => Some("\r".to_string()),
            Newline::CrLf => Some("\r\n".to_string()),
            Newline::Any(c) => Some(c.to_string()),
        }
    }
}

/// The broad category of a [`ParseError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParseErrorKind {
    /// A malformed quoted field.
    Quotes,
    /// Delimiter detection gave up.
    Delimiter,
    /// A row's field count disagrees with the header's.
    FieldMismatch,
}

impl ParseErrorKind {
    /// The stable wire name of this category.
    pub fn as_str(&self) -> &'static str {
        match *self {
            ParseErrorKind::Quotes => "Quotes",
            ParseErrorKind::Delimiter => "Delimiter",
            ParseErrorKind::FieldMismatch => "FieldMismatch",
        }
    }
}

/// The precise code of a [`ParseError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParseErrorCode {
    /// A quoted field was never closed before end of input.
    MissingQuotes,
    /// A closing quote was followed by something other than a delimiter or
    /// a row terminator.
    InvalidQuotes,
    /// No candidate delimiter split any probed row.
    UndetectableDelimiter,
    /// A row has fewer fields than the header.
    TooFewFields,
    /// A row has more fields than the header.
    TooManyFields,
}

impl ParseErrorCode {
    /// The category this code belongs to.
    pub fn kind(&self) -> ParseErrorKind {
        match *self {
            ParseErrorCode::MissingQuotes | ParseErrorCode::InvalidQuotes => {
                ParseErrorKind::Quotes
            }
            ParseErrorCode::UndetectableDelimiter => ParseErrorKind::Delimiter,
            ParseErrorCode::TooFewFields | ParseErrorCode::TooManyFields => {
                ParseErrorKind::FieldMismatch
            }
        }
    }

    /// The stable wire name of this code.
    pub fn as_str(&self) -> &'static str {
        match *self {
            ParseErrorCode::MissingQuotes => "MissingQuotes",
            ParseErrorCode::InvalidQuotes => "InvalidQuotes",
            ParseErrorCode::UndetectableDelimiter => "UndetectableDelimiter",
            ParseErrorCode::TooFewFields => "TooFewFields",
            ParseErrorCode::TooManyFields => "TooManyFields",
        }
    }
}

/// A non-fatal problem recorded while parsing.
///
/// Parse errors never stop a parse. They are appended to the scan or parse
/// results and the parser continues best-effort.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseError {
    /// The precise code; the category is implied by it.
    pub code: ParseErrorCode,
    /// A human readable description.
    pub message: String,
    /// Zero-based index of the affected data row.
    ///
    /// Within a [`Scan`] this is an index into [`Scan::rows`]; the driver
    /// renumbers it to an index over emitted data rows (post header, post
    /// empty-line filtering). Errors in the header row carry `None`.
    pub row: Option<usize>,
    /// Byte offset within the affected row at which the problem was seen.
    pub index: Option<usize>,
}

impl ParseError {
    /// Create an error with no row or offset attribution.
    pub fn new(code: ParseErrorCode, message: impl Into<String>) -> ParseError {
        ParseError { code, message: message.into(), row: None, index: None }
    }

    /// The category of this error.
    #[inline]
    pub fn kind(&self) -> ParseErrorKind {
        self.code.kind()
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}: {}", self.kind().as_str(), self.code.as_str(), self.message)?;
        if let Some(row) = self.row {
            write!(f, " (row {})", row)?;
        }
        if let Some(index) = self.index {
            write!(f, " (index {})", index)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// The outcome of one [`Scanner::scan`] call.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Scan {
    /// Fully terminated rows, in document order.
    pub rows: Vec<Vec<String>>,
    /// For each row in `rows`, the absolute offset just past its terminator
    /// (or the end of input for a final unterminated row).
    pub row_ends: Vec<usize>,
    /// Problems found, with `row` indices local to `rows`.
    pub errors: Vec<ParseError>,
    /// Absolute offset up to which rows have been committed.
    pub cursor: usize,
    /// Whether the abort flag stopped this scan at a row boundary.
    pub aborted: bool,
}

/// Builds a scanner with various configuration knobs.
///
/// Once a [`Scanner`] is built its configuration cannot be changed; the only
/// state it carries between calls is the newline choice once detected.
#[derive(Clone, Debug, Default)]
pub struct ScannerBuilder {
    scanner: Scanner,
}

impl ScannerBuilder {
    /// Create a new builder.
    pub fn new() -> ScannerBuilder {
        ScannerBuilder::default()
    }

    /// Build a scanner from this configuration.
    pub fn build(&self) -> Scanner {
        self.scanner.clone()
    }

    /// The field delimiter, one or more characters.
    ///
    /// The default is `","`. The delimiter must not contain `\r`, `\n`, the
    /// quote character or the byte order mark; callers are expected to
    /// validate with [`crate::is_valid_delimiter`] before configuring it.
    pub fn delimiter(&mut self, delim: &str) -> &mut ScannerBuilder {
        self.scanner.delim = delim.to_string();
        self
    }

    /// The quote character. The default is `"`.
    pub fn quote(&mut self, quote: char) -> &mut ScannerBuilder {
        self.scanner.quote = quote;
        self
    }

    /// The character that escapes a quote inside a quoted field.
    ///
    /// The default equals the quote character, which selects RFC 4180
    /// doubled-quote escaping. Any other choice makes `escape` + quote read
    /// as a literal quote.
    pub fn escape(&mut self, escape: char) -> &mut ScannerBuilder {
        self.scanner.escape = escape;
        self
    }

    /// The row terminator. The default is [`Newline::Auto`].
    pub fn newline(&mut self, newline: Newline) -> &mut ScannerBuilder {
        self.scanner.newline = newline;
        self
    }

    /// Skip lines that start with this string.
    ///
    /// Comment lines produce no row and do not advance row counts. Disabled
    /// by default.
    pub fn comment(&mut self, comment: Option<&str>) -> &mut ScannerBuilder {
        self.scanner.comment = comment.map(|c| c.to_string());
        self
    }

    /// Stop each scan after this many rows have been emitted.
    ///
    /// Used by delimiter detection to probe a bounded sample. Disabled by
    /// default.
    pub fn row_limit(&mut self, limit: Option<usize>) -> &mut ScannerBuilder {
        self.scanner.row_limit = limit;
        self
    }

    /// Poll this flag at every row boundary and stop scanning once it is
    /// set.
    pub fn abort_flag(&mut self, flag: Arc<AtomicBool>) -> &mut ScannerBuilder {
        self.scanner.abort = Some(flag);
        self
    }

    /// A convenience preset for ASCII-delimited text: sets the field
    /// delimiter to the ASCII unit separator (`\x1F`) and the row
    /// terminator to the ASCII record separator (`\x1E`).
    pub fn ascii(&mut self) -> &mut ScannerBuilder {
        self.scanner.delim = crate::UNIT_SEPARATOR.to_string();
        self.scanner.newline = Newline::Any(crate::RECORD_SEPARATOR);
        self
    }
}

/// A resumable scanner for delimited text.
///
/// The scanner walks a text buffer with a two-mode state machine (unquoted
/// and quoted) and emits rows of owned fields. It can be invoked repeatedly
/// on extending buffers: with `ignore_last_row` set, any row whose
/// terminator has not yet been seen is withheld and the cursor points at the
/// start of that row, so the unconsumed tail can be re-fed later together
/// with more input.
#[derive(Clone, Debug)]
pub struct Scanner {
    /// The delimiter between fields, at least one character.
    delim: String,
    /// The quote character.
    quote: char,
    /// The quote-escape character; equal to `quote` selects doubling.
    escape: char,
    /// The row terminator, locked in place once detected.
    newline: Newline,
    /// When set, lines starting with this string are skipped.
    comment: Option<String>,
    /// When set, each scan stops after this many rows.
    row_limit: Option<usize>,
    /// Polled at row boundaries.
    abort: Option<Arc<AtomicBool>>,
}

impl Default for Scanner {
    fn default() -> Scanner {
        Scanner {
            delim: ",".to_string(),
            quote: '"',
            escape: '"',
            newline: Newline::Auto,
            comment: None,
            row_limit: None,
            abort: None,
        }
    }
}

/// What a newline probe at a given offset found.
enum NlAt {
    /// No terminator here.
    NoMatch,
    /// A terminator of this byte length.
    Hit(usize),
    /// A `\r` at the end of a possibly-incomplete buffer; cannot decide
    /// between `\r` and `\r\n` yet.
    NeedMore,
}

/// How a comment line ended.
enum LineEnd {
    /// Offset just past the line's terminator.
    Hit(usize),
    /// See [`NlAt::NeedMore`].
    NeedMore,
    /// The line runs to the end of the buffer.
    Eof,
}

/// Why the scan loop stopped.
#[derive(PartialEq)]
enum Exit {
    /// Ran off the end of the buffer.
    Eof,
    /// A partial row was withheld for a later, longer buffer.
    Withheld,
    /// The abort flag or the row limit stopped the scan.
    Stopped,
    /// A trailing comment line consumed the rest of the buffer.
    CommentEof,
}

impl Scanner {
    /// Create a scanner with the default configuration.
    pub fn new() -> Scanner {
        ScannerBuilder::new().build()
    }

    /// The row terminator, which reflects the detected sequence once a
    /// terminator has been seen.
    pub fn newline(&self) -> Newline {
        self.newline
    }

    /// Scan `input` and return every row whose terminator was seen.
    ///
    /// `base` is the absolute offset of `input[0]` within the original
    /// document; reported cursors and row ends are absolute. When
    /// `ignore_last_row` is set the final row is withheld unless its
    /// terminator was seen, and the cursor is placed at the start of the
    /// withheld row; re-feeding from the cursor onward yields identical
    /// downstream results. When it is clear, end of input terminates the
    /// final row.
    pub fn scan(&mut self, input: &str, base: usize, ignore_last_row: bool) -> Scan {
        let mut scan = Scan { cursor: base, ..Scan::default() };
        if input.is_empty() {
            return scan;
        }

        let bytes = input.as_bytes();
        let len = bytes.len();
        let delim = self.delim.clone();
        let dbytes = delim.as_bytes();
        let d0 = dbytes[0];
        let dlen = dbytes.len();
        let mut qbuf = [0u8; 4];
        let quote_s = self.quote.encode_utf8(&mut qbuf).to_string();
        let qbytes = quote_s.as_bytes();
        let q0 = qbytes[0];
        let qlen = qbytes.len();
        let mut ebuf = [0u8; 4];
        let escape_s = self.escape.encode_utf8(&mut ebuf).to_string();
        let ebytes = escape_s.as_bytes();
        let e0 = ebytes[0];
        let elen = ebytes.len();
        let esc_differs = self.escape != self.quote;
        let comment = self.comment.clone();
        let quote = self.quote;
        let (n0, n1) = self.newline_probe_bytes();

        let mut pos = 0usize;
        // Offset just past the last committed row's terminator. This is
        // also the start of the row currently being scanned.
        let mut committed = 0usize;
        let mut row: Vec<String> = Vec::new();
        let mut field = String::new();

        let exit = 'rows: loop {
            if self.abort_requested() {
                scan.aborted = true;
                break Exit::Stopped;
            }
            if self.row_limit.map_or(false, |limit| scan.rows.len() >= limit) {
                break Exit::Stopped;
            }
            if pos >= len {
                break Exit::Eof;
            }

            // Comment lines are consumed whole and produce no row.
            if let Some(ref c) = comment {
                if bytes[pos..].starts_with(c.as_bytes()) {
                    match self.comment_end(bytes, pos, ignore_last_row) {
                        LineEnd::Hit(end) => {
                            pos = end;
                            committed = end;
                            continue 'rows;
                        }
                        LineEnd::NeedMore => break Exit::Withheld,
                        LineEnd::Eof => {
                            if ignore_last_row {
                                break Exit::Withheld;
                            }
                            committed = len;
                            break Exit::CommentEof;
                        }
                    }
                }
            }

            'fields: loop {
                // An opening quote at the start of a field switches to
                // quoted mode; anywhere else a quote is literal content.
                if bytes[pos..].starts_with(qbytes) {
                    pos += qlen;
                    let content_start = pos;
                    let mut seg = pos;
                    'quoted: loop {
                        let hit = if esc_differs {
                            memchr2(q0, e0, &bytes[pos..])
                        } else {
                            memchr(q0, &bytes[pos..])
                        };
                        let h = match hit {
                            Some(off) => pos + off,
                            None => {
                                scan.errors.push(ParseError {
                                    code: ParseErrorCode::MissingQuotes,
                                    message: "Quoted field unterminated".to_string(),
                                    row: Some(scan.rows.len()),
                                    index: Some(content_start - committed),
                                });
                                if ignore_last_row {
                                    break 'rows Exit::Withheld;
                                }
                                field.push_str(&input[seg..len]);
                                break 'rows Exit::Eof;
                            }
                        };
                        if esc_differs && bytes[h..].starts_with(ebytes) {
                            if bytes[h + elen..].starts_with(qbytes) {
                                field.push_str(&input[seg..h]);
                                field.push(quote);
                                pos = h + elen + qlen;
                                seg = pos;
                            } else {
                                // A lone escape character is literal.
                                pos = h + elen;
                            }
                            continue 'quoted;
                        }
                        if !bytes[h..].starts_with(qbytes) {
                            // A stray byte that merely resembles the quote.
                            pos = h + 1;
                            continue 'quoted;
                        }
                        if !esc_differs && bytes[h + qlen..].starts_with(qbytes) {
                            // A doubled quote is a literal quote.
                            field.push_str(&input[seg..h]);
                            field.push(quote);
                            pos = h + 2 * qlen;
                            seg = pos;
                            continue 'quoted;
                        }
                        // Candidate closing quote. Whitespace may sit
                        // between it and the delimiter or terminator.
                        let mut after = h + qlen;
                        while after < len
                            && (bytes[after] == b' ' || bytes[after] == b'\t')
                        {
                            after += 1;
                        }
                        if bytes[after..].starts_with(dbytes) {
                            field.push_str(&input[seg..h]);
                            row.push(mem::take(&mut field));
                            pos = after + dlen;
                            continue 'fields;
                        }
                        if after >= len {
                            if ignore_last_row {
                                break 'rows Exit::Withheld;
                            }
                            field.push_str(&input[seg..h]);
                            break 'rows Exit::Eof;
                        }
                        match self.newline_at(bytes, after, ignore_last_row) {
                            NlAt::Hit(nl) => {
                                field.push_str(&input[seg..h]);
                                row.push(mem::take(&mut field));
                                committed = after + nl;
                                scan.rows.push(mem::take(&mut row));
                                scan.row_ends.push(base + committed);
                                pos = committed;
                                continue 'rows;
                            }
                            NlAt::NeedMore => break 'rows Exit::Withheld,
                            NlAt::NoMatch => {
                                scan.errors.push(ParseError {
                                    code: ParseErrorCode::InvalidQuotes,
                                    message:
                                        "Trailing quote on quoted field is malformed"
                                            .to_string(),
                                    row: Some(scan.rows.len()),
                                    index: Some(h - committed),
                                });
                                // The quote reads as content; stay quoted.
                                pos = h + qlen;
                                continue 'quoted;
                            }
                        }
                    }
                }

                // Unquoted field: bulk-skip to the next byte that can end a
                // field or a row, buffering literal runs in one pass.
                let mut seg = pos;
                loop {
                    let hit = memchr3(d0, n0, n1, &bytes[pos..]);
                    let h = match hit {
                        Some(off) => pos + off,
                        None => {
                            if ignore_last_row {
                                break 'rows Exit::Withheld;
                            }
                            field.push_str(&input[seg..len]);
                            break 'rows Exit::Eof;
                        }
                    };
                    if bytes[h..].starts_with(dbytes) {
                        field.push_str(&input[seg..h]);
                        row.push(mem::take(&mut field));
                        pos = h + dlen;
                        continue 'fields;
                    }
                    match self.newline_at(bytes, h, ignore_last_row) {
                        NlAt::Hit(nl) => {
                            field.push_str(&input[seg..h]);
                            row.push(mem::take(&mut field));
                            committed = h + nl;
                            scan.rows.push(mem::take(&mut row));
                            scan.row_ends.push(base + committed);
                            pos = committed;
                            continue 'rows;
                        }
                        NlAt::NeedMore => break 'rows Exit::Withheld,
                        NlAt::NoMatch => {
                            // A lone carriage return (or a byte that only
                            // resembles the delimiter) is literal content.
                            pos = h + 1;
                        }
                    }
                }
            }
        };

        if exit == Exit::Eof && !ignore_last_row {
            // End of input terminates the final row, even an empty one.
            row.push(mem::take(&mut field));
            committed = len;
            scan.rows.push(row);
            scan.row_ends.push(base + committed);
        }
        if exit == Exit::Withheld {
            // Errors belonging to the withheld row would be found again when
            // the row is re-fed, so they are not reported now.
            let emitted = scan.rows.len();
            scan.errors.retain(|err| err.row.map_or(true, |row| row < emitted));
        }
        scan.cursor = base + committed;
        scan
    }

    #[inline]
    fn abort_requested(&self) -> bool {
        self.abort
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::Relaxed))
    }

    /// The bytes that can start a row terminator, for candidate searches.
    fn newline_probe_bytes(&self) -> (u8, u8) {
        match self.newline {
            Newline::Any(c) => {
                let mut buf = [0u8; 4];
                let first = c.encode_utf8(&mut buf).as_bytes()[0];
                (first, first)
            }
            _ => (b'\r', b'\n'),
        }
    }

    /// Probe for a row terminator at `pos`, locking the auto-detected
    /// choice on first sight.
    fn newline_at(&mut self, bytes: &[u8], pos: usize, ignore_last_row: bool) -> NlAt {
        match self.newline {
            Newline::Lf => {
                if bytes[pos] == b'\n' {
                    NlAt::Hit(1)
                } else {
                    NlAt::NoMatch
                }
            }
            Newline::Cr => {
                if bytes[pos] == b'\r' {
                    NlAt::Hit(1)
                } else {
                    NlAt::NoMatch
                }
            }
            Newline::CrLf => {
                if bytes[pos] == b'\r' && bytes.get(pos + 1) == Some(&b'\n') {
                    NlAt::Hit(2)
                } else {
                    NlAt::NoMatch
                }
            }
            Newline::Any(c) => {
                let mut buf = [0u8; 4];
                let seq = c.encode_utf8(&mut buf).as_bytes();
                let rest = &bytes[pos..];
                if rest.starts_with(seq) {
                    NlAt::Hit(seq.len())
                } else if ignore_last_row && seq.starts_with(rest) {
                    // The terminator could complete in the next chunk.
                    NlAt::NeedMore
                } else {
                    NlAt::NoMatch
                }
            }
            Newline::Auto => match bytes[pos] {
                b'\n' => {
                    self.newline = Newline::Lf;
                    NlAt::Hit(1)
                }
                b'\r' => match bytes.get(pos + 1) {
                    Some(&b'\n') => {
                        self.newline = Newline::CrLf;
                        NlAt::Hit(2)
                    }
                    Some(_) => {
                        self.newline = Newline::Cr;
                        NlAt::Hit(1)
                    }
                    // A trailing \r in a possibly-incomplete buffer could
                    // still pair with a \n from the next chunk.
                    None if ignore_last_row => NlAt::NeedMore,
                    None => {
                        self.newline = Newline::Cr;
                        NlAt::Hit(1)
                    }
                },
                _ => NlAt::NoMatch,
            },
        }
    }

    /// Find the end of a comment line starting at `from`.
    fn comment_end(&mut self, bytes: &[u8], from: usize, ignore_last_row: bool) -> LineEnd {
        let (n0, n1) = self.newline_probe_bytes();
        let mut pos = from;
        while let Some(off) = memchr2(n0, n1, &bytes[pos..]) {
            let h = pos + off;
            match self.newline_at(bytes, h, ignore_last_row) {
                NlAt::Hit(nl) => return LineEnd::Hit(h + nl),
                NlAt::NeedMore => return LineEnd::NeedMore,
                NlAt::NoMatch => pos = h + 1,
            }
        }
        LineEnd::Eof
    }
}
