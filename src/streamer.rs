use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dsv_core::{
    is_valid_delimiter, Newline, ParseError, ParseErrorCode, Scan, Scanner,
    ScannerBuilder, BYTE_ORDER_MARK, RECORD_SEPARATOR, UNIT_SEPARATOR,
};
use memchr::memchr2;

use crate::detect;
use crate::error::{Error, Result};
use crate::header::Headers;
use crate::record::{ParseMeta, ParseOutput, Row};
use crate::transport::{Chunk, ChunkSource, RangeFetcher, RemoteSource, StringSource};

/// Empty-line filtering applied before header interpretation and row
/// delivery.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SkipEmptyLines {
    /// Keep every row.
    #[default]
    No,
    /// Drop rows that are a single empty field.
    Empty,
    /// Drop rows whose every field is empty or whitespace-only.
    Greedy,
}

impl SkipEmptyLines {
    pub(crate) fn skips(&self, fields: &[String]) -> bool {
        match *self {
            SkipEmptyLines::No => false,
            SkipEmptyLines::Empty => fields.len() == 1 && fields[0].is_empty(),
            SkipEmptyLines::Greedy => {
                fields.iter().all(|field| field.trim().is_empty())
            }
        }
    }
}

/// A handle for stopping a running parse from inside a callback (or from
/// anywhere else that holds a clone).
///
/// Setting the flag is observed by the scanner at the next row boundary and
/// by the streamer before dispatching the next row or requesting the next
/// chunk. The terminal callback still runs, with `meta.aborted` set.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Request that the parse stop at the next row boundary.
    pub fn abort(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether an abort has been requested.
    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

/// Everything handed to a `step` callback for one data row.
pub struct StepResult<'a> {
    /// The row, after header projection.
    pub row: Row,
    /// The errors attributed to this row, reported before the row itself.
    pub errors: &'a [ParseError],
    /// Metadata as of this row; `meta.cursor` reflects the row's end.
    pub meta: &'a ParseMeta,
}

/// Everything handed to a `chunk` callback for one ingested chunk.
pub struct ChunkResult<'a> {
    /// Every data row this chunk produced.
    pub data: Vec<Row>,
    /// Every error this chunk produced.
    pub errors: &'a [ParseError],
    /// Metadata as of the end of this chunk.
    pub meta: &'a ParseMeta,
}

type StepFn = Box<dyn FnMut(StepResult, &AbortHandle)>;
type ChunkFn = Box<dyn FnMut(ChunkResult, &AbortHandle)>;
type CompleteFn = Box<dyn FnOnce(&ParseOutput)>;
type ErrorFn = Box<dyn FnMut(&Error)>;
type BeforeFirstChunkFn = Box<dyn FnMut(&str) -> Option<String>>;
type DelimiterFn = Box<dyn FnMut(&str) -> String>;

enum DelimiterSpec {
    Fixed(String),
    Func(DelimiterFn),
}

impl fmt::Debug for DelimiterSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DelimiterSpec::Fixed(ref delim) => {
                f.debug_tuple("Fixed").field(delim).finish()
            }
            DelimiterSpec::Func(_) => f.write_str("Func(..)"),
        }
    }
}

#[derive(Default)]
struct Callbacks {
    step: Option<StepFn>,
    chunk: Option<ChunkFn>,
    complete: Option<CompleteFn>,
    error: Option<ErrorFn>,
    before_first_chunk: Option<BeforeFirstChunkFn>,
}

/// Builds a parser with various configuration knobs.
///
/// The builder snapshots the process-wide defaults when it is created;
/// later calls to [`set_default_delimiter`](crate::set_default_delimiter) or
/// [`set_remote_chunk_size`](crate::set_remote_chunk_size) do not affect it.
///
/// # Example
///
/// ```
/// use dsv::ParserBuilder;
///
/// let mut builder = ParserBuilder::new();
/// builder.header(true);
/// let out = builder.parse_str("name,size\nfoo,3\nbar,7")?;
/// assert_eq!(out.data.len(), 2);
/// assert_eq!(out.data[1].keyed().unwrap().get("size"), Some("7"));
/// # Ok::<(), dsv::Error>(())
/// ```
pub struct ParserBuilder {
    delimiter: Option<DelimiterSpec>,
    quote: char,
    escape: Option<char>,
    newline: Newline,
    comment: Option<String>,
    header: bool,
    skip_empty_lines: SkipEmptyLines,
    delimiters_to_guess: Vec<String>,
    preview: usize,
    skip_first_n_lines: usize,
    chunk_size: Option<usize>,
    remote_chunk_size: usize,
    default_delimiter: String,
    download_headers: HashMap<String, String>,
    download_body: Option<String>,
    with_credentials: bool,
    first_chunk_offset: Option<u64>,
    callbacks: Callbacks,
}

impl Default for ParserBuilder {
    fn default() -> ParserBuilder {
        ParserBuilder {
            delimiter: None,
            quote: '"',
            escape: None,
            newline: Newline::Auto,
            comment: None,
            header: false,
            skip_empty_lines: SkipEmptyLines::No,
            delimiters_to_guess: detect::default_candidates(),
            preview: 0,
            skip_first_n_lines: 0,
            chunk_size: None,
            remote_chunk_size: crate::remote_chunk_size(),
            default_delimiter: crate::default_delimiter(),
            download_headers: HashMap::new(),
            download_body: None,
            with_credentials: false,
            first_chunk_offset: None,
            callbacks: Callbacks::default(),
        }
    }
}

impl fmt::Debug for ParserBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ParserBuilder")
            .field("delimiter", &self.delimiter)
            .field("quote", &self.quote)
            .field("escape", &self.escape)
            .field("newline", &self.newline)
            .field("comment", &self.comment)
            .field("header", &self.header)
            .field("skip_empty_lines", &self.skip_empty_lines)
            .field("delimiters_to_guess", &self.delimiters_to_guess)
            .field("preview", &self.preview)
            .field("skip_first_n_lines", &self.skip_first_n_lines)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl ParserBuilder {
    /// Create a new builder with the default configuration.
    pub fn new() -> ParserBuilder {
        ParserBuilder::default()
    }

    /// Use this fixed delimiter instead of auto-detecting one.
    ///
    /// A delimiter containing `\r`, `\n`, `"` or the byte order mark is
    /// silently discarded and auto-detection runs as if none had been
    /// configured.
    pub fn delimiter(&mut self, delim: &str) -> &mut ParserBuilder {
        self.delimiter = Some(DelimiterSpec::Fixed(delim.to_string()));
        self
    }

    /// Pick the delimiter with a callback receiving the first chunk of
    /// input. An invalid pick falls back to auto-detection.
    pub fn delimiter_fn<F>(&mut self, pick: F) -> &mut ParserBuilder
    where
        F: FnMut(&str) -> String + 'static,
    {
        self.delimiter = Some(DelimiterSpec::Func(Box::new(pick)));
        self
    }

    /// The quote character. The default is `"`.
    pub fn quote(&mut self, quote: char) -> &mut ParserBuilder {
        self.quote = quote;
        self
    }

    /// The character that escapes a quote inside a quoted field. The
    /// default equals the quote character (doubled-quote escaping).
    pub fn escape(&mut self, escape: char) -> &mut ParserBuilder {
        self.escape = Some(escape);
        self
    }

    /// The row terminator. The default auto-detects from the first `\r` or
    /// `\n` seen outside quotes.
    pub fn newline(&mut self, newline: Newline) -> &mut ParserBuilder {
        self.newline = newline;
        self
    }

    /// Treat the first data row as header names and key every later row by
    /// them. Disabled by default.
    pub fn header(&mut self, yes: bool) -> &mut ParserBuilder {
        self.header = yes;
        self
    }

    /// Skip lines starting with this string. An empty string disables
    /// comment handling, as does `None` (the default).
    pub fn comment(&mut self, comment: Option<&str>) -> &mut ParserBuilder {
        self.comment = comment.filter(|c| !c.is_empty()).map(|c| c.to_string());
        self
    }

    /// What to do with empty lines. The default keeps them.
    pub fn skip_empty_lines(&mut self, skip: SkipEmptyLines) -> &mut ParserBuilder {
        self.skip_empty_lines = skip;
        self
    }

    /// Candidate delimiters for auto-detection, in preference order.
    pub fn delimiters_to_guess<I, T>(&mut self, candidates: I) -> &mut ParserBuilder
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.delimiters_to_guess =
            candidates.into_iter().map(|c| c.into()).collect();
        self
    }

    /// Stop after this many data rows and mark the results truncated.
    /// Zero, the default, means no limit.
    pub fn preview(&mut self, rows: usize) -> &mut ParserBuilder {
        self.preview = rows;
        self
    }

    /// Discard this many logical lines before parsing begins. They are not
    /// inspected by delimiter detection and do not count toward the
    /// preview. Zero, the default, discards nothing.
    pub fn skip_first_n_lines(&mut self, lines: usize) -> &mut ParserBuilder {
        self.skip_first_n_lines = lines;
        self
    }

    /// Override the chunk size: bytes per range request for remote input,
    /// bytes per slice for in-memory input.
    pub fn chunk_size(&mut self, bytes: usize) -> &mut ParserBuilder {
        self.chunk_size = Some(bytes.max(1));
        self
    }

    /// Invoke `step` once per data row, in document order, instead of
    /// accumulating rows.
    pub fn on_step<F>(&mut self, step: F) -> &mut ParserBuilder
    where
        F: FnMut(StepResult, &AbortHandle) + 'static,
    {
        self.callbacks.step = Some(Box::new(step));
        self
    }

    /// Invoke `chunk` once per ingested chunk with every row the chunk
    /// produced, instead of accumulating rows.
    pub fn on_chunk<F>(&mut self, chunk: F) -> &mut ParserBuilder
    where
        F: FnMut(ChunkResult, &AbortHandle) + 'static,
    {
        self.callbacks.chunk = Some(Box::new(chunk));
        self
    }

    /// Invoke `complete` with the final results once the parse ends,
    /// whether it ran to end of input, was aborted, or hit the preview
    /// limit.
    pub fn on_complete<F>(&mut self, complete: F) -> &mut ParserBuilder
    where
        F: FnOnce(&ParseOutput) + 'static,
    {
        self.callbacks.complete = Some(Box::new(complete));
        self
    }

    /// Invoke `error` when a fatal error stops the parse. The terminal
    /// callback does not run afterwards; the same error is also returned.
    pub fn on_error<F>(&mut self, error: F) -> &mut ParserBuilder
    where
        F: FnMut(&Error) + 'static,
    {
        self.callbacks.error = Some(Box::new(error));
        self
    }

    /// Transform the first chunk of input before any parsing. Returning
    /// `Some` replaces the chunk's text.
    pub fn before_first_chunk<F>(&mut self, transform: F) -> &mut ParserBuilder
    where
        F: FnMut(&str) -> Option<String> + 'static,
    {
        self.callbacks.before_first_chunk = Some(Box::new(transform));
        self
    }

    /// Extra headers for every remote range request.
    pub fn download_request_headers(
        &mut self,
        headers: HashMap<String, String>,
    ) -> &mut ParserBuilder {
        self.download_headers = headers;
        self
    }

    /// Send remote range requests as POSTs carrying this body.
    pub fn download_request_body(&mut self, body: &str) -> &mut ParserBuilder {
        self.download_body = Some(body.to_string());
        self
    }

    /// Whether remote requests send credentials cross-origin.
    pub fn with_credentials(&mut self, yes: bool) -> &mut ParserBuilder {
        self.with_credentials = yes;
        self
    }

    /// Start the first remote range request at this byte offset. The caller
    /// is responsible for the offset falling on a row boundary.
    pub fn first_chunk_offset(&mut self, offset: u64) -> &mut ParserBuilder {
        self.first_chunk_offset = Some(offset);
        self
    }

    /// A convenience preset for ASCII-delimited text: sets the field
    /// delimiter to the ASCII unit separator (`\x1F`) and the row
    /// terminator to the ASCII record separator (`\x1E`), leaving `\r` and
    /// `\n` as field content.
    pub fn ascii(&mut self) -> &mut ParserBuilder {
        self.delimiter = Some(DelimiterSpec::Fixed(UNIT_SEPARATOR.to_string()));
        self.newline = Newline::Any(RECORD_SEPARATOR);
        self
    }

    /// Parse an in-memory string to completion.
    pub fn parse_str(self, input: &str) -> Result<ParseOutput> {
        let source = match self.chunk_size {
            Some(size) => StringSource::chunked(input, size),
            None => StringSource::new(input),
        };
        self.into_streamer(source).run()
    }

    /// Parse a remote resource to completion, fetching it range by range
    /// through `fetcher`.
    pub fn parse_remote<F: RangeFetcher>(
        mut self,
        fetcher: F,
        url: &str,
    ) -> Result<ParseOutput> {
        let chunk_size = self
            .chunk_size
            .map(|bytes| bytes as u64)
            .unwrap_or(self.remote_chunk_size as u64);
        let mut source = RemoteSource::new(fetcher, url);
        source
            .headers(mem::take(&mut self.download_headers))
            .body(self.download_body.take())
            .with_credentials(self.with_credentials)
            .chunk_size(chunk_size);
        if let Some(offset) = self.first_chunk_offset {
            source.offset(offset);
        }
        self.into_streamer(source).run()
    }

    /// Build a [`Streamer`] over an arbitrary chunk source.
    pub fn into_streamer<S: ChunkSource>(self, source: S) -> Streamer<S> {
        let ParserBuilder {
            delimiter,
            quote,
            escape,
            newline,
            comment,
            header,
            skip_empty_lines,
            delimiters_to_guess,
            preview,
            skip_first_n_lines,
            default_delimiter,
            first_chunk_offset,
            callbacks,
            ..
        } = self;
        Streamer {
            source,
            config: Config {
                delimiter,
                quote,
                escape,
                newline,
                comment,
                header,
                skip_empty_lines,
                delimiters_to_guess,
                preview,
                default_delimiter,
                first_chunk_offset,
            },
            callbacks,
            scanner: None,
            state: State {
                tail: String::new(),
                base: 0,
                first_chunk: true,
                lines_to_skip: skip_first_n_lines,
                data_rows: 0,
                headers: None,
                abort: AbortHandle::default(),
                halted: false,
                truncated: false,
                errors_seen: 0,
                num_bytes: 0,
                fetched_any: false,
                output: ParseOutput::default(),
            },
        }
    }
}

struct Config {
    delimiter: Option<DelimiterSpec>,
    quote: char,
    escape: Option<char>,
    newline: Newline,
    comment: Option<String>,
    header: bool,
    skip_empty_lines: SkipEmptyLines,
    delimiters_to_guess: Vec<String>,
    preview: usize,
    default_delimiter: String,
    first_chunk_offset: Option<u64>,
}

struct State {
    /// Unconsumed text after the last committed row, re-fed with the next
    /// chunk.
    tail: String,
    /// Absolute offset of `tail` (equivalently, of the next scan).
    base: usize,
    first_chunk: bool,
    lines_to_skip: usize,
    /// Data rows emitted so far, which is also the next row's error index.
    data_rows: usize,
    headers: Option<Headers>,
    abort: AbortHandle,
    /// Set once nothing more should be ingested or dispatched.
    halted: bool,
    truncated: bool,
    /// How many of `output.errors` have been handed to a chunk callback.
    errors_seen: usize,
    num_bytes: u64,
    fetched_any: bool,
    output: ParseOutput,
}

/// A streaming parse in progress.
///
/// The streamer owns the scanner for the lifetime of one parse. It pulls
/// chunks from its source, carries the unconsumed tail of each scan over to
/// the next, applies header interpretation and empty-line filtering, and
/// dispatches callbacks in document order.
pub struct Streamer<S> {
    source: S,
    config: Config,
    callbacks: Callbacks,
    scanner: Option<Scanner>,
    state: State,
}

impl<S: ChunkSource> Streamer<S> {
    /// A handle that aborts this parse when triggered.
    pub fn abort_handle(&self) -> AbortHandle {
        self.state.abort.clone()
    }

    /// Drive the parse to completion and return the results.
    ///
    /// Fatal errors are handed to the `error` callback when one is
    /// configured and returned either way; the terminal callback runs only
    /// on non-fatal completion (including aborts and previews).
    pub fn run(mut self) -> Result<ParseOutput> {
        loop {
            if self.state.halted || self.state.abort.is_aborted() {
                break;
            }
            let chunk = match self.source.next_chunk() {
                Ok(chunk) => chunk,
                Err(err) => return self.fail(err),
            };
            let Some(chunk) = chunk else { break };
            let is_last = chunk.is_last;
            if let Err(err) = self.ingest(chunk) {
                return self.fail(err);
            }
            if is_last {
                break;
            }
        }
        self.finish()
    }

    fn fail(mut self, err: Error) -> Result<ParseOutput> {
        if let Some(error) = self.callbacks.error.as_mut() {
            error(&err);
        }
        Err(err)
    }

    fn ingest(&mut self, chunk: Chunk) -> Result<()> {
        let Chunk { mut text, is_last, fetched } = chunk;
        if let Some(bytes) = fetched {
            self.state.num_bytes += bytes;
            self.state.fetched_any = true;
        }
        if self.state.first_chunk {
            self.state.first_chunk = false;
            if let Some(rest) = text.strip_prefix(BYTE_ORDER_MARK) {
                self.state.base += BYTE_ORDER_MARK.len_utf8();
                text = rest.to_string();
            }
            if let Some(transform) = self.callbacks.before_first_chunk.as_mut() {
                if let Some(replacement) = transform(&text) {
                    text = replacement;
                }
            }
        }

        let mut buf = mem::take(&mut self.state.tail);
        buf.push_str(&text);

        if self.state.lines_to_skip > 0 {
            let (cut, remaining) =
                skip_lines(&buf, self.state.lines_to_skip, self.config.newline, is_last);
            self.state.base += cut;
            self.state.lines_to_skip = remaining;
            buf = buf.split_off(cut);
            if remaining > 0 && !is_last {
                // Whatever is left is a partial line; wait for more input.
                self.state.tail = buf;
                return Ok(());
            }
        }

        if self.scanner.is_none() {
            let scanner = self.build_scanner(&buf, is_last)?;
            self.scanner = Some(scanner);
        }
        let scanner = self.scanner.as_mut().unwrap();
        let scan = scanner.scan(&buf, self.state.base, !is_last);
        let consumed = scan.cursor - self.state.base;
        self.state.tail = buf.split_off(consumed);
        self.state.base = scan.cursor;
        self.process_scan(scan);
        Ok(())
    }

    /// Resolve the delimiter (configured, picked, or detected) and build
    /// the scanner. Runs once, on the first scanned buffer.
    fn build_scanner(&mut self, sample: &str, input_complete: bool) -> Result<Scanner> {
        let delimiter = match self.config.delimiter.take() {
            Some(DelimiterSpec::Fixed(delim)) if is_valid_delimiter(&delim) => delim,
            Some(DelimiterSpec::Func(mut pick)) => {
                let delim = pick(sample);
                if is_valid_delimiter(&delim) {
                    delim
                } else {
                    self.detect_delimiter(sample, input_complete)
                }
            }
            _ => self.detect_delimiter(sample, input_complete),
        };
        if self.config.comment.as_deref() == Some(delimiter.as_str()) {
            return Err(Error::config("comment string is the same as the delimiter"));
        }
        self.state.output.meta.delimiter = delimiter.clone();
        let mut builder = ScannerBuilder::new();
        builder
            .delimiter(&delimiter)
            .quote(self.config.quote)
            .escape(self.config.escape.unwrap_or(self.config.quote))
            .newline(self.config.newline)
            .comment(self.config.comment.as_deref())
            .abort_flag(self.state.abort.flag());
        Ok(builder.build())
    }

    fn detect_delimiter(&mut self, sample: &str, input_complete: bool) -> String {
        match detect::guess_delimiter(
            sample,
            self.config.newline,
            self.config.skip_empty_lines,
            self.config.comment.as_deref(),
            &self.config.delimiters_to_guess,
            input_complete,
        ) {
            Some(delim) => delim,
            None => {
                let fallback = self.config.default_delimiter.clone();
                self.state.output.errors.push(ParseError::new(
                    ParseErrorCode::UndetectableDelimiter,
                    format!(
                        "Unable to auto-detect delimiting character; defaulted to '{}'",
                        fallback
                    ),
                ));
                fallback
            }
        }
    }

    fn process_scan(&mut self, scan: Scan) {
        let Scan { rows, row_ends, errors, cursor, .. } = scan;

        // Bucket scan errors by their scan-local row so they can be
        // renumbered to data-row indices on dispatch.
        let mut by_row: Vec<Vec<ParseError>> = Vec::new();
        by_row.resize_with(rows.len(), Vec::new);
        for mut err in errors {
            match err.row {
                Some(i) if i < by_row.len() => by_row[i].push(err),
                _ => {
                    err.row = None;
                    self.state.output.errors.push(err);
                }
            }
        }

        let mut chunk_rows: Vec<Row> = Vec::new();
        for ((fields, end), row_errors) in
            rows.into_iter().zip(row_ends).zip(by_row)
        {
            if self.config.skip_empty_lines.skips(&fields) {
                // A filtered row still reports its errors; there is just no
                // data row to attribute them to.
                for mut err in row_errors {
                    err.row = None;
                    self.state.output.errors.push(err);
                }
                continue;
            }
            if self.config.header && self.state.headers.is_none() {
                let headers = Headers::from_row(fields);
                self.state.output.meta.fields = Some(headers.fields().to_vec());
                self.state.output.meta.renamed_headers = headers.renamed().cloned();
                self.state.headers = Some(headers);
                for mut err in row_errors {
                    err.row = None;
                    self.state.output.errors.push(err);
                }
                continue;
            }

            let data_row = self.state.data_rows;
            let err_start = self.state.output.errors.len();
            let (row, mismatch) = match self.state.headers {
                Some(ref headers) => {
                    let (keyed, mismatch) = headers.project(fields, data_row);
                    (Row::Keyed(keyed), mismatch)
                }
                None => (Row::Fields(fields), None),
            };
            for mut err in row_errors {
                err.row = Some(data_row);
                self.state.output.errors.push(err);
            }
            if let Some(err) = mismatch {
                self.state.output.errors.push(err);
            }
            self.state.data_rows += 1;
            self.state.output.meta.cursor = end;

            let need_for_chunk = self.callbacks.chunk.is_some();
            if self.callbacks.step.is_some() {
                if need_for_chunk {
                    chunk_rows.push(row.clone());
                }
                self.dispatch_step(row, err_start);
            } else if need_for_chunk {
                chunk_rows.push(row);
            } else {
                self.state.output.data.push(row);
            }

            if self.config.preview > 0 && self.state.data_rows >= self.config.preview {
                self.state.truncated = true;
                self.state.halted = true;
                break;
            }
            if self.state.abort.is_aborted() {
                self.state.halted = true;
                break;
            }
        }

        if !self.state.halted {
            self.state.output.meta.cursor = cursor;
        }
        self.dispatch_chunk(chunk_rows);
    }

    fn dispatch_step(&mut self, row: Row, err_start: usize) {
        if let Some(step) = self.callbacks.step.as_mut() {
            step(
                StepResult {
                    row,
                    errors: &self.state.output.errors[err_start..],
                    meta: &self.state.output.meta,
                },
                &self.state.abort,
            );
        }
    }

    fn dispatch_chunk(&mut self, data: Vec<Row>) {
        if let Some(chunk) = self.callbacks.chunk.as_mut() {
            chunk(
                ChunkResult {
                    data,
                    errors: &self.state.output.errors[self.state.errors_seen..],
                    meta: &self.state.output.meta,
                },
                &self.state.abort,
            );
        }
        self.state.errors_seen = self.state.output.errors.len();
    }

    fn finish(mut self) -> Result<ParseOutput> {
        let mut output = mem::take(&mut self.state.output);
        output.meta.aborted = self.state.abort.is_aborted();
        output.meta.truncated = self.state.truncated;
        let newline = self
            .scanner
            .as_ref()
            .map(|scanner| scanner.newline())
            .unwrap_or(self.config.newline);
        output.meta.linebreak =
            newline.sequence().unwrap_or_else(|| "\n".to_string());
        output.meta.first_byte = self.config.first_chunk_offset;
        output.meta.num_bytes =
            if self.state.fetched_any { Some(self.state.num_bytes) } else { None };
        if let Some(complete) = self.callbacks.complete.take() {
            complete(&output);
        }
        Ok(output)
    }
}

/// Discard up to `lines` logical lines from the front of `buf`.
///
/// Returns the byte length of the discarded prefix and how many lines still
/// have to be skipped. Only whole lines are discarded; a trailing partial
/// line stays (unless `input_complete`, which makes the unterminated rest
/// count as the final line). Raw line structure only; quoting is not
/// interpreted here.
fn skip_lines(
    buf: &str,
    lines: usize,
    newline: Newline,
    input_complete: bool,
) -> (usize, usize) {
    let bytes = buf.as_bytes();
    let mut newline = newline;
    let (n0, n1) = match newline {
        Newline::Any(c) => {
            let mut cbuf = [0u8; 4];
            let first = c.encode_utf8(&mut cbuf).as_bytes()[0];
            (first, first)
        }
        _ => (b'\r', b'\n'),
    };
    let mut line_start = 0;
    let mut pos = 0;
    let mut remaining = lines;
    while remaining > 0 {
        let h = match memchr2(n0, n1, &bytes[pos..]) {
            Some(off) => pos + off,
            None => {
                if input_complete {
                    return (bytes.len(), remaining - 1);
                }
                return (line_start, remaining);
            }
        };
        let nl_len = match newline {
            Newline::Lf => (bytes[h] == b'\n').then_some(1),
            Newline::Cr => (bytes[h] == b'\r').then_some(1),
            Newline::CrLf => {
                (bytes[h] == b'\r' && bytes.get(h + 1) == Some(&b'\n')).then_some(2)
            }
            Newline::Any(c) => {
                let mut cbuf = [0u8; 4];
                let seq = c.encode_utf8(&mut cbuf).as_bytes();
                if bytes[h..].starts_with(seq) {
                    Some(seq.len())
                } else if !input_complete && seq.starts_with(&bytes[h..]) {
                    // The terminator could complete in the next chunk.
                    return (line_start, remaining);
                } else {
                    None
                }
            }
            Newline::Auto => match bytes[h] {
                b'\n' => {
                    newline = Newline::Lf;
                    Some(1)
                }
                b'\r' => match bytes.get(h + 1) {
                    Some(&b'\n') => {
                        newline = Newline::CrLf;
                        Some(2)
                    }
                    Some(_) => {
                        newline = Newline::Cr;
                        Some(1)
                    }
                    None if !input_complete => return (line_start, remaining),
                    None => Some(1),
                },
                _ => None,
            },
        };
        match nl_len {
            Some(n) => {
                pos = h + n;
                line_start = pos;
                remaining -= 1;
            }
            None => pos = h + 1,
        }
    }
    (line_start, remaining)
}

#[cfg(test)]
mod tests {
    use dsv_core::Newline;

    use super::{skip_lines, SkipEmptyLines};

    fn fields(row: &[&str]) -> Vec<String> {
        row.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_line_filtering_modes() {
        assert!(!SkipEmptyLines::No.skips(&fields(&[""])));
        assert!(SkipEmptyLines::Empty.skips(&fields(&[""])));
        assert!(!SkipEmptyLines::Empty.skips(&fields(&[" "])));
        assert!(!SkipEmptyLines::Empty.skips(&fields(&["", ""])));
        assert!(SkipEmptyLines::Greedy.skips(&fields(&[" \t"])));
        assert!(SkipEmptyLines::Greedy.skips(&fields(&["", "  "])));
        assert!(!SkipEmptyLines::Greedy.skips(&fields(&["", "x"])));
    }

    #[test]
    fn skip_lines_counts_whole_lines() {
        assert_eq!(skip_lines("a\nb\nc", 2, Newline::Auto, true), (4, 0));
        assert_eq!(skip_lines("a\r\nb\r\nc", 1, Newline::Auto, true), (3, 0));
    }

    #[test]
    fn skip_lines_keeps_partial_tail() {
        // Only one complete line is available; the rest must wait.
        assert_eq!(skip_lines("a\nbc", 2, Newline::Auto, false), (2, 1));
        assert_eq!(skip_lines("abc", 1, Newline::Auto, false), (0, 1));
    }

    #[test]
    fn skip_lines_consumes_unterminated_final_line() {
        assert_eq!(skip_lines("a\nbc", 2, Newline::Auto, true), (4, 0));
    }

    #[test]
    fn skip_lines_respects_locked_newline() {
        // With \n as the terminator, the \r bytes are line content.
        assert_eq!(skip_lines("a\rb\nc", 1, Newline::Lf, true), (4, 0));
    }
}
