use std::cmp;
use std::collections::HashMap;
use std::mem;

use crate::error::Result;

/// One chunk of ingested text.
#[derive(Clone, Debug)]
pub struct Chunk {
    /// The chunk's text.
    pub text: String,
    /// Whether this is the final chunk of the input.
    pub is_last: bool,
    /// Bytes fetched from a remote source for this chunk, when known.
    pub fetched: Option<u64>,
}

/// A pull-based source of text chunks.
///
/// The streaming driver consumes any input through this seam: in-memory
/// strings through [`StringSource`], remote resources through
/// [`RemoteSource`]. Sources must keep delivering `Ok(None)` once the input
/// is exhausted.
pub trait ChunkSource {
    /// Fetch the next chunk, or `None` once the input is exhausted.
    fn next_chunk(&mut self) -> Result<Option<Chunk>>;
}

/// An in-memory chunk source.
///
/// By default the whole string is delivered as a single chunk; a chunk size
/// (in bytes, rounded up to character boundaries) splits it to exercise the
/// same carry-over machinery the remote path uses.
#[derive(Clone, Debug)]
pub struct StringSource {
    input: String,
    pos: usize,
    chunk_size: Option<usize>,
    done: bool,
}

impl StringSource {
    /// Deliver `input` as one chunk.
    pub fn new(input: impl Into<String>) -> StringSource {
        StringSource { input: input.into(), pos: 0, chunk_size: None, done: false }
    }

    /// Deliver `input` in chunks of at most `chunk_size` bytes, never
    /// splitting a character.
    pub fn chunked(input: impl Into<String>, chunk_size: usize) -> StringSource {
        StringSource {
            input: input.into(),
            pos: 0,
            chunk_size: Some(chunk_size.max(1)),
            done: false,
        }
    }
}

impl ChunkSource for StringSource {
    fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.done {
            return Ok(None);
        }
        let chunk = match self.chunk_size {
            None => {
                self.done = true;
                Chunk { text: mem::take(&mut self.input), is_last: true, fetched: None }
            }
            Some(size) => {
                let start = self.pos;
                let mut end = cmp::min(start + size, self.input.len());
                while !self.input.is_char_boundary(end) {
                    end += 1;
                }
                self.pos = end;
                let is_last = end >= self.input.len();
                if is_last {
                    self.done = true;
                }
                Chunk {
                    text: self.input[start..end].to_string(),
                    is_last,
                    fetched: None,
                }
            }
        };
        Ok(Some(chunk))
    }
}

/// A byte-range request against a remote resource.
#[derive(Debug)]
pub struct RangeRequest<'a> {
    /// The resource to fetch.
    pub url: &'a str,
    /// Extra request headers.
    pub headers: &'a HashMap<String, String>,
    /// When present, the request is a POST carrying this body.
    pub body: Option<&'a str>,
    /// Whether to send credentials on cross-origin requests.
    pub with_credentials: bool,
    /// First byte of the requested range, inclusive.
    pub start: u64,
    /// Last byte of the requested range, inclusive.
    pub end: u64,
}

/// The bytes delivered for one range request.
#[derive(Clone, Debug)]
pub struct RangeResponse {
    /// The fetched range decoded as text.
    pub text: String,
    /// How many bytes the resource actually returned.
    pub bytes_read: u64,
    /// Whether the resource ended within this range.
    pub at_end: bool,
}

/// A minimal byte-range fetcher for remote input.
///
/// This crate ships no HTTP stack; implementors wrap whatever client they
/// already use and answer range requests with decoded text. Returning fewer
/// bytes than requested, or setting [`RangeResponse::at_end`], marks the end
/// of the resource.
pub trait RangeFetcher {
    /// Deliver the bytes for `req` decoded as text.
    fn fetch_range(&mut self, req: &RangeRequest) -> Result<RangeResponse>;
}

impl<F: RangeFetcher + ?Sized> RangeFetcher for &mut F {
    fn fetch_range(&mut self, req: &RangeRequest) -> Result<RangeResponse> {
        (**self).fetch_range(req)
    }
}

/// Adapts a [`RangeFetcher`] into a [`ChunkSource`] by walking the resource
/// one byte range at a time.
#[derive(Debug)]
pub struct RemoteSource<F> {
    fetcher: F,
    url: String,
    headers: HashMap<String, String>,
    body: Option<String>,
    with_credentials: bool,
    chunk_size: u64,
    pos: u64,
    done: bool,
}

impl<F: RangeFetcher> RemoteSource<F> {
    /// Create a source reading `url` from the beginning with the
    /// process-wide default chunk size.
    pub fn new(fetcher: F, url: impl Into<String>) -> RemoteSource<F> {
        RemoteSource {
            fetcher,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            with_credentials: false,
            chunk_size: crate::remote_chunk_size() as u64,
            pos: 0,
            done: false,
        }
    }

    /// Extra headers to send with every range request.
    pub fn headers(&mut self, headers: HashMap<String, String>) -> &mut RemoteSource<F> {
        self.headers = headers;
        self
    }

    /// Send every range request as a POST carrying `body`.
    pub fn body(&mut self, body: Option<String>) -> &mut RemoteSource<F> {
        self.body = body;
        self
    }

    /// Whether to send credentials on cross-origin requests.
    pub fn with_credentials(&mut self, yes: bool) -> &mut RemoteSource<F> {
        self.with_credentials = yes;
        self
    }

    /// Bytes to request per chunk.
    pub fn chunk_size(&mut self, bytes: u64) -> &mut RemoteSource<F> {
        self.chunk_size = bytes.max(1);
        self
    }

    /// Start reading at this byte offset instead of the beginning.
    ///
    /// The caller is responsible for the offset falling on a row boundary;
    /// no attempt is made to resynchronize mid-row.
    pub fn offset(&mut self, offset: u64) -> &mut RemoteSource<F> {
        self.pos = offset;
        self
    }
}

impl<F: RangeFetcher> ChunkSource for RemoteSource<F> {
    fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.done {
            return Ok(None);
        }
        let req = RangeRequest {
            url: &self.url,
            headers: &self.headers,
            body: self.body.as_deref(),
            with_credentials: self.with_credentials,
            start: self.pos,
            end: self.pos + self.chunk_size - 1,
        };
        let resp = self.fetcher.fetch_range(&req)?;
        self.pos += resp.bytes_read;
        let is_last = resp.at_end || resp.bytes_read < self.chunk_size;
        if is_last {
            self.done = true;
        }
        Ok(Some(Chunk {
            text: resp.text,
            is_last,
            fetched: Some(resp.bytes_read),
        }))
    }
}
