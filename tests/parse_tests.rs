use std::cell::{Cell, RefCell};
use std::rc::Rc;

use dsv::{
    KeyedRow, ParseErrorCode, ParseOutput, ParserBuilder, RangeFetcher,
    RangeRequest, RangeResponse, Row, SkipEmptyLines,
};

fn fields(row: &[&str]) -> Row {
    Row::from(row.to_vec())
}

fn keyed(pairs: &[(&str, &str)]) -> Row {
    Row::Keyed(pairs.iter().cloned().collect::<KeyedRow>())
}

#[test]
fn plain_two_rows() {
    let out = dsv::parse_str("A,b,c\nd,E,f").unwrap();
    assert_eq!(out.data, vec![fields(&["A", "b", "c"]), fields(&["d", "E", "f"])]);
    assert!(out.errors.is_empty());
    assert_eq!(out.meta.delimiter, ",");
    assert_eq!(out.meta.linebreak, "\n");
    assert_eq!(out.meta.cursor, 11);
    assert!(!out.meta.aborted);
    assert!(!out.meta.truncated);
}

#[test]
fn doubled_quotes_inside_quoted_field() {
    let out = dsv::parse_str("A,\"B\"\"B\"\"B\",C").unwrap();
    assert_eq!(out.data, vec![fields(&["A", "B\"B\"B", "C"])]);
    assert!(out.errors.is_empty());
}

#[test]
fn unterminated_quote_swallows_the_rest() {
    let out = dsv::parse_str("a,\"b,c\nd,e,f").unwrap();
    assert_eq!(out.data, vec![fields(&["a", "b,c\nd,e,f"])]);
    assert_eq!(out.errors.len(), 1);
    let err = &out.errors[0];
    assert_eq!(err.code, ParseErrorCode::MissingQuotes);
    assert_eq!(err.row, Some(0));
    assert_eq!(err.index, Some(3));
}

#[test]
fn duplicate_headers_are_renamed() {
    let mut builder = ParserBuilder::new();
    builder.header(true);
    let out = builder.parse_str("Column,Column\n1-1,1-2").unwrap();
    assert_eq!(
        out.data,
        vec![keyed(&[("Column", "1-1"), ("Column_1", "1-2")])]
    );
    assert!(out.errors.is_empty());
    assert_eq!(
        out.meta.fields.as_deref(),
        Some(&["Column".to_string(), "Column_1".to_string()][..])
    );
    let renamed = out.meta.renamed_headers.as_ref().unwrap();
    assert_eq!(renamed.len(), 1);
    assert_eq!(renamed["Column_1"], "Column");
}

#[test]
fn surplus_fields_go_to_parsed_extra() {
    let mut builder = ParserBuilder::new();
    builder.header(true);
    let out = builder.parse_str("A,B,C\r\na,b,c,d,e\r\nf,g,h").unwrap();
    assert_eq!(out.meta.linebreak, "\r\n");
    assert_eq!(out.data.len(), 2);

    let first = out.data[0].keyed().unwrap();
    assert_eq!(first.get("A"), Some("a"));
    assert_eq!(first.get("C"), Some("c"));
    assert_eq!(first.extra(), &["d".to_string(), "e".to_string()]);

    let second = out.data[1].keyed().unwrap();
    assert_eq!(second.get("B"), Some("g"));
    assert!(second.extra().is_empty());

    assert_eq!(out.errors.len(), 1);
    assert_eq!(out.errors[0].code, ParseErrorCode::TooManyFields);
    assert_eq!(out.errors[0].row, Some(0));
}

#[test]
fn leading_byte_order_mark_is_stripped() {
    let mut builder = ParserBuilder::new();
    builder.header(true);
    let out = builder.parse_str("\u{feff}A,B\nX,Y").unwrap();
    assert_eq!(out.data, vec![keyed(&[("A", "X"), ("B", "Y")])]);
    assert_eq!(
        out.meta.fields.as_deref(),
        Some(&["A".to_string(), "B".to_string()][..])
    );
}

#[test]
fn detection_sees_through_comments_and_quotes() {
    let mut input = String::new();
    for i in 0..10 {
        input.push_str(&format!("# comment line {}\n", i));
    }
    input.push_str("one,\"t,w,o\",three\nfour,five,six");
    let mut builder = ParserBuilder::new();
    builder.comment(Some("#"));
    let out = builder.parse_str(&input).unwrap();
    assert_eq!(out.meta.delimiter, ",");
    assert_eq!(
        out.data,
        vec![
            fields(&["one", "t,w,o", "three"]),
            fields(&["four", "five", "six"]),
        ]
    );
    assert!(out.errors.is_empty());
}

#[test]
fn undetectable_delimiter_falls_back_to_comma() {
    let out = dsv::parse_str("one\ntwo\nthree").unwrap();
    assert_eq!(out.meta.delimiter, ",");
    assert_eq!(out.errors.len(), 1);
    assert_eq!(out.errors[0].code, ParseErrorCode::UndetectableDelimiter);
    assert_eq!(
        out.data,
        vec![fields(&["one"]), fields(&["two"]), fields(&["three"])]
    );
}

#[test]
fn invalid_configured_delimiter_triggers_detection() {
    let mut builder = ParserBuilder::new();
    builder.delimiter("\n");
    let out = builder.parse_str("a\tb\nc\td").unwrap();
    assert_eq!(out.meta.delimiter, "\t");
    assert_eq!(out.data, vec![fields(&["a", "b"]), fields(&["c", "d"])]);
    assert!(out.errors.is_empty());
}

#[test]
fn delimiter_can_be_picked_by_a_callback() {
    let mut builder = ParserBuilder::new();
    builder.delimiter_fn(|input| {
        if input.contains(';') { ";".to_string() } else { ",".to_string() }
    });
    let out = builder.parse_str("a;b\nc;d").unwrap();
    assert_eq!(out.meta.delimiter, ";");
    assert_eq!(out.data, vec![fields(&["a", "b"]), fields(&["c", "d"])]);
}

#[test]
fn comment_equal_to_delimiter_is_fatal() {
    let errored = Rc::new(Cell::new(false));
    let seen = Rc::clone(&errored);
    let mut builder = ParserBuilder::new();
    builder
        .delimiter(",")
        .comment(Some(","))
        .on_error(move |_err| seen.set(true))
        .on_complete(|_out| panic!("complete must not run after a fatal error"));
    let result = builder.parse_str("a,b");
    assert!(result.unwrap_err().is_config_error());
    assert!(errored.get());
}

#[test]
fn ascii_preset_keeps_newlines_as_content() {
    let mut builder = ParserBuilder::new();
    builder.ascii();
    let out = builder
        .parse_str("x\u{1f}y\u{1e}line\nbreak\u{1f}z")
        .unwrap();
    assert_eq!(
        out.data,
        vec![fields(&["x", "y"]), fields(&["line\nbreak", "z"])]
    );
    assert_eq!(out.meta.delimiter, "\u{1f}");
    assert_eq!(out.meta.linebreak, "\u{1e}");
    assert!(out.errors.is_empty());
}

#[test]
fn skipped_empty_rows_keep_their_errors() {
    // The final row is a lone unterminated quote: its only field is empty,
    // so empty-line skipping filters the row, but not its error.
    let mut builder = ParserBuilder::new();
    builder.delimiter(",").skip_empty_lines(SkipEmptyLines::Empty);
    let out = builder.parse_str("a,b\n\"").unwrap();
    assert_eq!(out.data, vec![fields(&["a", "b"])]);
    assert_eq!(out.errors.len(), 1);
    assert_eq!(out.errors[0].code, ParseErrorCode::MissingQuotes);
    assert_eq!(out.errors[0].row, None);
}

#[test]
fn empty_line_handling_modes() {
    let input = "a,b\n\nc,d\n \n";
    let out = dsv::parse_str(input).unwrap();
    assert_eq!(
        out.data,
        vec![
            fields(&["a", "b"]),
            fields(&[""]),
            fields(&["c", "d"]),
            fields(&[" "]),
            fields(&[""]),
        ]
    );

    let mut builder = ParserBuilder::new();
    builder.skip_empty_lines(SkipEmptyLines::Empty);
    let out = builder.parse_str(input).unwrap();
    assert_eq!(
        out.data,
        vec![fields(&["a", "b"]), fields(&["c", "d"]), fields(&[" "])]
    );

    let mut builder = ParserBuilder::new();
    builder.skip_empty_lines(SkipEmptyLines::Greedy);
    let out = builder.parse_str(input).unwrap();
    assert_eq!(out.data, vec![fields(&["a", "b"]), fields(&["c", "d"])]);
}

#[test]
fn error_rows_count_data_rows_after_filtering() {
    let input = "h1,h2\n\na,b\n\nx,\"y\nz,w";
    let mut builder = ParserBuilder::new();
    builder.header(true).skip_empty_lines(SkipEmptyLines::Empty);
    let out = builder.parse_str(input).unwrap();
    // Data rows: [a,b] then the row with the unterminated quote.
    assert_eq!(out.data.len(), 2);
    assert_eq!(out.errors.len(), 1);
    assert_eq!(out.errors[0].code, ParseErrorCode::MissingQuotes);
    assert_eq!(out.errors[0].row, Some(1));
}

#[test]
fn preview_counts_data_rows_and_truncates() {
    let mut builder = ParserBuilder::new();
    builder.header(true).preview(2);
    let out = builder.parse_str("h1,h2\na,b\nc,d\ne,f\ng,h").unwrap();
    assert_eq!(
        out.data,
        vec![keyed(&[("h1", "a"), ("h2", "b")]), keyed(&[("h1", "c"), ("h2", "d")])]
    );
    assert!(out.meta.truncated);
    assert!(!out.meta.aborted);
    // The cursor sits just past the last delivered row.
    assert_eq!(out.meta.cursor, 14);
}

#[test]
fn skip_first_n_lines_discards_prologue() {
    let mut builder = ParserBuilder::new();
    builder.skip_first_n_lines(2);
    let out = builder.parse_str("junk line\nmore junk\na,b\nc,d").unwrap();
    assert_eq!(out.data, vec![fields(&["a", "b"]), fields(&["c", "d"])]);
    assert_eq!(out.meta.delimiter, ",");
    assert_eq!(out.meta.cursor, 27);
}

#[test]
fn skip_first_n_lines_spans_chunks() {
    let mut builder = ParserBuilder::new();
    builder.skip_first_n_lines(2).chunk_size(3);
    let out = builder.parse_str("junk line\nmore junk\na,b\nc,d").unwrap();
    assert_eq!(out.data, vec![fields(&["a", "b"]), fields(&["c", "d"])]);
}

#[test]
fn before_first_chunk_can_rewrite_the_input() {
    let mut builder = ParserBuilder::new();
    builder.before_first_chunk(|chunk| Some(chunk.replace(';', ",")));
    let out = builder.parse_str("a;b\nc;d").unwrap();
    assert_eq!(out.data, vec![fields(&["a", "b"]), fields(&["c", "d"])]);
    assert_eq!(out.meta.delimiter, ",");
}

#[test]
fn step_streams_rows_without_accumulating() {
    let rows: Rc<RefCell<Vec<Row>>> = Rc::new(RefCell::new(Vec::new()));
    let cursors: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
    let seen_rows = Rc::clone(&rows);
    let seen_cursors = Rc::clone(&cursors);

    let mut builder = ParserBuilder::new();
    builder.on_step(move |step, _handle| {
        seen_rows.borrow_mut().push(step.row.clone());
        seen_cursors.borrow_mut().push(step.meta.cursor);
    });
    let out = builder.parse_str("a,b\nc,d\ne,f").unwrap();

    assert!(out.data.is_empty());
    assert_eq!(
        *rows.borrow(),
        vec![fields(&["a", "b"]), fields(&["c", "d"]), fields(&["e", "f"])]
    );
    assert_eq!(*cursors.borrow(), vec![4, 8, 11]);
}

#[test]
fn step_sees_row_errors_before_the_row() {
    let mismatches: Rc<RefCell<Vec<(usize, Vec<ParseErrorCode>)>>> =
        Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&mismatches);

    let mut builder = ParserBuilder::new();
    builder.header(true).on_step(move |step, _handle| {
        let codes = step.errors.iter().map(|e| e.code).collect();
        seen.borrow_mut().push((step.row.len(), codes));
    });
    builder.parse_str("A,B\na,b\nx,y,z").unwrap();

    assert_eq!(
        *mismatches.borrow(),
        vec![
            (2, vec![]),
            (3, vec![ParseErrorCode::TooManyFields]),
        ]
    );
}

#[test]
fn abort_from_a_step_callback() {
    let steps = Rc::new(Cell::new(0usize));
    let counted = Rc::clone(&steps);
    let completed: Rc<RefCell<Option<ParseOutput>>> = Rc::new(RefCell::new(None));
    let finished = Rc::clone(&completed);

    let mut builder = ParserBuilder::new();
    builder
        .chunk_size(4)
        .on_step(move |_step, handle| {
            counted.set(counted.get() + 1);
            if counted.get() == 2 {
                handle.abort();
            }
        })
        .on_complete(move |out| {
            *finished.borrow_mut() = Some(out.clone());
        });
    let out = builder.parse_str("a,b\nc,d\ne,f\ng,h").unwrap();

    assert!(out.meta.aborted);
    assert_eq!(steps.get(), 2);
    let completed = completed.borrow();
    assert!(completed.as_ref().unwrap().meta.aborted);
}

#[test]
fn chunk_callback_receives_each_chunks_rows() {
    let batches: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&batches);

    let mut builder = ParserBuilder::new();
    builder.delimiter(",").chunk_size(8).on_chunk(move |chunk, _handle| {
        seen.borrow_mut().push(chunk.data.len());
    });
    let out = builder.parse_str("a,b\nc,d\ne,f\ng,h").unwrap();

    assert!(out.data.is_empty());
    let total: usize = batches.borrow().iter().sum();
    assert_eq!(total, 4);
    assert!(batches.borrow().len() > 1);
}

#[test]
fn chunked_parsing_matches_single_shot() {
    let input = "h1,h2\r\nv1,\"v,2\"\r\n\r\na,\"b\r\nb2\",c\r\nx\r\ny,z";
    let reference = {
        let mut builder = ParserBuilder::new();
        builder
            .delimiter(",")
            .header(true)
            .skip_empty_lines(SkipEmptyLines::Empty);
        builder.parse_str(input).unwrap()
    };
    assert!(!reference.data.is_empty());

    for chunk_size in [1, 2, 3, 5, 7, 11, 13, 64] {
        let mut builder = ParserBuilder::new();
        builder
            .delimiter(",")
            .header(true)
            .skip_empty_lines(SkipEmptyLines::Empty)
            .chunk_size(chunk_size);
        let out = builder.parse_str(input).unwrap();
        assert_eq!(reference.data, out.data, "chunk size {}", chunk_size);
        assert_eq!(reference.errors, out.errors, "chunk size {}", chunk_size);
        assert_eq!(out.meta.cursor, input.len(), "chunk size {}", chunk_size);
    }
}

#[test]
fn quote_errors_keep_indices_across_chunk_boundaries() {
    let input = "ok,fine\nbad,\"x\"y,end\nlast,row";
    let reference = {
        let mut builder = ParserBuilder::new();
        builder.delimiter(",");
        builder.parse_str(input).unwrap()
    };
    for chunk_size in [1, 4, 9, 16] {
        let mut builder = ParserBuilder::new();
        builder.delimiter(",").chunk_size(chunk_size);
        let out = builder.parse_str(input).unwrap();
        assert_eq!(reference.errors, out.errors, "chunk size {}", chunk_size);
        assert_eq!(reference.data, out.data, "chunk size {}", chunk_size);
    }
}

/// Serves a fixed byte buffer through the range-fetch contract, recording
/// the ranges requested.
struct FakeFetcher {
    data: Vec<u8>,
    calls: Rc<RefCell<Vec<(u64, u64)>>>,
}

impl FakeFetcher {
    fn new(data: impl Into<Vec<u8>>) -> FakeFetcher {
        FakeFetcher { data: data.into(), calls: Rc::new(RefCell::new(Vec::new())) }
    }
}

impl RangeFetcher for FakeFetcher {
    fn fetch_range(&mut self, req: &RangeRequest) -> dsv::Result<RangeResponse> {
        self.calls.borrow_mut().push((req.start, req.end));
        let len = self.data.len() as u64;
        let start = req.start.min(len);
        let end = (req.end + 1).min(len);
        let slice = self.data[start as usize..end as usize].to_vec();
        Ok(RangeResponse {
            text: String::from_utf8(slice).expect("test data is ASCII"),
            bytes_read: end - start,
            at_end: end >= len,
        })
    }
}

#[test]
fn remote_input_is_fetched_in_ranges() {
    // 151 lines of 8 bytes plus one unterminated row: 1209 bytes.
    let mut data = "abc,def\n".repeat(151);
    data.push('x');
    assert_eq!(data.len(), 1209);

    let cursors: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&cursors);
    let mut fetcher = FakeFetcher::new(data.as_bytes());
    let calls = Rc::clone(&fetcher.calls);

    let mut builder = ParserBuilder::new();
    builder
        .delimiter(",")
        .chunk_size(500)
        .on_step(move |step, _handle| seen.borrow_mut().push(step.meta.cursor));
    let out = builder.parse_remote(&mut fetcher, "https://example.com/data.csv").unwrap();

    assert_eq!(
        *calls.borrow(),
        vec![(0, 499), (500, 999), (1000, 1499)]
    );
    let cursors = cursors.borrow();
    assert_eq!(cursors.len(), 152);
    assert!(cursors.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*cursors.last().unwrap(), 1209);
    assert_eq!(out.meta.cursor, 1209);
    assert_eq!(out.meta.num_bytes, Some(1209));
    assert_eq!(out.meta.first_byte, None);
}

#[test]
fn remote_input_can_resume_at_an_offset() {
    let data = "skipped,row\nwanted,row\nmore,rows";
    let mut fetcher = FakeFetcher::new(data.as_bytes());
    let calls = Rc::clone(&fetcher.calls);

    let mut builder = ParserBuilder::new();
    builder.delimiter(",").first_chunk_offset(12);
    let out = builder.parse_remote(&mut fetcher, "https://example.com/data.csv").unwrap();

    assert_eq!(calls.borrow()[0].0, 12);
    assert_eq!(
        out.data,
        vec![fields(&["wanted", "row"]), fields(&["more", "rows"])]
    );
    assert_eq!(out.meta.first_byte, Some(12));
    assert_eq!(out.meta.num_bytes, Some((data.len() - 12) as u64));
}

/// A fetcher that fails on the second range.
struct FlakyFetcher {
    inner: FakeFetcher,
    calls: usize,
}

impl RangeFetcher for FlakyFetcher {
    fn fetch_range(&mut self, req: &RangeRequest) -> dsv::Result<RangeResponse> {
        self.calls += 1;
        if self.calls > 1 {
            return Err(dsv::Error::transport(req.url, "connection reset"));
        }
        self.inner.fetch_range(req)
    }
}

#[test]
fn transport_failure_is_fatal_and_reported() {
    let data = "a,b\n".repeat(10);
    let fetcher =
        FlakyFetcher { inner: FakeFetcher::new(data.as_bytes()), calls: 0 };

    let errored = Rc::new(Cell::new(false));
    let seen = Rc::clone(&errored);
    let mut builder = ParserBuilder::new();
    builder
        .delimiter(",")
        .chunk_size(8)
        .on_error(move |_err| seen.set(true))
        .on_complete(|_out| panic!("complete must not run after a fatal error"));
    let result = builder.parse_remote(fetcher, "https://example.com/data.csv");

    assert!(result.is_err());
    assert!(errored.get());
}

#[test]
fn whole_output_serializes_to_the_wire_shape() {
    let mut builder = ParserBuilder::new();
    builder.header(true);
    let out = builder.parse_str("A,A\nx,y").unwrap();
    let value = serde_json::to_value(&out).unwrap();
    assert_eq!(
        value,
        serde_json::json!({
            "data": [{"A": "x", "A_1": "y"}],
            "errors": [],
            "meta": {
                "delimiter": ",",
                "linebreak": "\n",
                "aborted": false,
                "truncated": false,
                "cursor": 7,
                "fields": ["A", "A_1"],
                "renamedHeaders": {"A_1": "A"},
            },
        })
    );
}
