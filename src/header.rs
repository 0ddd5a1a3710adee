use std::collections::{HashMap, HashSet};

use dsv_core::{ParseError, ParseErrorCode};

use crate::record::KeyedRow;

/// Header names captured from the first data row of a parse.
#[derive(Clone, Debug)]
pub(crate) struct Headers {
    fields: Vec<String>,
    renamed: Option<HashMap<String, String>>,
}

impl Headers {
    /// Consume the first row as header names.
    ///
    /// Duplicate names are deduplicated deterministically: the first
    /// occurrence keeps the original name, later occurrences get the suffix
    /// `_1`, `_2`, … choosing the smallest integer whose result is absent
    /// from the set of names assigned so far.
    pub(crate) fn from_row(row: Vec<String>) -> Headers {
        let mut fields = Vec::with_capacity(row.len());
        let mut seen: HashSet<String> = HashSet::with_capacity(row.len());
        let mut renamed = HashMap::new();
        for name in row {
            if seen.insert(name.clone()) {
                fields.push(name);
                continue;
            }
            let mut n = 1usize;
            let unique = loop {
                let candidate = format!("{}_{}", name, n);
                if !seen.contains(&candidate) {
                    break candidate;
                }
                n += 1;
            };
            seen.insert(unique.clone());
            renamed.insert(unique.clone(), name);
            fields.push(unique);
        }
        let renamed = if renamed.is_empty() { None } else { Some(renamed) };
        Headers { fields, renamed }
    }

    pub(crate) fn fields(&self) -> &[String] {
        &self.fields
    }

    pub(crate) fn renamed(&self) -> Option<&HashMap<String, String>> {
        self.renamed.as_ref()
    }

    /// Project a data row onto these headers.
    ///
    /// Shorter rows pair with a prefix of the headers, longer rows overflow
    /// into the keyed row's surplus storage; either mismatch is reported
    /// against `data_row`, the row's index among emitted data rows.
    pub(crate) fn project(
        &self,
        row: Vec<String>,
        data_row: usize,
    ) -> (KeyedRow, Option<ParseError>) {
        let expected = self.fields.len();
        let got = row.len();
        let mut pairs = Vec::with_capacity(got.min(expected));
        let mut extra = Vec::new();
        for (i, value) in row.into_iter().enumerate() {
            match self.fields.get(i) {
                Some(name) => pairs.push((name.clone(), value)),
                None => extra.push(value),
            }
        }
        let error = if got < expected {
            Some(ParseError {
                code: ParseErrorCode::TooFewFields,
                message: format!(
                    "Too few fields: expected {} fields but parsed {}",
                    expected, got
                ),
                row: Some(data_row),
                index: None,
            })
        } else if got > expected {
            Some(ParseError {
                code: ParseErrorCode::TooManyFields,
                message: format!(
                    "Too many fields: expected {} fields but parsed {}",
                    expected, got
                ),
                row: Some(data_row),
                index: None,
            })
        } else {
            None
        };
        (KeyedRow::from_parts(pairs, extra), error)
    }
}

#[cfg(test)]
mod tests {
    use dsv_core::ParseErrorCode;

    use super::Headers;

    fn names(row: &[&str]) -> Vec<String> {
        row.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn plain_headers_are_untouched() {
        let headers = Headers::from_row(names(&["a", "b", "c"]));
        assert_eq!(headers.fields(), &["a", "b", "c"]);
        assert!(headers.renamed().is_none());
    }

    #[test]
    fn duplicates_get_numeric_suffixes() {
        let headers = Headers::from_row(names(&["Column", "Column"]));
        assert_eq!(headers.fields(), &["Column", "Column_1"]);
        let renamed = headers.renamed().unwrap();
        assert_eq!(renamed.len(), 1);
        assert_eq!(renamed["Column_1"], "Column");
    }

    #[test]
    fn suffix_skips_names_already_taken() {
        // The literal "a_1" occupies the first suffix, so the duplicate of
        // "a" has to take "_2".
        let headers = Headers::from_row(names(&["a", "a_1", "a"]));
        assert_eq!(headers.fields(), &["a", "a_1", "a_2"]);
    }

    #[test]
    fn dedup_is_a_function_of_the_row_alone() {
        let first = Headers::from_row(names(&["x", "x", "y", "x"]));
        let second = Headers::from_row(names(&["x", "x", "y", "x"]));
        assert_eq!(first.fields(), second.fields());
        assert_eq!(first.fields(), &["x", "x_1", "y", "x_2"]);
    }

    #[test]
    fn exact_width_projects_cleanly() {
        let headers = Headers::from_row(names(&["a", "b"]));
        let (row, err) = headers.project(names(&["1", "2"]), 0);
        assert!(err.is_none());
        assert_eq!(row.get("a"), Some("1"));
        assert_eq!(row.get("b"), Some("2"));
        assert!(row.extra().is_empty());
    }

    #[test]
    fn short_rows_report_too_few_fields() {
        let headers = Headers::from_row(names(&["a", "b", "c"]));
        let (row, err) = headers.project(names(&["1", "2"]), 4);
        let err = err.unwrap();
        assert_eq!(err.code, ParseErrorCode::TooFewFields);
        assert_eq!(err.row, Some(4));
        assert_eq!(row.len(), 2);
        assert_eq!(row.get("c"), None);
    }

    #[test]
    fn long_rows_overflow_into_extra() {
        let headers = Headers::from_row(names(&["a", "b", "c"]));
        let (row, err) = headers.project(names(&["1", "2", "3", "4", "5"]), 0);
        let err = err.unwrap();
        assert_eq!(err.code, ParseErrorCode::TooManyFields);
        assert_eq!(err.row, Some(0));
        assert_eq!(row.get("c"), Some("3"));
        assert_eq!(row.extra(), &["4".to_string(), "5".to_string()]);
    }
}
