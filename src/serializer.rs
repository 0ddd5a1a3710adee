use serde::ser::{Serialize, SerializeMap, SerializeStruct, Serializer};

use crate::record::{KeyedRow, ParseMeta, ParseOutput, Row, PARSED_EXTRA_KEY};

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Row::Fields(ref fields) => fields.serialize(serializer),
            Row::Keyed(ref row) => row.serialize(serializer),
        }
    }
}

impl Serialize for KeyedRow {
    /// Serializes to a map in document order; surplus fields appear as an
    /// array under [`PARSED_EXTRA_KEY`].
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let pairs = self.iter().count();
        let extra = !self.extra().is_empty();
        let mut map = serializer.serialize_map(Some(pairs + usize::from(extra)))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key, value)?;
        }
        if extra {
            map.serialize_entry(PARSED_EXTRA_KEY, self.extra())?;
        }
        map.end()
    }
}

impl Serialize for ParseMeta {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = 5
            + usize::from(self.fields.is_some())
            + usize::from(self.renamed_headers.is_some())
            + usize::from(self.first_byte.is_some())
            + usize::from(self.num_bytes.is_some());
        let mut state = serializer.serialize_struct("ParseMeta", len)?;
        state.serialize_field("delimiter", &self.delimiter)?;
        state.serialize_field("linebreak", &self.linebreak)?;
        state.serialize_field("aborted", &self.aborted)?;
        state.serialize_field("truncated", &self.truncated)?;
        state.serialize_field("cursor", &self.cursor)?;
        if let Some(ref fields) = self.fields {
            state.serialize_field("fields", fields)?;
        }
        if let Some(ref renamed) = self.renamed_headers {
            state.serialize_field("renamedHeaders", renamed)?;
        }
        if let Some(first_byte) = self.first_byte {
            state.serialize_field("firstByte", &first_byte)?;
        }
        if let Some(num_bytes) = self.num_bytes {
            state.serialize_field("numBytes", &num_bytes)?;
        }
        state.end()
    }
}

impl Serialize for ParseOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ParseOutput", 3)?;
        state.serialize_field("data", &self.data)?;
        state.serialize_field("errors", &self.errors)?;
        state.serialize_field("meta", &self.meta)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::record::{KeyedRow, Row};
    use crate::ParserBuilder;

    #[test]
    fn positional_rows_serialize_as_arrays() {
        let row = Row::from(vec!["a", "b"]);
        assert_eq!(serde_json::to_value(&row).unwrap(), json!(["a", "b"]));
    }

    #[test]
    fn keyed_rows_serialize_as_objects() {
        let row: KeyedRow =
            vec![("name", "foo"), ("size", "3")].into_iter().collect();
        assert_eq!(
            serde_json::to_value(&Row::Keyed(row)).unwrap(),
            json!({"name": "foo", "size": "3"})
        );
    }

    #[test]
    fn surplus_fields_serialize_under_the_reserved_key() {
        let mut builder = ParserBuilder::new();
        builder.header(true);
        let out = builder.parse_str("A,B\na,b,c,d").unwrap();
        assert_eq!(
            serde_json::to_value(&out.data[0]).unwrap(),
            json!({"A": "a", "B": "b", "__parsed_extra": ["c", "d"]})
        );
    }

    #[test]
    fn errors_serialize_with_wire_names() {
        let out = ParserBuilder::new().parse_str("a,\"b").unwrap();
        let errors = serde_json::to_value(&out.errors).unwrap();
        assert_eq!(
            errors,
            json!([{
                "type": "Quotes",
                "code": "MissingQuotes",
                "message": "Quoted field unterminated",
                "row": 0,
                "index": 3,
            }])
        );
    }

    #[test]
    fn meta_serializes_optional_fields_only_when_present() {
        let out = ParserBuilder::new().parse_str("a,b\nc,d").unwrap();
        let meta = serde_json::to_value(&out.meta).unwrap();
        assert_eq!(
            meta,
            json!({
                "delimiter": ",",
                "linebreak": "\n",
                "aborted": false,
                "truncated": false,
                "cursor": 7,
            })
        );
    }
}
