use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::scanner::ParseError;

impl Serialize for ParseError {
    /// Serializes to the wire shape `{type, code, message, row?, index?}`
    /// with the stable names from
    /// [`ParseErrorKind::as_str`](crate::ParseErrorKind::as_str) and
    /// [`ParseErrorCode::as_str`](crate::ParseErrorCode::as_str).
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = 3
            + usize::from(self.row.is_some())
            + usize::from(self.index.is_some());
        let mut state = serializer.serialize_struct("ParseError", len)?;
        state.serialize_field("type", self.kind().as_str())?;
        state.serialize_field("code", self.code.as_str())?;
        state.serialize_field("message", &self.message)?;
        if let Some(row) = self.row {
            state.serialize_field("row", &row)?;
        }
        if let Some(index) = self.index {
            state.serialize_field("index", &index)?;
        }
        state.end()
    }
}
