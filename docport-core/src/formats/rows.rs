//! Flattening shared by the row-oriented formats (csv, xlsx).

use indexmap::IndexSet;
use serde_json::{Map, Value};
use tracing::warn;

use crate::document::Document;
use crate::errors::PortResult;

use super::ReadOptions;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Cell {
    pub(crate) fn into_text(self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(text) => text,
            Cell::Number(n) => Value::from(n).to_string(),
            Cell::Bool(b) => b.to_string(),
        }
    }
}

/// A header row (union of every document's keys, first-seen order) and one
/// row of cells per document.
pub(crate) struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

pub(crate) fn documents_to_table(documents: &[Document]) -> PortResult<Table> {
    let objects = documents
        .iter()
        .map(|doc| match serde_json::to_value(doc)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        })
        .collect::<PortResult<Vec<Map<String, Value>>>>()?;

    let headers: IndexSet<String> = objects
        .iter()
        .flat_map(|object| object.keys().cloned())
        .collect();

    let rows = objects
        .iter()
        .map(|object| {
            headers
                .iter()
                .map(|key| object.get(key).map_or(Cell::Empty, encode_cell))
                .collect()
        })
        .collect();

    Ok(Table {
        headers: headers.into_iter().collect(),
        rows,
    })
}

fn encode_cell(value: &Value) -> Cell {
    match value {
        Value::Null => Cell::Empty,
        Value::String(s) => Cell::Text(s.clone()),
        Value::Bool(b) => Cell::Bool(*b),
        Value::Number(n) => n.as_f64().map_or_else(|| Cell::Text(n.to_string()), Cell::Number),
        other => Cell::Text(other.to_string()),
    }
}

/// Text that looks like a JSON object or array is parsed back; anything
/// else, including unparsable JSON, stays a string.
fn decode_text(text: String) -> Value {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    } else {
        Value::String(text)
    }
}

fn decode_cell(cell: Cell) -> Option<Value> {
    match cell {
        Cell::Empty => None,
        Cell::Text(text) if text.is_empty() => None,
        Cell::Text(text) => Some(decode_text(text)),
        Cell::Number(n) => Some(number_value(n)),
        Cell::Bool(b) => Some(Value::Bool(b)),
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

/// Rebuild documents from rows. Rows that cannot form a document (no
/// `type`, malformed identity fields) are skipped with a warning.
pub(crate) fn table_to_documents(table: Table, options: &ReadOptions) -> Vec<Document> {
    let Table { headers, rows } = table;
    let mut documents = Vec::with_capacity(rows.len());

    for (index, row) in rows.into_iter().enumerate() {
        let mut object = Map::new();
        for (header, cell) in headers.iter().zip(row) {
            if header.is_empty() {
                continue;
            }
            if let Some(value) = decode_cell(cell) {
                object.insert(header.clone(), value);
            }
        }
        if object.is_empty() {
            continue;
        }
        match serde_json::from_value::<Document>(Value::Object(object)) {
            Ok(doc) => documents.push(doc),
            Err(err) => warn!(row = index + 1, "Skipping row that is not a document: {}", err),
        }
    }

    options.retain(&mut documents);
    documents
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn headers_are_union_of_keys() {
        let docs = vec![
            doc(json!({ "type": "topic", "title": "a" })),
            doc(json!({ "type": "topic", "slug": "b", "tags": ["x"] })),
        ];
        let table = documents_to_table(&docs).unwrap();
        assert_eq!(table.headers, vec!["type", "title", "slug", "tags"]);
        assert_eq!(table.rows[0][2], Cell::Empty);
        assert_eq!(table.rows[1][3], Cell::Text("[\"x\"]".to_string()));
    }

    #[test]
    fn cells_decode_best_effort() {
        assert_eq!(decode_text("{\"a\":1}".to_string()), json!({ "a": 1 }));
        assert_eq!(decode_text("[broken".to_string()), json!("[broken"));
        assert_eq!(decode_text("42".to_string()), json!("42"));
        assert_eq!(decode_cell(Cell::Number(3.0)), Some(json!(3)));
        assert_eq!(decode_cell(Cell::Text(String::new())), None);
    }

    #[test]
    fn rows_without_type_are_skipped() {
        let table = Table {
            headers: vec!["type".to_string(), "title".to_string()],
            rows: vec![
                vec![Cell::Text("topic".to_string()), Cell::Text("kept".to_string())],
                vec![Cell::Empty, Cell::Text("dropped".to_string())],
            ],
        };
        let documents = table_to_documents(table, &ReadOptions::default());
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].title(), Some("kept"));
    }
}
