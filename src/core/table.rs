//! Purpose: Build and render column tables of JSON records as standard CSV.
//! Exports: `Table`.
//! Role: Output format of the measurement extractor.
//! Invariants: Columns appear in order of first appearance across rows.
//! Invariants: Fields are quoted only when they contain a separator, quote, CR, or LF.
use serde_json::{Map, Value};

const SEPARATOR: char = ',';
const QUOTE: char = '"';

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Map<String, Value>>,
}

impl Table {
    pub fn from_records(records: Vec<Map<String, Value>>) -> Self {
        let mut table = Table::default();
        for record in records {
            table.push(record);
        }
        table
    }

    pub fn push(&mut self, record: Map<String, Value>) {
        for key in record.keys() {
            if !self.columns.iter().any(|column| column == key) {
                self.columns.push(key.clone());
            }
        }
        self.rows.push(record);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Header line followed by one line per row, each terminated by `\n`.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        push_line(&mut out, self.columns.iter().cloned());
        for row in &self.rows {
            push_line(
                &mut out,
                self.columns
                    .iter()
                    .map(|column| row.get(column).map(field_text).unwrap_or_default()),
            );
        }
        out
    }
}

fn field_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn push_line<I>(out: &mut String, fields: I)
where
    I: Iterator<Item = String>,
{
    for (index, field) in fields.enumerate() {
        if index > 0 {
            out.push(SEPARATOR);
        }
        push_field(out, &field);
    }
    out.push('\n');
}

fn push_field(out: &mut String, field: &str) {
    let needs_quotes = field
        .chars()
        .any(|c| c == SEPARATOR || c == QUOTE || c == '\n' || c == '\r');
    if !needs_quotes {
        out.push_str(field);
        return;
    }
    out.push(QUOTE);
    for c in field.chars() {
        if c == QUOTE {
            out.push(QUOTE);
        }
        out.push(c);
    }
    out.push(QUOTE);
}

#[cfg(test)]
mod tests {
    use super::Table;
    use serde_json::{Map, Value, json};

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn columns_follow_first_appearance() {
        let table = Table::from_records(vec![
            record(json!({"b": 1, "a": 2})),
            record(json!({"c": 3, "a": 4})),
        ]);
        assert_eq!(table.columns(), ["b", "a", "c"]);
        assert_eq!(table.to_csv(), "b,a,c\n1,2,\n,4,3\n");
    }

    #[test]
    fn quoting_is_minimal() {
        let table = Table::from_records(vec![record(json!({
            "plain": "Parus major",
            "comma": "a,b",
            "quote": "say \"hi\"",
            "newline": "x\ny",
        }))]);
        assert_eq!(
            table.to_csv(),
            "plain,comma,quote,newline\nParus major,\"a,b\",\"say \"\"hi\"\"\",\"x\ny\"\n"
        );
    }

    #[test]
    fn values_render_as_text() {
        let table = Table::from_records(vec![record(json!({
            "n": 1.5,
            "flag": true,
            "missing": null,
            "nested": [1, 2],
        }))]);
        assert_eq!(table.to_csv(), "n,flag,missing,nested\n1.5,true,,\"[1,2]\"\n");
    }

    #[test]
    fn empty_table_has_blank_header() {
        let table = Table::from_records(Vec::new());
        assert!(table.is_empty());
        assert_eq!(table.to_csv(), "\n");
    }
}
