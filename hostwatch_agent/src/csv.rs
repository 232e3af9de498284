//! Minimal comma-separated encoding for chunk files.
//!
//! Fields are quoted only when they contain a delimiter, a quote or a line
//! break; inner quotes are doubled. The parser accepts exactly what the
//! encoder produces plus `\r\n` line endings.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CsvError {
    #[error("unterminated quoted field on line {0}")]
    Unterminated(usize),
    #[error("line {line} has {got} fields, header has {want}")]
    Width { line: usize, got: usize, want: usize },
}

/// Header plus rows of one chunk document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&encode_row(&self.header));
        for row in &self.rows {
            out.push_str(&encode_row(row));
        }
        out.into_bytes()
    }
}

fn needs_quotes(field: &str) -> bool {
    field.contains([',', '"', '\n', '\r'])
}

/// Encode one row, including the trailing newline.
pub fn encode_row<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = String::new();
    for (i, f) in fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        let f = f.as_ref();
        if needs_quotes(f) {
            line.push('"');
            line.push_str(&f.replace('"', "\"\""));
            line.push('"');
        } else {
            line.push_str(f);
        }
    }
    line.push('\n');
    line
}

/// Parse a whole document. An empty document yields an empty table.
pub fn parse(text: &str) -> Result<Table, CsvError> {
    let mut records: Vec<Vec<String>> = Vec::new();
    let mut field = String::new();
    let mut record: Vec<String> = Vec::new();
    let mut in_quotes = false;
    let mut line = 1usize;
    let mut record_start = 1usize;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
                line += 1;
                record_start = line;
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err(CsvError::Unterminated(record_start));
    }
    // last line without trailing newline
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    let mut it = records.into_iter();
    let Some(header) = it.next() else {
        return Ok(Table::default());
    };
    let mut rows = Vec::new();
    for (i, row) in it.enumerate() {
        // tolerate blank trailing lines
        if row.len() == 1 && row[0].is_empty() {
            continue;
        }
        if row.len() != header.len() {
            return Err(CsvError::Width {
                line: i + 2,
                got: row.len(),
                want: header.len(),
            });
        }
        rows.push(row);
    }
    Ok(Table { header, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(encode_row(&["a", "b"]), "a,b\n");
        assert_eq!(encode_row(&["x,y", "say \"hi\""]), "\"x,y\",\"say \"\"hi\"\"\"\n");
    }

    #[test]
    fn parses_quoted_fields_and_crlf() {
        let t = parse("name,cpu\r\n\"a,b\",1\r\n\"q\"\"x\",2\r\n").unwrap();
        assert_eq!(t.header, vec!["name", "cpu"]);
        assert_eq!(t.rows[0], vec!["a,b", "1"]);
        assert_eq!(t.rows[1], vec!["q\"x", "2"]);
    }

    #[test]
    fn encoder_output_parses_back() {
        let table = Table {
            header: vec!["capture_time".into(), "process_name".into()],
            rows: vec![
                vec!["t1".into(), "Web Content, Isolated".into()],
                vec!["t2".into(), "multi\nline".into()],
            ],
        };
        let back = parse(std::str::from_utf8(&table.to_bytes()).unwrap()).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn header_only_and_empty_documents() {
        let t = parse("a,b\n").unwrap();
        assert_eq!(t.header, vec!["a", "b"]);
        assert!(t.rows.is_empty());
        assert_eq!(parse("").unwrap(), Table::default());
    }

    #[test]
    fn rejects_ragged_rows_and_open_quotes() {
        assert_eq!(
            parse("a,b\n1\n"),
            Err(CsvError::Width {
                line: 2,
                got: 1,
                want: 2
            })
        );
        assert_eq!(parse("a\n\"open\n"), Err(CsvError::Unterminated(2)));
    }
}
