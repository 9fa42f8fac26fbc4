//! Tab-separated staging rows in PostgreSQL `COPY` text format.

use persist_types::{PersistError, PersistResult};

/// Null marker.
pub const NULL: &str = "\\N";

pub fn escape(field: &str, out: &mut String) {
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
}

/// Render one row, terminated by a newline.
pub fn format_row<'a>(fields: impl IntoIterator<Item = Option<&'a str>>) -> String {
    let mut line = String::new();
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            line.push('\t');
        }
        match field {
            Some(text) => escape(text, &mut line),
            None => line.push_str(NULL),
        }
    }
    line.push('\n');
    line
}

/// Split one line (without its newline) into fields.
pub fn parse_row(line: &str) -> PersistResult<Vec<Option<String>>> {
    line.split('\t').map(parse_field).collect()
}

fn parse_field(raw: &str) -> PersistResult<Option<String>> {
    if raw == NULL {
        return Ok(None);
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            other => {
                return Err(PersistError::invalid(format!(
                    "bad escape in staging row: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nulls_and_escapes() {
        let line = format_row([Some("a\tb"), None, Some("back\\slash\n"), Some("")]);
        assert_eq!(line, "a\\tb\t\\N\tback\\\\slash\\n\t\n");
        let fields = parse_row(line.trim_end_matches('\n')).unwrap();
        assert_eq!(
            fields,
            vec![
                Some("a\tb".to_string()),
                None,
                Some("back\\slash\n".to_string()),
                Some(String::new()),
            ]
        );
    }

    #[test]
    fn literal_backslash_n_is_not_null() {
        let line = format_row([Some("\\N")]);
        assert_eq!(parse_row(line.trim_end()).unwrap(), vec![Some("\\N".to_string())]);
    }

    #[test]
    fn dangling_escape_is_rejected() {
        assert!(parse_row("abc\\").is_err());
    }
}
