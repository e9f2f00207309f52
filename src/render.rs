/// The 2D table handed to downstream renderers: row 0 is the header, `None`
/// cells are questions the user never answered.
pub type Table = Vec<Vec<Option<String>>>;

/// Minimal-quoting CSV serialization of a table, one row per line. `None`
/// cells render empty.
pub fn to_csv(table: &Table) -> String {
    let mut out = String::new();
    for row in table {
        let line = row
            .iter()
            .map(|cell| csv_quote(cell.as_deref().unwrap_or("")))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
