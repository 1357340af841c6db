use super::Direct;

/// UTF-8, falling back to Latin-1 byte-for-byte.
pub(super) fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// One line per row, non-empty cells joined with ` | `.
pub(super) fn csv(bytes: &[u8]) -> Direct {
    let text = decode(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut lines = Vec::new();
    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(e) => return Direct::Corrupt(format!("csv: {}", e)),
        };
        let cells: Vec<&str> = record.iter().filter(|c| !c.is_empty()).collect();
        if !cells.is_empty() {
            lines.push(cells.join(" | "));
        }
    }
    Direct::Text {
        text: lines.join("\n"),
        pages: 1,
    }
}

/// Pretty-printed when it parses, raw otherwise.
pub(super) fn json(bytes: &[u8]) -> Direct {
    let raw = decode(bytes);
    let text = serde_json::from_str::<serde_json::Value>(&raw)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or(raw);
    Direct::Text { text, pages: 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(d: Direct) -> String {
        match d {
            Direct::Text { text, .. } => text,
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn csv_rows_skip_empty_cells() {
        let out = text_of(csv(b"name,amount,\nrent,1200,\n,,\n"));
        assert_eq!(out, "name | amount\nrent | 1200");
    }

    #[test]
    fn csv_accepts_latin1() {
        let out = text_of(csv(b"caf\xe9,2\n"));
        assert_eq!(out, "caf\u{e9} | 2");
    }

    #[test]
    fn json_is_pretty_printed_or_kept_raw() {
        assert_eq!(text_of(json(br#"{"a":1}"#)), "{\n  \"a\": 1\n}");
        assert_eq!(text_of(json(b"{not json")), "{not json");
    }
}
