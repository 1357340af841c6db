use super::Direct;
use std::io::{Cursor, Read};

const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const WORD_STREAM: &str = "/WordDocument";
const MIN_RUN: usize = 4;
const MIN_TEXT: usize = 20;

/// Word 97-2003 binary documents. Only the `WordDocument` stream of the
/// compound file is read; the text is recovered from it as printable runs,
/// either 8-bit or UTF-16LE, whichever yields more. Formatting tables and
/// short binary noise fall below `MIN_RUN`.
pub(super) fn doc(bytes: &[u8]) -> Direct {
    if !bytes.starts_with(&OLE_MAGIC) {
        return Direct::Corrupt("doc: not an OLE compound file".into());
    }
    let mut comp = match cfb::CompoundFile::open(Cursor::new(bytes)) {
        Ok(c) => c,
        Err(e) => return Direct::Corrupt(format!("doc: {}", e)),
    };
    let mut stream = Vec::new();
    let read = comp
        .open_stream(WORD_STREAM)
        .and_then(|mut s| s.read_to_end(&mut stream));
    if let Err(e) = read {
        return Direct::Corrupt(format!("doc: {}: {}", WORD_STREAM, e));
    }

    let narrow = runs(stream.iter().map(|&b| b as char));
    let wide = runs(
        char::decode_utf16(
            stream
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]])),
        )
        .map(|c| c.unwrap_or('\u{0}')),
    );
    let text = if wide.chars().count() > narrow.chars().count() {
        wide
    } else {
        narrow
    };
    if text.chars().count() > MIN_TEXT {
        Direct::Text { text, pages: 1 }
    } else {
        Direct::Text {
            text: String::new(),
            pages: 1,
        }
    }
}

fn runs(chars: impl Iterator<Item = char>) -> String {
    let mut lines = Vec::new();
    let mut run = String::new();
    for c in chars {
        if c == '\r' || c == '\n' || c == '\u{0b}' {
            flush(&mut run, &mut lines);
        } else if c == '\t' || !c.is_control() {
            run.push(c);
        } else {
            flush(&mut run, &mut lines);
        }
    }
    flush(&mut run, &mut lines);
    lines.join("\n")
}

fn flush(run: &mut String, lines: &mut Vec<String>) {
    let trimmed = run.trim();
    if trimmed.chars().count() >= MIN_RUN && trimmed.chars().any(|c| c.is_alphanumeric()) {
        lines.push(trimmed.to_string());
    }
    run.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn compound(streams: &[(&str, &[u8])]) -> Vec<u8> {
        let mut comp = cfb::CompoundFile::create(Cursor::new(Vec::new())).unwrap();
        for (path, body) in streams {
            let mut s = comp.create_stream(path).unwrap();
            s.write_all(body).unwrap();
        }
        comp.flush().unwrap();
        comp.into_inner().into_inner()
    }

    #[test]
    fn printable_runs_survive_binary_noise() {
        let mut word = vec![0xec, 0xa5, 0xc1, 0, 0, 1, 2, 0xff, 0x10];
        word.extend_from_slice(b"Quarterly budget review\r");
        word.extend_from_slice(&[0, 0, b'x', b'y', 0, 3]);
        word.extend_from_slice(b"Owner: Finance team\r\0\0");
        let bytes = compound(&[(WORD_STREAM, &word[..])]);
        match doc(&bytes) {
            Direct::Text { text, .. } => {
                assert_eq!(text, "Quarterly budget review\nOwner: Finance team")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn other_streams_are_ignored() {
        let bytes = compound(&[
            (WORD_STREAM, &b"\0\0Meeting notes for March\r\0"[..]),
            ("/1Table", &b"\0Times New Roman\0Heading style sheet\0"[..]),
            ("/\u{5}SummaryInformation", &b"\0Author: Someone Else\0"[..]),
        ]);
        match doc(&bytes) {
            Direct::Text { text, .. } => assert_eq!(text, "Meeting notes for March"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn utf16_text_is_recovered() {
        let mut word = vec![0xec, 0xa5, 0, 0];
        for unit in "Réunion budgétaire trimestrielle\r".encode_utf16() {
            word.extend_from_slice(&unit.to_le_bytes());
        }
        let bytes = compound(&[(WORD_STREAM, &word[..])]);
        match doc(&bytes) {
            Direct::Text { text, .. } => assert_eq!(text, "Réunion budgétaire trimestrielle"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn short_or_foreign_input() {
        assert!(matches!(doc(b"hello"), Direct::Corrupt(_)));
        let mut truncated = OLE_MAGIC.to_vec();
        truncated.extend_from_slice(b"\0tiny\0");
        assert!(matches!(doc(&truncated), Direct::Corrupt(_)));

        let no_word = compound(&[("/Workbook", &b"\0some spreadsheet text here\0"[..])]);
        assert!(matches!(doc(&no_word), Direct::Corrupt(_)));

        let tiny = compound(&[(WORD_STREAM, &b"\0tiny\0"[..])]);
        assert_eq!(
            doc(&tiny),
            Direct::Text {
                text: String::new(),
                pages: 1
            }
        );
    }
}
