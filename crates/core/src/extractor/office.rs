//! OOXML documents and spreadsheets.

#[cfg(not(feature = "office"))]
use super::Direct;

#[cfg(feature = "office")]
mod imp {
    use crate::extractor::Direct;
    use calamine::Reader as _;
    use quick_xml::events::{BytesStart, Event};
    use quick_xml::Reader;
    use std::io::{Cursor, Read};

    fn local_name(q: &[u8]) -> &[u8] {
        match q.iter().position(|&b| b == b':') {
            Some(i) => &q[i + 1..],
            None => q,
        }
    }

    fn attr_val(e: &BytesStart<'_>, key_local: &[u8]) -> Option<String> {
        e.attributes()
            .with_checks(false)
            .flatten()
            .find(|a| local_name(a.key.as_ref()) == key_local)
            .map(|a| String::from_utf8_lossy(&a.value).into_owned())
    }

    fn attr_val_q(e: &BytesStart<'_>, qname: &[u8]) -> Option<String> {
        e.attributes()
            .with_checks(false)
            .flatten()
            .find(|a| a.key.as_ref() == qname)
            .map(|a| String::from_utf8_lossy(&a.value).into_owned())
    }

    type Archive = zip::ZipArchive<Cursor<Vec<u8>>>;

    fn open(bytes: &[u8]) -> Result<Archive, String> {
        zip::ZipArchive::new(Cursor::new(bytes.to_vec())).map_err(|e| e.to_string())
    }

    fn read_entry(zip: &mut Archive, name: &str) -> Result<String, String> {
        let mut entry = zip.by_name(name).map_err(|e| format!("{}: {}", name, e))?;
        let mut xml = String::new();
        entry
            .read_to_string(&mut xml)
            .map_err(|e| format!("{}: {}", name, e))?;
        Ok(xml)
    }

    /// Non-empty paragraph texts of a WordprocessingML or DrawingML part.
    fn paragraphs(xml: &str) -> Result<Vec<String>, String> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(false);
        let mut buf = Vec::new();
        let mut out = Vec::new();
        let mut cur = String::new();
        let mut in_t = false;
        loop {
            buf.clear();
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => match local_name(e.name().as_ref()) {
                    b"p" => cur.clear(),
                    b"t" => in_t = true,
                    b"tab" => cur.push('\t'),
                    b"br" => cur.push('\n'),
                    _ => {}
                },
                Ok(Event::Empty(e)) => match local_name(e.name().as_ref()) {
                    b"tab" => cur.push('\t'),
                    b"br" => cur.push('\n'),
                    _ => {}
                },
                Ok(Event::End(e)) => match local_name(e.name().as_ref()) {
                    b"t" => in_t = false,
                    b"p" => {
                        let line = cur.trim();
                        if !line.is_empty() {
                            out.push(line.to_string());
                        }
                        cur.clear();
                    }
                    _ => {}
                },
                Ok(Event::Text(t)) if in_t => {
                    if let Ok(s) = t.unescape() {
                        cur.push_str(&s);
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(e.to_string()),
                _ => {}
            }
        }
        Ok(out)
    }

    pub fn docx(bytes: &[u8]) -> Direct {
        let result = open(bytes)
            .and_then(|mut zip| read_entry(&mut zip, "word/document.xml"))
            .and_then(|xml| paragraphs(&xml));
        match result {
            Ok(paras) => Direct::Text {
                text: paras.join("\n"),
                pages: 1,
            },
            Err(e) => Direct::Corrupt(format!("docx: {}", e)),
        }
    }

    fn slide_number(name: &str) -> Option<u32> {
        name.strip_prefix("ppt/slides/slide")?
            .strip_suffix(".xml")?
            .parse()
            .ok()
    }

    /// Slide parts in presentation order, falling back to file-name order
    /// when the relationships cannot be followed.
    fn slide_order(zip: &mut Archive) -> Vec<String> {
        let mut targets = std::collections::HashMap::new();
        if let Ok(rels) = read_entry(zip, "ppt/_rels/presentation.xml.rels") {
            let mut r = Reader::from_str(&rels);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match r.read_event_into(&mut buf) {
                    Ok(Event::Empty(e)) | Ok(Event::Start(e)) => {
                        if local_name(e.name().as_ref()) == b"Relationship" {
                            if let (Some(id), Some(t)) = (attr_val(&e, b"Id"), attr_val(&e, b"Target")) {
                                let t = t.trim_start_matches('/').to_string();
                                let t = if t.starts_with("ppt/") { t } else { format!("ppt/{}", t) };
                                targets.insert(id, t);
                            }
                        }
                    }
                    Ok(Event::Eof) | Err(_) => break,
                    _ => {}
                }
            }
        }
        let mut ordered = Vec::new();
        if let Ok(pres) = read_entry(zip, "ppt/presentation.xml") {
            let mut r = Reader::from_str(&pres);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match r.read_event_into(&mut buf) {
                    Ok(Event::Empty(e)) | Ok(Event::Start(e)) => {
                        if local_name(e.name().as_ref()) == b"sldId" {
                            if let Some(t) = attr_val_q(&e, b"r:id").and_then(|rid| targets.get(&rid)) {
                                ordered.push(t.clone());
                            }
                        }
                    }
                    Ok(Event::Eof) | Err(_) => break,
                    _ => {}
                }
            }
        }
        if !ordered.is_empty() {
            return ordered;
        }
        let mut names: Vec<(u32, String)> = zip
            .file_names()
            .filter_map(|n| slide_number(n).map(|i| (i, n.to_string())))
            .collect();
        names.sort();
        names.into_iter().map(|(_, n)| n).collect()
    }

    pub fn pptx(bytes: &[u8]) -> Direct {
        let mut zip = match open(bytes) {
            Ok(z) => z,
            Err(e) => return Direct::Corrupt(format!("pptx: {}", e)),
        };
        let slides = slide_order(&mut zip);
        if slides.is_empty() {
            return Direct::Corrupt("pptx: no slides".into());
        }
        let mut parts = Vec::new();
        for (i, name) in slides.iter().enumerate() {
            parts.push(format!("=== Slide {} ===", i + 1));
            match read_entry(&mut zip, name).and_then(|xml| paragraphs(&xml)) {
                Ok(paras) => parts.extend(paras),
                Err(e) => tracing::debug!("skipping unreadable slide {}: {}", name, e),
            }
        }
        Direct::Text {
            text: parts.join("\n").trim().to_string(),
            pages: slides.len() as u32,
        }
    }

    fn cell_to_string(c: &calamine::DataType) -> String {
        use calamine::DataType as D;
        match c {
            D::Empty => String::new(),
            D::String(s) => s.replace("\r\n", " ").replace(['\r', '\n'], " "),
            D::Float(f) => {
                if f.fract() == 0.0 {
                    format!("{}", *f as i64)
                } else {
                    f.to_string()
                }
            }
            D::Int(i) => i.to_string(),
            D::Bool(b) => b.to_string(),
            D::Error(e) => format!("#ERR:{:?}", e),
            other => format!("{}", other),
        }
    }

    pub fn spreadsheet(bytes: &[u8]) -> Direct {
        let mut workbook = match calamine::open_workbook_auto_from_rs(Cursor::new(bytes.to_vec())) {
            Ok(wb) => wb,
            Err(e) => return Direct::Corrupt(format!("workbook: {}", e)),
        };
        let names = workbook.sheet_names().to_vec();
        let mut parts = Vec::new();
        for name in &names {
            let range = match workbook.worksheet_range(name) {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!("skipping sheet {}: {}", name, e);
                    continue;
                }
            };
            parts.push(format!("=== Sheet: {} ===", name));
            for row in range.rows() {
                let cells: Vec<String> = row
                    .iter()
                    .map(cell_to_string)
                    .filter(|c| !c.trim().is_empty())
                    .collect();
                if !cells.is_empty() {
                    parts.push(cells.join(" | "));
                }
            }
            parts.push(String::new());
        }
        Direct::Text {
            text: parts.join("\n").trim().to_string(),
            pages: names.len().max(1) as u32,
        }
    }

}

#[cfg(feature = "office")]
pub(super) use imp::{docx, pptx, spreadsheet};

#[cfg(not(feature = "office"))]
pub(super) fn docx(_bytes: &[u8]) -> Direct {
    Direct::Unsupported("built without office support".into())
}

#[cfg(not(feature = "office"))]
pub(super) fn pptx(_bytes: &[u8]) -> Direct {
    Direct::Unsupported("built without office support".into())
}

#[cfg(not(feature = "office"))]
pub(super) fn spreadsheet(_bytes: &[u8]) -> Direct {
    Direct::Unsupported("built without office support".into())
}
