use super::Direct;

#[cfg(feature = "pdf")]
pub(super) fn extract(bytes: &[u8], scanned_chars_per_page: usize) -> Direct {
    use tracing::debug;

    let doc = match lopdf::Document::load_mem(bytes) {
        Ok(d) => d,
        Err(e) => return Direct::Corrupt(format!("pdf: {}", e)),
    };
    let pages = doc.get_pages();
    let page_count = pages.len() as u32;
    let text = match pdf_extract::extract_text_from_mem(bytes) {
        Ok(t) => t,
        Err(e) => {
            debug!("pdf text layer unreadable: {}", e);
            String::new()
        }
    };
    if !super::is_scanned(&text, page_count, scanned_chars_per_page) {
        return Direct::Text {
            text,
            pages: page_count,
        };
    }

    let mut page_images = Vec::new();
    for page_id in pages.values() {
        match doc.get_page_images(*page_id) {
            Ok(images) => {
                // Only JPEG streams can be handed over without decoding.
                page_images.extend(
                    images
                        .iter()
                        .filter(|img| {
                            img.filters
                                .as_ref()
                                .map(|f| f.iter().any(|name| name == "DCTDecode"))
                                .unwrap_or(false)
                        })
                        .map(|img| img.content.to_vec()),
                );
            }
            Err(e) => debug!("no images on page {:?}: {}", page_id, e),
        }
    }
    Direct::Scanned {
        text,
        pages: page_count,
        page_images,
    }
}

#[cfg(not(feature = "pdf"))]
pub(super) fn extract(_bytes: &[u8], _scanned_chars_per_page: usize) -> Direct {
    Direct::Unsupported("built without pdf support".into())
}

/// A PDF whose pages carry nothing but one JPEG image each.
#[cfg(all(test, feature = "pdf"))]
pub(super) fn image_only_pdf(pages: usize) -> Vec<u8> {
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();
    for n in 0..pages {
        let mut jpeg = vec![0xff, 0xd8];
        jpeg.extend(format!("page{}", n).bytes());
        let image = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 8,
                "Height" => 8,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        ));
        let content = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
        let page = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im1" => image },
            },
        });
        kids.push(Object::Reference(page));
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(595),
                Object::Integer(842),
            ],
        }),
    );
    let catalog = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog);

    let mut out = Vec::new();
    doc.save_to(&mut out).expect("in-memory pdf");
    out
}
