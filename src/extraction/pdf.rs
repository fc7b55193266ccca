use std::collections::BTreeMap;

use lopdf::content::Content;
use lopdf::{Document, Encoding, Object, ObjectId};

use super::ExtractionError;

const MALFORMED: &str =
    "Failed to extract text from PDF. The file might be corrupted or password-protected.";

/// Extract text page by page.
///
/// Every string shown by `Tj`, `TJ`, `'` or `"` is one run. A page's runs are
/// joined with a single space, pages are joined with a newline and the result
/// is trimmed.
pub(super) fn extract_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    let document = Document::load_mem(bytes).map_err(|e| ExtractionError::Malformed {
        message: MALFORMED,
        reason: e.to_string(),
    })?;

    if document.is_encrypted() {
        return Err(ExtractionError::Malformed {
            message: MALFORMED,
            reason: "document is encrypted".to_string(),
        });
    }

    let mut pages = Vec::new();
    // get_pages is keyed by 1-based page number, in order.
    for (page_number, page_id) in document.get_pages() {
        let runs = page_runs(&document, page_id).map_err(|e| ExtractionError::Malformed {
            message: MALFORMED,
            reason: format!("page {page_number}: {e}"),
        })?;
        pages.push(runs.join(" "));
    }

    let text = pages.join("\n").trim().to_string();
    if text.is_empty() {
        return Err(ExtractionError::NoText("PDF"));
    }

    tracing::debug!(pages = pages.len(), chars = text.len(), "PDF text extracted");
    Ok(text)
}

/// Collect the non-blank text runs of one page in content order.
fn page_runs(document: &Document, page_id: ObjectId) -> Result<Vec<String>, lopdf::Error> {
    let encodings = document
        .get_page_fonts(page_id)?
        .into_iter()
        .filter_map(|(name, font)| match font.get_font_encoding(document) {
            Ok(encoding) => Some((name, encoding)),
            Err(e) => {
                tracing::debug!(error = %e, "Unsupported font encoding");
                None
            }
        })
        .collect::<BTreeMap<_, _>>();
    let content = Content::decode(&document.get_page_content(page_id)?)?;

    let mut runs = Vec::new();
    let mut encoding = None;
    for operation in &content.operations {
        let shown = match operation.operator.as_str() {
            "Tf" => {
                encoding = operation
                    .operands
                    .first()
                    .and_then(|name| name.as_name().ok())
                    .and_then(|name| encodings.get(name));
                continue;
            }
            "Tj" | "TJ" => operation.operands.as_slice(),
            // `"` carries word and character spacing before the string.
            "'" | "\"" => operation
                .operands
                .last()
                .map(std::slice::from_ref)
                .unwrap_or_default(),
            _ => continue,
        };

        let mut run = String::new();
        push_shown(&mut run, encoding, shown);
        let run = run.trim();
        if !run.is_empty() {
            runs.push(run.to_string());
        }
    }
    Ok(runs)
}

/// Decode the strings of a show operator into `run`.
///
/// A `TJ` adjustment wider than a tenth of an em reads as a word gap.
fn push_shown(run: &mut String, encoding: Option<&Encoding<'_>>, operands: &[Object]) {
    for operand in operands {
        match operand {
            Object::String(bytes, _) => run.push_str(&decode(encoding, bytes)),
            Object::Array(items) => push_shown(run, encoding, items),
            Object::Integer(gap) if *gap < -100 => run.push(' '),
            Object::Real(gap) if *gap < -100.0 => run.push(' '),
            _ => {}
        }
    }
}

fn decode(encoding: Option<&Encoding<'_>>, bytes: &[u8]) -> String {
    encoding
        .and_then(|encoding| Document::decode_text(encoding, bytes).ok())
        .unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{Object, Stream, dictionary};

    /// One `BT`..`ET` per page with a `Td` + `Tj` per run.
    fn build_pdf(pages: &[&[&str]]) -> Vec<u8> {
        let pages = pages
            .iter()
            .map(|runs| {
                let mut operations = Vec::new();
                for (i, run) in runs.iter().enumerate() {
                    let y = 700 - 20 * i64::try_from(i).unwrap();
                    operations.push(Operation::new("Td", vec![72.into(), y.into()]));
                    operations.push(Operation::new("Tj", vec![Object::string_literal(*run)]));
                }
                operations
            })
            .collect();
        build_pdf_with(pages)
    }

    fn build_pdf_with(pages: Vec<Vec<Operation>>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for body in pages {
            let mut operations = vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
            ];
            operations.extend(body);
            operations.push(Operation::new("ET", vec![]));

            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = i64::try_from(kids.len()).unwrap();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn test_runs_in_one_text_object_are_spaced() {
        let bytes = build_pdf(&[&["RENT", "DUE"]]);
        assert_eq!(extract_text(&bytes).unwrap(), "RENT DUE");

        let bytes = build_pdf(&[&["  RENT:", " ", "$900 monthly  "]]);
        assert_eq!(extract_text(&bytes).unwrap(), "RENT: $900 monthly");
    }

    #[test]
    fn test_kerned_arrays_and_quote_operators() {
        let bytes = build_pdf_with(vec![vec![
            Operation::new(
                "TJ",
                vec![Object::Array(vec![
                    Object::string_literal("LATE"),
                    Object::Integer(-250),
                    Object::string_literal("F"),
                    Object::Integer(-20),
                    Object::string_literal("EE"),
                ])],
            ),
            Operation::new("'", vec![Object::string_literal("applies")]),
            Operation::new(
                "\"",
                vec![0.into(), 0.into(), Object::string_literal("monthly")],
            ),
        ]]);
        assert_eq!(extract_text(&bytes).unwrap(), "LATE FEE applies monthly");
    }

    #[test]
    fn test_extracts_pages_in_order() {
        let bytes = build_pdf(&[&["RENTAL AGREEMENT"], &["TERMINATION"]]);
        let text = extract_text(&bytes).unwrap();
        let first = text.find("RENTAL AGREEMENT").unwrap();
        let second = text.find("TERMINATION").unwrap();
        assert!(first < second);
        assert_eq!(text, text.trim());
    }

    #[test]
    fn test_pdf_without_text_fails() {
        let bytes = build_pdf(&[&[]]);
        assert!(matches!(
            extract_text(&bytes),
            Err(ExtractionError::NoText("PDF"))
        ));
    }

    #[test]
    fn test_garbage_fails() {
        assert!(extract_text(b"%PDF-1.4 not really").is_err());

        let err = extract_text(b"").unwrap_err();
        assert!(err.to_string().contains("password-protected"));
    }
}
