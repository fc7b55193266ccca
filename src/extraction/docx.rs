use docx_rs::{
    DocumentChild, Paragraph, ParagraphChild, RunChild, TableCellContent, TableChild,
    TableRowChild,
};

use super::ExtractionError;

const MALFORMED: &str =
    "Failed to extract text from DOCX file. The file might be corrupted or in an unsupported format.";

/// Extract raw run text, one line per paragraph. Formatting is dropped.
pub(super) fn extract_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    let doc = docx_rs::read_docx(bytes).map_err(|e| ExtractionError::Malformed {
        message: MALFORMED,
        reason: e.to_string(),
    })?;

    let mut out = String::new();
    for child in &doc.document.children {
        push_block(child, &mut out);
    }

    if out.trim().is_empty() {
        return Err(ExtractionError::NoText("document"));
    }
    Ok(out.trim_end().to_string())
}

fn push_block(element: &DocumentChild, out: &mut String) {
    match element {
        DocumentChild::Paragraph(para) => {
            push_paragraph(para, out);
            out.push('\n');
        }
        DocumentChild::Table(table) => {
            for row in &table.rows {
                let TableChild::TableRow(tr) = row;
                let mut cells = Vec::new();
                for cell in &tr.cells {
                    let TableRowChild::TableCell(tc) = cell;
                    let mut text = String::new();
                    for content in &tc.children {
                        if let TableCellContent::Paragraph(para) = content {
                            push_paragraph(para, &mut text);
                        }
                    }
                    cells.push(text);
                }
                out.push_str(&cells.join("\t"));
                out.push('\n');
            }
        }
        _ => {}
    }
}

fn push_paragraph(para: &Paragraph, out: &mut String) {
    for child in &para.children {
        match child {
            ParagraphChild::Run(run) => push_run(&run.children, out),
            ParagraphChild::Hyperlink(link) => {
                for inner in &link.children {
                    if let ParagraphChild::Run(run) = inner {
                        push_run(&run.children, out);
                    }
                }
            }
            _ => {}
        }
    }
}

fn push_run(children: &[RunChild], out: &mut String) {
    for child in children {
        match child {
            RunChild::Text(text) => out.push_str(&text.text),
            RunChild::Tab(_) => out.push('\t'),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docx_rs::{Docx, Run};
    use std::io::Cursor;

    fn build_docx(paragraphs: &[&str]) -> Vec<u8> {
        let mut docx = Docx::new();
        for p in paragraphs {
            docx = docx.add_paragraph(Paragraph::new().add_run(Run::new().add_text(*p)));
        }
        let mut buf = Cursor::new(Vec::new());
        docx.build().pack(&mut buf).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_extracts_paragraphs() {
        let bytes = build_docx(&["EMPLOYMENT CONTRACT", "Notice period: 30 days."]);
        let text = extract_text(&bytes).unwrap();
        assert_eq!(text, "EMPLOYMENT CONTRACT\nNotice period: 30 days.");
    }

    #[test]
    fn test_empty_document_fails() {
        let bytes = build_docx(&[]);
        assert!(matches!(
            extract_text(&bytes),
            Err(ExtractionError::NoText(_))
        ));
    }

    #[test]
    fn test_not_a_zip_fails() {
        let err = extract_text(b"plain bytes").unwrap_err();
        assert!(matches!(err, ExtractionError::Malformed { .. }));
    }
}
