#![allow(dead_code)]

use std::path::Path;

/// Single-page PDF showing `text` in Helvetica. Body first, then an xref
/// table with correct byte offsets so pdf-extract can parse it.
pub fn pdf_with_text(text: &str) -> Vec<u8> {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)");
    let content = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", escaped);

    let mut out = Vec::new();
    let mut offsets = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    offsets.push(out.len());
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", offsets.len() + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            offsets.len() + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}

pub const SERVICES_TEXT: &str =
    "Ecosystem services include pollination of crops and purification of water by wetlands.";
pub const INTRO_TEXT: &str =
    "This report introduces the history of the valley and the villages built along the river.";

/// `services.pdf` and `intro.pdf` in `dir`.
pub fn write_corpus(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("services.pdf"), pdf_with_text(SERVICES_TEXT)).unwrap();
    std::fs::write(dir.join("intro.pdf"), pdf_with_text(INTRO_TEXT)).unwrap();
}

/// A `.pdf` file whose body is not a parseable PDF.
pub fn write_corrupt_pdf(path: &Path) {
    std::fs::write(path, b"%PDF-1.4\nthis is not really a pdf\n%%EOF\n").unwrap();
}
