//! # Filename Sanitizer
//!
//! Normalizza i nomi file forniti dall'utente in una forma sicura per le object key:
//! ASCII minuscolo, trattini al posto degli spazi, estensione originale preservata.
//!
//! ```text
//! "Çok Güzel Fotoğraf.JPG" -> "cok-guzel-fotograf.JPG"
//! "   .png"                -> "file-1700000000000.png"
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

/// Sanitize a filename using the current time for the empty-name fallback.
pub fn sanitize_filename(name: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    sanitize_filename_at(name, now)
}

/// Sanitize a filename with an explicit fallback timestamp.
pub fn sanitize_filename_at(name: &str, timestamp_millis: u128) -> String {
    let (base, extension) = split_extension(name);

    let mut cleaned = sanitize_base(base);
    if cleaned.is_empty() {
        cleaned = format!("file-{}", timestamp_millis);
    }

    match extension {
        Some(ext) => format!("{}.{}", cleaned, ext),
        None => cleaned,
    }
}

/// Splits at the last dot. Dotfiles such as `.png` keep their extension with an empty base.
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx + 1 < name.len() => (&name[..idx], Some(&name[idx + 1..])),
        Some(idx) => (&name[..idx], None),
        None => (name, None),
    }
}

fn sanitize_base(base: &str) -> String {
    let ascii = deunicode::deunicode(base).to_lowercase();

    let mut out = String::with_capacity(ascii.len());
    let mut pending_hyphen = false;
    for c in ascii.chars() {
        if c.is_whitespace() || c == '-' {
            pending_hyphen = true;
        } else if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c);
        }
    }
    out
}
