//! Text normalization
//!
//! Spreadsheet headers and catalog names arrive with inconsistent casing,
//! accents and punctuation. Both are folded to the same shape before
//! comparison: uppercase ASCII letters, digits and single spaces.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Uppercase and strip combining marks (`Año` -> `ANO`, `niño` -> `NINO`).
pub fn fold_diacritics(input: &str) -> String {
    input
        .to_uppercase()
        .nfkd()
        .filter(|ch| !is_combining_mark(*ch))
        .collect()
}

/// Normalize a header cell for matching.
///
/// Trims, uppercases, folds diacritics, turns every character that is not
/// an ASCII letter, digit or whitespace into a space, then collapses runs of
/// whitespace.
pub fn normalize_header(input: &str) -> String {
    let folded = fold_diacritics(input.trim());
    let replaced: String = folded
        .chars()
        .map(|ch| {
            if ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch.is_whitespace() {
                ch
            } else {
                ' '
            }
        })
        .collect();
    collapse_whitespace(&replaced)
}

/// Normalize a catalog name for lookup: fold diacritics and collapse spaces,
/// keeping punctuation.
pub fn normalize_lookup(input: &str) -> String {
    collapse_whitespace(&fold_diacritics(input.trim()))
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_spanish_accents() {
        assert_eq!(fold_diacritics("Año"), "ANO");
        assert_eq!(fold_diacritics("Niño"), "NINO");
        assert_eq!(fold_diacritics("Diagnóstico"), "DIAGNOSTICO");
    }

    #[test]
    fn header_punctuation_becomes_space() {
        assert_eq!(normalize_header("  CIE-10 "), "CIE 10");
        assert_eq!(normalize_header("cui  del   niño"), "CUI DEL NINO");
        assert_eq!(normalize_header("Teléfonos (del) encargado"), "TELEFONOS DEL ENCARGADO");
    }

    #[test]
    fn header_of_only_symbols_is_empty() {
        assert_eq!(normalize_header("#"), "");
        assert_eq!(normalize_header("   "), "");
    }

    #[test]
    fn lookup_keeps_punctuation() {
        assert_eq!(normalize_lookup("  San  José Pinula. "), "SAN JOSE PINULA.");
    }
}
