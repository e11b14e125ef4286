//! Heuristic topic outline for uploaded curriculum documents.
//!
//! No model call: numbered lines, short fully-capitalized lines and short
//! heading-like lines containing curriculum keywords are collected as the
//! document's outline.

use std::sync::OnceLock;

use regex::Regex;

const HEADING_MAX_CHARS: usize = 80;

const HEADING_KEYWORDS: [&str; 13] = [
    "kompetenz",
    "lernbereich",
    "lernfeld",
    "lehrplan",
    "unit",
    "modul",
    "ziel",
    "thema",
    "inhalt",
    "competency",
    "goal",
    "standard",
    "curriculum",
];

fn numbered_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\d+[.)]\s+\S").unwrap())
}

/// Collect up to `max_entries` outline lines from the extracted text.
pub fn derive_outline(text: &str, max_entries: usize) -> Vec<String> {
    let mut outline = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if is_outline_line(trimmed) {
            outline.push(trimmed.to_string());
            if outline.len() >= max_entries {
                break;
            }
        }
    }

    outline
}

fn is_outline_line(line: &str) -> bool {
    if numbered_line_re().is_match(line) {
        return true;
    }

    let char_count = line.chars().count();
    if char_count > HEADING_MAX_CHARS {
        return false;
    }

    let alphabetic: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    if alphabetic.len() >= 3 && alphabetic.iter().all(|c| c.is_uppercase()) {
        return true;
    }

    let lowered = line.to_lowercase();
    HEADING_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_numbered_caps_and_keyword_lines() {
        let text = "Lehrplan Mathematik\n\
                    1. Zahlen und Operationen\n\
                    Die Schülerinnen und Schüler vertiefen in diesem ausführlichen Abschnitt ihr Verständnis für das Rechnen mit natürlichen Zahlen und Brüchen im Alltag.\n\
                    GEOMETRIE\n\
                    2) Größen und Messen\n\
                    Kompetenzbereich: Argumentieren\n";
        let outline = derive_outline(text, 30);
        assert_eq!(
            outline,
            vec![
                "Lehrplan Mathematik",
                "1. Zahlen und Operationen",
                "GEOMETRIE",
                "2) Größen und Messen",
                "Kompetenzbereich: Argumentieren",
            ]
        );
    }

    #[test]
    fn test_long_prose_is_ignored() {
        let text = "In dieser langen Passage geht es ausschließlich um erzählenden Fließtext ohne jede Gliederung, der deutlich über achtzig Zeichen hinausreicht und daher nicht aufgenommen wird.\n";
        assert!(derive_outline(text, 30).is_empty());
    }

    #[test]
    fn test_cap_is_enforced() {
        let text = (0..50)
            .map(|i| format!("{i}. Eintrag"))
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(derive_outline(&text, 30).len(), 30);
    }
}
