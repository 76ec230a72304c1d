//! Arabic-aware text utilities shared by the evaluator and the adapters.

use std::sync::LazyLock;

use regex::Regex;

/// Characters in the Arabic Unicode blocks (base, supplement, extended,
/// and the presentation forms).
static ARABIC_CHAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\u{0600}-\u{06FF}\u{0750}-\u{077F}\u{08A0}-\u{08FF}\u{FB50}-\u{FDFF}\u{FE70}-\u{FEFF}]")
        .expect("static regex")
});

/// Tashkeel (diacritical marks) to strip during normalization.
static TASHKEEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\u{0617}-\u{061A}\u{064B}-\u{0652}\u{0670}]").expect("static regex"));

/// Alef variants collapsed to the plain alef during normalization.
static ALEF_VARIANTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\u{0622}\u{0623}\u{0625}\u{0671}]").expect("static regex"));

/// Fraction of characters that belong to the Arabic script.
///
/// Counted over all characters (including whitespace and punctuation),
/// which is what makes leftover source script in a translation stand out
/// so sharply.
pub fn arabic_char_ratio(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let arabic = ARABIC_CHAR.find_iter(text).count();
    arabic as f64 / text.chars().count() as f64
}

/// Whether the text reads as Arabic (> 30% of alphabetic chars are in the
/// Arabic blocks).
pub fn is_arabic(text: &str) -> bool {
    let total_alpha = text.chars().filter(|c| c.is_alphabetic()).count();
    if total_alpha == 0 {
        return false;
    }
    let arabic = ARABIC_CHAR.find_iter(text).count();
    arabic as f64 / total_alpha as f64 > 0.3
}

/// Normalize Arabic text for comparison purposes: strip tashkeel and
/// collapse alef / taa-marbuta / alef-maqsura variants.
pub fn normalize_arabic(text: &str) -> String {
    let text = TASHKEEL.replace_all(text, "");
    let text = ALEF_VARIANTS.replace_all(&text, "\u{0627}");
    text.replace('\u{0629}', "\u{0647}").replace('\u{0649}', "\u{064A}")
}

/// Word-level Jaccard similarity over lowercased whitespace tokens.
pub fn word_jaccard(a: &str, b: &str) -> f64 {
    let words_a: std::collections::HashSet<String> =
        a.split_whitespace().map(|w| w.to_lowercase()).collect();
    let words_b: std::collections::HashSet<String> =
        b.split_whitespace().map(|w| w.to_lowercase()).collect();

    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}
