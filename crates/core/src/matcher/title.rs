/// Canonical form of a show title: separators ('.', '_', whitespace) become a
/// single space and every word is title-cased.
///
/// Idempotent, and applied identically when shows are stored and looked up.
pub fn canonicalize_title(raw: &str) -> String {
    raw.split(|c: char| c == '.' || c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(title_case_word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
