//! Naming-convention variants of a key, so `questionText` also finds
//! `question_text`, `QuestionText`, `question-text` and friends.

/// Splits an identifier into lowercase words at `_`, `-`, spaces and case boundaries.
///
/// `HTTPServerName` → `["http", "server", "name"]`
pub fn split_words(name: &str) -> Vec<String> {
    let chars: Vec<char> = name.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &ch) in chars.iter().enumerate() {
        if ch == '_' || ch == '-' || ch.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }

        if ch.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|c| c.is_lowercase());
            // fooBar | HTTPServer
            if prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower)
            {
                words.push(std::mem::take(&mut current));
            }
        }
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Returns `name` followed by its camelCase, snake_case, PascalCase, kebab-case,
/// SCREAMING_SNAKE_CASE and flat lowercase spellings, without duplicates.
pub fn variants(name: &str) -> Vec<String> {
    let words = split_words(name);
    let mut out = vec![name.to_string()];
    if words.is_empty() {
        return out;
    }

    let camel: String = words
        .iter()
        .enumerate()
        .map(|(i, w)| if i == 0 { w.clone() } else { capitalize(w) })
        .collect();
    let pascal: String = words.iter().map(|w| capitalize(w)).collect();
    let snake = words.join("_");
    let kebab = words.join("-");
    let screaming = snake.to_uppercase();
    let flat = words.concat();

    for candidate in [camel, snake, pascal, kebab, screaming, flat] {
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}
