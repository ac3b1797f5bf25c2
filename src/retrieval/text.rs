use std::collections::BTreeSet;

pub fn normalize_space(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

pub fn tokenize(input: &str) -> Vec<String> {
    input
        .split(|character: char| !character.is_ascii_alphanumeric())
        .filter(|token| token.len() >= 2)
        .map(|token| token.to_ascii_lowercase())
        .collect::<Vec<String>>()
}

pub fn token_set(input: &str) -> BTreeSet<String> {
    tokenize(input).into_iter().collect()
}

pub fn truncate_chars(input: &str, max_chars: usize) -> &str {
    match input.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &input[..byte_index],
        None => input,
    }
}

pub fn char_len(input: &str) -> usize {
    input.chars().count()
}
