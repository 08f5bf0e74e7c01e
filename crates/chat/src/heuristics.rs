/// Pick capitalised words out of a response that may name a rule, spell,
/// race or class, as `"Possible: <word>"` entries in first-seen order.
///
/// A word qualifies when it is purely alphabetic, longer than two characters,
/// starts with an uppercase letter, and does not open a sentence (the
/// previous word does not end in `.`, `!` or `?`). The first word never
/// qualifies. This is cosmetic and will miss names followed by punctuation.
pub fn extract_possible_rules(response: &str) -> Vec<String> {
    let words: Vec<&str> = response.split_whitespace().collect();
    let mut found: Vec<String> = Vec::new();
    for (i, word) in words.iter().enumerate().skip(1) {
        let starts_sentence = words[i - 1].ends_with(['.', '!', '?']);
        let capitalised = word.chars().next().is_some_and(char::is_uppercase);
        if !starts_sentence
            && capitalised
            && word.chars().count() > 2
            && word.chars().all(char::is_alphabetic)
        {
            let entry = format!("Possible: {word}");
            if !found.contains(&entry) {
                found.push(entry);
            }
        }
    }
    found
}
