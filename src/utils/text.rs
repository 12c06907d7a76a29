use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref SPACE_BEFORE_MARK: Regex = Regex::new(r"\s+([,.])").unwrap();
    static ref COMMA_RUN: Regex = Regex::new(r",(?:\s*,)+").unwrap();
    static ref COMMA_BEFORE_PERIOD: Regex = Regex::new(r",\s*\.").unwrap();
}

/// Splits text into lowercase words. Digits and punctuation separate words;
/// apostrophes inside a word are kept so "don't" stays one token.
pub fn words(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        if c.is_alphabetic() {
            current.extend(c.to_lowercase());
        } else if (c == '\'' || c == '\u{2019}') && !current.is_empty() {
            current.push('\'');
        } else if !current.is_empty() {
            push_word(&mut out, &mut current);
        }
    }
    if !current.is_empty() {
        push_word(&mut out, &mut current);
    }
    out
}

fn push_word(out: &mut Vec<String>, current: &mut String) {
    let word = current.trim_end_matches('\'');
    if !word.is_empty() {
        out.push(word.to_string());
    }
    current.clear();
}

/// Collapses runs of whitespace, removes spaces before punctuation and
/// doubled commas, and trims dangling separators at both ends.
pub fn tidy(text: &str) -> String {
    let text = WHITESPACE.replace_all(text, " ");
    let text = SPACE_BEFORE_MARK.replace_all(&text, "$1");
    let text = COMMA_RUN.replace_all(&text, ",");
    let text = COMMA_BEFORE_PERIOD.replace_all(&text, ".");
    text.trim_matches(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .to_string()
}

/// Appends a clause with a comma separator, dropping trailing sentence
/// punctuation from the existing text first.
pub fn append_clause(text: &str, clause: &str) -> String {
    let base = text.trim_end_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | ';' | '!'));
    if base.is_empty() {
        clause.to_string()
    } else {
        format!("{}, {}", base, clause)
    }
}

pub fn indefinite_article(word: &str) -> &'static str {
    match word.chars().next().map(|c| c.to_ascii_lowercase()) {
        Some('a' | 'e' | 'i' | 'o' | 'u') => "an",
        _ => "a",
    }
}

/// File-system friendly name for a book title.
pub fn slugify(title: &str) -> String {
    let slug = words(title)
        .into_iter()
        .map(|w| w.replace('\'', ""))
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_handles_contractions_and_punctuation() {
        assert_eq!(
            words("Don't stop, Marcel's hat -- 16 hops!"),
            vec!["don't", "stop", "marcel's", "hat", "hops"]
        );
        assert_eq!(words("'quoted'"), vec!["quoted"]);
        assert!(words("123 ... !!").is_empty());
    }

    #[test]
    fn test_tidy_cleans_separators() {
        assert_eq!(tidy("  Marcel  ,  exploring a cave ,, "), "Marcel, exploring a cave");
        assert_eq!(tidy(", a badger ."), "a badger.");
        assert_eq!(tidy("Marcel ,, ,\twatching ,."), "Marcel, watching.");
        assert_eq!(tidy("a hat,\n, a vest"), "a hat, a vest");
    }

    #[test]
    fn test_append_clause() {
        assert_eq!(append_clause("", "a badger"), "a badger");
        assert_eq!(append_clause("In a jungle.", "a badger"), "In a jungle, a badger");
    }

    #[test]
    fn test_indefinite_article() {
        assert_eq!(indefinite_article("owl"), "an");
        assert_eq!(indefinite_article("Badger"), "a");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Marcel's Big Day!"), "marcels_big_day");
        assert_eq!(slugify("???"), "untitled");
    }
}
