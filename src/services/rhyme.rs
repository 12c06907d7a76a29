//! End-rhyme matching for the manuscript validator.
//!
//! [`SuffixRhyme`] reduces a word to its final vowel cluster plus trailing
//! consonants and folds a few common spellings of the same sound together.
//! No pronunciation dictionary is involved.

pub trait RhymeMatcher: Send + Sync {
    /// Canonical terminal sound of `word`, or `None` if it has no letters.
    fn rhyme_key(&self, word: &str) -> Option<String>;

    fn rhymes(&self, a: &str, b: &str) -> bool {
        match (self.rhyme_key(a), self.rhyme_key(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }
}

/// Spellings that share a sound at the end of a word.
const CANONICAL_ENDINGS: &[(&str, &str)] = &[
    ("igh", "y"),
    ("ie", "y"),
    ("ye", "y"),
    ("ight", "ite"),
    ("e", "ee"),
    ("ea", "ee"),
    ("eat", "eet"),
    ("eak", "eek"),
    ("eam", "eem"),
    ("ean", "een"),
    ("eal", "eel"),
    ("ue", "oo"),
    ("ew", "oo"),
    ("ou", "oo"),
    ("ain", "ane"),
    ("ait", "ate"),
    ("ail", "ale"),
    ("oat", "ote"),
    ("oad", "ode"),
    ("i", "y"),
    ("uy", "y"),
    ("oe", "o"),
    ("ow", "o"),
    ("oor", "ore"),
    ("our", "ore"),
    ("oar", "ore"),
    ("are", "air"),
    ("ere", "air"),
    ("eir", "air"),
    ("ear", "eer"),
];

/// Whole words whose spelling points at the wrong sound. Their keys are
/// used as is.
const EXCEPTIONS: &[(&str, &str)] = &[
    ("are", "ar"),
    ("bear", "air"),
    ("pear", "air"),
    ("wear", "air"),
    ("swear", "air"),
    ("here", "eer"),
    ("were", "er"),
    ("done", "un"),
    ("one", "un"),
    ("none", "un"),
    ("someone", "un"),
    ("won", "un"),
    ("son", "un"),
    ("said", "ed"),
    ("eye", "y"),
    ("two", "oo"),
    ("do", "oo"),
    ("to", "oo"),
    ("who", "oo"),
    ("shoe", "oo"),
    ("through", "oo"),
    ("cow", "ow"),
    ("how", "ow"),
    ("now", "ow"),
    ("wow", "ow"),
    ("our", "ower"),
    ("hour", "ower"),
    ("flower", "ower"),
    ("tower", "ower"),
    ("power", "ower"),
    ("shower", "ower"),
];

#[derive(Debug, Default, Clone, Copy)]
pub struct SuffixRhyme;

impl SuffixRhyme {
    pub fn new() -> Self {
        Self
    }
}

fn is_vowel(chars: &[char], i: usize) -> bool {
    match chars[i] {
        'a' | 'e' | 'i' | 'o' | 'u' => true,
        'y' => i > 0,
        _ => false,
    }
}

impl RhymeMatcher for SuffixRhyme {
    fn rhyme_key(&self, word: &str) -> Option<String> {
        let chars: Vec<char> = word
            .chars()
            .filter(|c| c.is_alphabetic())
            .flat_map(char::to_lowercase)
            .collect();
        if chars.is_empty() {
            return None;
        }
        let whole: String = chars.iter().collect();
        if let Some((_, key)) = EXCEPTIONS.iter().find(|(w, _)| *w == whole) {
            return Some(key.to_string());
        }

        let n = chars.len();
        // Silent e: "cake" keys as "ake", not "e".
        let magic_e = n >= 3
            && chars[n - 1] == 'e'
            && !is_vowel(&chars, n - 2)
            && (0..n - 2).any(|i| is_vowel(&chars, i));
        let core = if magic_e { &chars[..n - 1] } else { &chars[..] };

        let mut vowel_end = core.len();
        while vowel_end > 0 && !is_vowel(core, vowel_end - 1) {
            vowel_end -= 1;
        }
        if vowel_end == 0 {
            return Some(whole);
        }
        let mut start = vowel_end;
        while start > 0 && is_vowel(core, start - 1) {
            start -= 1;
        }

        let mut key: String = core[start..].iter().collect();
        if magic_e {
            key.push('e');
        }

        let key = CANONICAL_ENDINGS
            .iter()
            .find(|(from, _)| *from == key)
            .map(|(_, to)| to.to_string())
            .unwrap_or(key);
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(word: &str) -> String {
        SuffixRhyme::new().rhyme_key(word).unwrap()
    }

    #[test]
    fn test_basic_keys() {
        assert_eq!(key("sun"), "un");
        assert_eq!(key("Ball!"), "all");
        assert_eq!(key("cake"), "ake");
        assert_eq!(key("tree"), "ee");
        assert_eq!(key("play"), "ay");
        assert_eq!(key("hmm"), "hmm");
    }

    #[test]
    fn test_spelling_variants_rhyme() {
        let m = SuffixRhyme::new();
        assert!(m.rhymes("high", "sky"));
        assert!(m.rhymes("pie", "fly"));
        assert!(m.rhymes("night", "kite"));
        assert!(m.rhymes("me", "tree"));
        assert!(m.rhymes("sea", "bee"));
        assert!(m.rhymes("blue", "zoo"));
        assert!(m.rhymes("rain", "lane"));
        assert!(m.rhymes("house", "mouse"));
        assert!(m.rhymes("go", "slow"));
        assert!(m.rhymes("snow", "toe"));
        assert!(m.rhymes("two", "blue"));
        assert!(m.rhymes("more", "floor"));
        assert!(m.rhymes("door", "four"));
        assert!(m.rhymes("bear", "chair"));
        assert!(m.rhymes("care", "there"));
        assert!(m.rhymes("fun", "done"));
        assert!(m.rhymes("eye", "sky"));
        assert!(m.rhymes("hi", "my"));
        assert!(m.rhymes("said", "red"));
        assert!(m.rhymes("near", "here"));
        assert!(m.rhymes("now", "cow"));
    }

    #[test]
    fn test_mismatched_endings_do_not_rhyme() {
        let m = SuffixRhyme::new();
        assert!(!m.rhymes("cat", "dog"));
        assert!(!m.rhymes("sun", "sky"));
        assert!(!m.rhymes("ball", "bell"));
        assert!(!m.rhymes("cow", "go"));
        assert!(!m.rhymes("bear", "near"));
        assert!(!m.rhymes("are", "care"));
        assert!(!m.rhymes("two", "go"));
        assert!(!m.rhymes("gone", "done"));
        assert!(!m.rhymes("", "cat"));
    }
}
