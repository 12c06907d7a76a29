//! The Level A (pre-reader) word list and the inflection rules used to
//! accept "jumps", "hopping" or "happily" when only the base word is listed.

use lazy_static::lazy_static;
use std::collections::HashSet;

const FUNCTION_WORDS: &[&str] = &[
    "a", "about", "after", "again", "all", "am", "an", "and", "any", "are", "around", "as", "at",
    "away", "back", "be", "because", "before", "behind", "below", "beside", "but", "by", "can",
    "could", "did", "do", "does", "down", "each", "every", "for", "from", "get", "got", "had",
    "has", "have", "he", "her", "here", "him", "his", "how", "i", "if", "in", "into", "is", "it",
    "its", "just", "last", "let", "like", "may", "me", "more", "much", "must", "my", "near", "new",
    "next", "no", "not", "now", "of", "off", "oh", "on", "once", "one", "only", "or", "our", "out",
    "over", "please", "said", "say", "see", "she", "so", "some", "soon", "such", "than", "that",
    "the", "their", "them", "then", "there", "these", "they", "this", "those", "through", "to",
    "too", "under", "until", "up", "upon", "us", "very", "was", "we", "were", "what", "when",
    "where", "which", "who", "why", "will", "with", "would", "yes", "yet", "you", "your",
];

const VERBS: &[&str] = &[
    "ask", "bake", "bark", "blow", "bounce", "bring", "build", "call", "came", "carry", "catch",
    "chase", "climb", "come", "cry", "cuddle", "dance", "dig", "dream", "drink", "drive", "drop",
    "eat", "fall", "feed", "feel", "find", "fix", "float", "fly", "found", "gave", "give", "go",
    "goes", "going", "gone", "grow", "help", "hide", "hold", "hop", "hug", "hum", "hurry", "jump",
    "keep", "kick", "kiss", "knock", "know", "laugh", "lay", "leap", "learn", "lift", "listen",
    "live", "look", "love", "made", "make", "meet", "miss", "move", "nap", "need", "open", "paint",
    "pat", "pick", "plant", "play", "pull", "push", "put", "ran", "reach", "read", "rest", "ride",
    "ring", "roll", "rub", "run", "sail", "sang", "sat", "saw", "sing", "sit", "skip", "sleep",
    "slide", "smell", "smile", "snuggle", "spin", "stand", "start", "stay", "step",
    "stop", "swim", "swing", "take", "talk", "tell", "thank", "think", "throw", "tickle", "took",
    "toss", "try", "tuck", "turn", "wait", "wake", "walk", "want", "wash", "watch", "wave", "went",
    "wiggle", "wish", "work", "write", "yawn",
];

/// Animals a pre-reader knows. Also used to spot a second animal in an
/// illustration prompt.
pub const ANIMALS: &[&str] = &[
    "ant", "badger", "bat", "bear", "bee", "bird", "bug", "bunny", "cat", "chick", "cow", "dino",
    "dinosaur", "dog", "duck", "fish", "fox", "frog", "goat", "hen", "horse", "kitten", "lamb",
    "lion", "monkey", "mouse", "owl", "pig", "puppy", "rabbit", "sheep", "snail", "snake", "tiger",
    "turtle", "worm",
];

const LEVEL_A_WORDS: &[&str] = &[
    // contractions
    "can't", "don't", "won't", "isn't", "it's", "i'm", "i'll", "let's", "that's", "he's", "she's",
    "we're", "you're", "they're", "what's",
    // numbers
    "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten", "first",
    // greetings and sounds
    "hi", "hello", "bye", "goodbye", "wow", "yay", "boo", "shh", "hooray", "uh", "oops", "peek",
    "boom", "splash", "zoom", "pop", "buzz", "moo", "quack", "woof", "meow", "roar", "stomp",
    "giggle", "clap",
    // describing words
    "big", "black", "blue", "bold", "brave", "bright", "brown", "bumpy", "busy", "clean", "cold",
    "cozy", "dark", "deep", "dry", "early", "fast", "fat", "fine", "fluffy", "full", "funny",
    "fuzzy", "glad", "gold", "good", "gray", "great", "green", "happy", "hard", "high", "hot",
    "kind", "late", "little", "long", "loud", "low", "mad", "many", "nice", "old", "orange",
    "pink", "pretty", "purple", "quick", "quiet", "red", "round", "sad", "safe", "shiny", "short",
    "silly", "slow", "small", "snug", "soft", "sweet", "tall", "tight", "tiny", "tired", "warm",
    "wet", "white", "wide", "wild", "yellow", "young",
    // people
    "baby", "boy", "dad", "friend", "girl", "kid", "mama", "mom", "papa",
    // things and places
    "apple", "bag", "ball", "bath", "bed", "bell", "blanket", "block", "boat", "book", "bowl",
    "box", "bread", "bus", "cake", "car", "cave", "chair", "cloud", "coat", "cookie", "cup", "day",
    "door", "egg", "eye", "face", "farm", "flower", "food", "game", "garden", "grass", "hand",
    "hat", "head", "hill", "home", "house", "jungle", "kite", "leaf", "light", "milk", "moon",
    "morning", "mud", "nest", "night", "nose", "park", "pond", "rain", "rock", "room", "sand",
    "school", "sea", "shoe", "shorts", "sky", "snow", "sock", "song", "star", "stick", "sun",
    "table", "time", "toy", "train", "tree", "truck", "vest", "wall", "water", "way", "wind",
    "window", "world", "fun", "bedtime", "today", "tonight", "outside", "inside",
];

lazy_static! {
    static ref LEVEL_A: HashSet<&'static str> = [FUNCTION_WORDS, VERBS, ANIMALS, LEVEL_A_WORDS]
        .into_iter()
        .flatten()
        .copied()
        .collect();
}

/// Base forms `word` could have been inflected from, most specific first.
/// The word itself is always the first candidate.
pub fn base_forms(word: &str) -> Vec<String> {
    let mut forms = vec![word.to_string()];

    if let Some(stem) = word.strip_suffix("'s") {
        forms.extend(base_forms(stem));
        return forms;
    }

    for (suffix, replacement) in [("ies", "y"), ("ied", "y"), ("ier", "y"), ("iest", "y"), ("ily", "y")] {
        if let Some(stem) = word.strip_suffix(suffix) {
            if !stem.is_empty() {
                forms.push(format!("{}{}", stem, replacement));
            }
        }
    }

    for suffix in ["es", "s"] {
        if let Some(stem) = word.strip_suffix(suffix) {
            if stem.len() >= 2 {
                forms.push(stem.to_string());
            }
        }
    }

    for suffix in ["ing", "ed", "er", "est", "ly"] {
        let Some(stem) = word.strip_suffix(suffix) else {
            continue;
        };
        if stem.len() < 2 {
            continue;
        }
        forms.push(stem.to_string());
        forms.push(format!("{}e", stem));

        // hopping -> hop
        let bytes = stem.as_bytes();
        let n = bytes.len();
        if n >= 3 && stem.is_ascii() && bytes[n - 1] == bytes[n - 2] {
            forms.push(stem[..n - 1].to_string());
        }
    }

    forms
}

/// Whether `word` (already lowercased) belongs to Level A, directly or by
/// inflection, counting `extra` words as listed too.
pub fn is_level_a(word: &str, extra: &HashSet<String>) -> bool {
    base_forms(word)
        .iter()
        .any(|form| LEVEL_A.contains(form.as_str()) || extra.contains(form))
}

fn lists(list: &[&str], word: &str) -> bool {
    base_forms(word).iter().any(|form| list.contains(&form.as_str()))
}

/// Whether `word` (lowercased) is a listed verb in any inflection, or a
/// function word such as "in" or "the".
pub fn is_verb_or_function_word(word: &str) -> bool {
    FUNCTION_WORDS.contains(&word) || lists(VERBS, word)
}
