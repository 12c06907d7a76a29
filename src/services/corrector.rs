//! Rewrites illustration prompts before they reach the image model.
//!
//! A pass strips extra characters, turns bystander phrasing into the hero
//! standing in the scene, re-adds missing outfit pieces and appends the
//! fixed directives. Passes repeat until the prompt stops changing.

use crate::core::state::CharacterProfile;
use crate::services::vocabulary::{is_verb_or_function_word, ANIMALS};
use crate::utils::text::{append_clause, indefinite_article, tidy};
use lazy_static::lazy_static;
use log::debug;
use regex::{Captures, Regex};

/// Passes of the full pipeline before giving up on reaching a fixpoint.
const MAX_PASSES: usize = 4;

pub const DEFAULT_DIRECTIVES: &[&str] = &[
    "only one character in the scene",
    "no text or lettering in the image",
];

lazy_static! {
    // "and his friend Oliver", "with her best pals", "and his mom"
    static ref COMPANION: Regex = Regex::new(
        r"(?i),?\s*\b(?:and|with|alongside|plus)\s+(?:(?:his|her|their|a|an|the|some|two|three)\s+)?(?:(?:best|new|little|old|big|good|baby)\s+)?(?:friends?|pals?|buddy|buddies|brothers?|sisters?|siblings?|cousins?|companions?|mom|mommy|mama|mum|dad|daddy|papa|mother|father|parents|grandma|grandpa|granny|grandmother|grandfather|grandparents|aunt|uncle|family)\b(?:\s+(?-i:([A-Z][a-z]+))(?:\s+and\s+(?-i:([A-Z][a-z]+)))?)?"
    ).unwrap();

    // "surrounded by a crowd of kids", "a herd of cows"
    static ref GROUP: Regex = Regex::new(
        r"(?i),?\s*\b(?:(?:and|with|among|alongside|beside|near|next\s+to|surrounded\s+by)\s+)?(?:(?:a|an|the|some)\s+)?(?:(?:big|small|happy|little|large)\s+)?(?:group|crowd|team|gang|bunch|herd|pack|flock)\s+of\s+[a-z]+\b"
    ).unwrap();

    // "with other animals", "among two other kids"
    static ref PLURAL_CHARACTERS: Regex = Regex::new(
        r"(?i),?\s*\b(?:and|with|among|alongside|beside)\s+(?:(?:his|her|their|the|some|many|other|several|two|three|four|five)\s+)*(?:[a-z]+\s+)?(?:kids|children|animals|creatures|characters|people|classmates|others)\b"
    ).unwrap();

    // "and a fox", "with two little frogs"
    static ref ANIMAL: Regex = Regex::new(&format!(
        r"(?i),?\s*\b(?:and|with|alongside|plus|beside)\s+(?:(?:a|an|the|his|her|their|some|another|two|three)\s+)?(?:[a-z]+\s+)?(?:{})(?:s|es)?\b",
        ANIMALS.join("|")
    )).unwrap();

    // "and Oliver", "with Oliver the owl", "and Oliver's friends"
    static ref NAMED: Regex = Regex::new(
        r",?\s*\b(?i:and|with|alongside|plus)\s+([A-Z][a-z]+)((?:'|’)s\s+[a-z]+|\s+the\s+[a-z]+)?\b"
    ).unwrap();

    static ref LOOKING_ON: Regex = Regex::new(
        r"(?i)\b(?:is\s+|are\s+)?(?:looking|looks)\s+on\b"
    ).unwrap();

    static ref PASSIVE: Regex = Regex::new(
        r"(?i)\b(?:is\s+|are\s+|sits\s+|sitting\s+(?:and\s+)?)?(?:watching|watches|observing|observes|viewing|views|(?:looking|looks|staring|stares|gazing|gazes|peeking|peeks|peering|peers)\s+(?:out\s+)?at)\b"
    ).unwrap();

    static ref DISTANT: Regex = Regex::new(
        r"(?i),?\s*\bfrom\s+(?:afar|a\s+distance)\b"
    ).unwrap();

    // a rewrite left without an object, e.g. after stage 1 removed it
    static ref DANGLING: Regex = Regex::new(
        r"(?i)\bstanding in front of\s*([,.;!?]|$)"
    ).unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptIssue {
    ExtraCharacter(String),
    PassiveFraming(String),
    MissingAttribute(String),
    MissingDirective(String),
}

#[derive(Debug, Clone)]
pub struct PromptCorrector {
    directives: Vec<String>,
}

impl Default for PromptCorrector {
    fn default() -> Self {
        Self::new(DEFAULT_DIRECTIVES.iter().map(|d| d.to_string()))
    }
}

impl PromptCorrector {
    /// Directives are cleaned with the same rules as prompts so appending one
    /// can never trigger another rewrite.
    pub fn new<I>(directives: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut cleaned: Vec<String> = Vec::new();
        for directive in directives {
            let d = activate(&single_character(&directive, ""));
            let d = d.trim_end_matches(|c: char| matches!(c, '.' | '!' | ';')).to_string();
            if !d.is_empty() && !cleaned.contains(&d) {
                cleaned.push(d);
            }
        }
        Self { directives: cleaned }
    }

    pub fn directives(&self) -> &[String] {
        &self.directives
    }

    /// Returns a prompt that names only the protagonist, shows them taking
    /// part in the scene, mentions every profile attribute and ends with the
    /// configured directives. Never fails; correcting twice changes nothing.
    pub fn correct(&self, prompt: &str, profile: &CharacterProfile) -> String {
        let mut current = tidy(prompt);
        for _ in 0..MAX_PASSES {
            let next = self.pass(&current, profile);
            if next == current {
                return current;
            }
            current = next;
        }
        debug!("Prompt correction did not settle after {} passes", MAX_PASSES);
        current
    }

    fn pass(&self, prompt: &str, profile: &CharacterProfile) -> String {
        let text = single_character(prompt, &profile.name);
        let text = activate(&text);
        let text = reassert_profile(&text, profile);
        self.append_directives(&text)
    }

    fn append_directives(&self, prompt: &str) -> String {
        let mut out = prompt.to_string();
        for directive in &self.directives {
            if !out.contains(directive.as_str()) {
                out = append_clause(&out, directive);
            }
        }
        tidy(&out)
    }

    /// Lists what [`correct`](Self::correct) would fix, without rewriting.
    pub fn audit(&self, prompt: &str, profile: &CharacterProfile) -> Vec<PromptIssue> {
        let mut issues = Vec::new();

        for re in [&*COMPANION, &*GROUP, &*PLURAL_CHARACTERS] {
            for m in re.find_iter(prompt) {
                issues.push(PromptIssue::ExtraCharacter(m.as_str().trim_start_matches(',').trim().to_string()));
            }
        }
        for m in ANIMAL.find_iter(prompt) {
            if !modifies_next_word(&prompt[m.end()..]) {
                issues.push(PromptIssue::ExtraCharacter(m.as_str().trim_start_matches(',').trim().to_string()));
            }
        }
        for caps in NAMED.captures_iter(prompt) {
            if names_someone_else(&caps, prompt, &profile.name) {
                issues.push(PromptIssue::ExtraCharacter(caps[1].to_string()));
            }
        }

        for re in [&*LOOKING_ON, &*PASSIVE, &*DISTANT] {
            for m in re.find_iter(prompt) {
                issues.push(PromptIssue::PassiveFraming(m.as_str().trim_start_matches(',').trim().to_string()));
            }
        }

        let lower = prompt.to_lowercase();
        if !profile.species.is_empty() && !lower.contains(&profile.species.to_lowercase()) {
            issues.push(PromptIssue::MissingAttribute(profile.species.clone()));
        }
        for attribute in &profile.attributes {
            if !lower.contains(&attribute.phrase().to_lowercase()) {
                issues.push(PromptIssue::MissingAttribute(attribute.phrase()));
            }
        }

        for directive in &self.directives {
            if !prompt.contains(directive.as_str()) {
                issues.push(PromptIssue::MissingDirective(directive.clone()));
            }
        }

        issues
    }
}

fn is_protagonist(word: &str, name: &str) -> bool {
    name.split_whitespace().any(|part| part == word)
}

/// True when the matched word reads as an adjective for what follows it,
/// as in "a bee costume" or "Christmas lights".
fn modifies_next_word(rest: &str) -> bool {
    if rest.starts_with('-') {
        return true;
    }
    if !rest.starts_with(char::is_whitespace) {
        return false;
    }
    let next = rest
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches(|c: char| !c.is_alphabetic());
    !next.is_empty()
        && next.chars().all(|c| c.is_lowercase())
        && !next.ends_with("ing")
        && !is_verb_or_function_word(next)
}

fn names_someone_else(caps: &Captures, haystack: &str, name: &str) -> bool {
    if is_protagonist(&caps[1], name) {
        return false;
    }
    // "Oliver's friends" and "Oliver the owl" always name a character.
    if caps.get(2).is_some() {
        return true;
    }
    let end = caps.get(0).map_or(haystack.len(), |m| m.end());
    !modifies_next_word(&haystack[end..])
}

/// Removes companion clauses. When the companion is the protagonist, the
/// clause's leading subject goes instead and the protagonist takes its place.
fn strip_companions(prompt: &str, name: &str) -> String {
    let mut out = String::new();
    let mut last = 0;
    for caps in COMPANION.captures_iter(prompt) {
        let Some(m) = caps.get(0) else { continue };
        out.push_str(&prompt[last..m.start()]);
        let hero = [caps.get(1), caps.get(2)]
            .into_iter()
            .flatten()
            .find(|n| is_protagonist(n.as_str(), name));
        if let Some(hero) = hero {
            let clause_start = out
                .rfind(|c: char| matches!(c, ',' | '.' | ';'))
                .map_or(0, |i| i + 1);
            out.truncate(clause_start);
            out.push(' ');
            out.push_str(hero.as_str());
        }
        last = m.end();
    }
    out.push_str(&prompt[last..]);
    out
}

/// Stage 1: strip clauses that bring in anyone besides the protagonist.
fn single_character(prompt: &str, name: &str) -> String {
    let text = strip_companions(prompt, name);
    let text = GROUP.replace_all(&text, "");
    let text = PLURAL_CHARACTERS.replace_all(&text, "");
    let text = ANIMAL.replace_all(&text, |caps: &Captures| {
        let end = caps.get(0).map_or(text.len(), |m| m.end());
        if modifies_next_word(&text[end..]) {
            caps[0].to_string()
        } else {
            String::new()
        }
    });
    let text = NAMED.replace_all(&text, |caps: &Captures| {
        if names_someone_else(caps, &text, name) {
            String::new()
        } else {
            caps[0].to_string()
        }
    });
    tidy(&text)
}

/// Stage 2: turn observer phrasing into the hero being in the scene.
fn activate(prompt: &str) -> String {
    let text = LOOKING_ON.replace_all(prompt, "standing in the scene");
    let text = PASSIVE.replace_all(&text, "standing in front of");
    let text = DISTANT.replace_all(&text, "");
    let text = DANGLING.replace_all(&text, "standing in the scene$1");
    tidy(&text)
}

/// Stage 3: append whatever part of the profile the prompt forgot, in
/// profile order.
fn reassert_profile(prompt: &str, profile: &CharacterProfile) -> String {
    let lower = prompt.to_lowercase();
    let mut out = prompt.to_string();

    if !profile.species.is_empty() && !lower.contains(&profile.species.to_lowercase()) {
        let clause = if profile.name.is_empty() {
            format!("{} {}", indefinite_article(&profile.species), profile.species)
        } else {
            format!(
                "{} is {} {}",
                profile.name,
                indefinite_article(&profile.species),
                profile.species
            )
        };
        out = append_clause(&out, &clause);
    }

    let missing: Vec<String> = profile
        .attributes
        .iter()
        .filter(|a| !lower.contains(&a.phrase().to_lowercase()))
        .map(|a| a.with_article())
        .collect();
    if !missing.is_empty() {
        out = append_clause(&out, &format!("wearing {}", missing.join(", ")));
    }

    tidy(&out)
}

/// [`PromptCorrector::correct`] with the default directives.
pub fn correct(prompt: &str, profile: &CharacterProfile) -> String {
    PromptCorrector::default().correct(prompt, profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marcel() -> CharacterProfile {
        CharacterProfile::new("Marcel", "badger")
            .with_attribute("hat", "yellow")
            .with_attribute("vest", "blue")
            .with_attribute("shorts", "orange")
    }

    fn capitalized_words(text: &str) -> Vec<String> {
        Regex::new(r"\b[A-Z][a-z]+\b")
            .unwrap()
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    const SAMPLE_PROMPTS: &[&str] = &[
        "Marcel the badger watching a dinosaur in a jungle",
        "Marcel and his friend Oliver exploring a cave",
        "",
        "   ",
        "A badger in a yellow hat, a blue vest and orange shorts flying a kite.",
        "Marcel sitting and watching a group of kids play football from afar",
        "Marcel looking on as Oliver the owl and Marcel dance with other animals",
        "Marcel with Oliver the owl, staring at the moon, with a crowd of frogs",
        "Marcel gazing at stars, only one character in the scene",
        "WATCHING. watching... Watches!",
        "Oliver the owl and his friend Marcel flying kites",
        "Marcel and his mom baking a cake with a fox",
        "Marcel and Oliver's friends dancing",
        "Marcel decorating a tree with Christmas lights",
    ];

    #[test]
    fn test_passive_framing_becomes_active() {
        let out = correct("Marcel the badger watching a dinosaur in a jungle", &marcel());
        assert!(!out.to_lowercase().contains("watching"), "{}", out);
        assert!(out.contains("standing in front of a dinosaur"), "{}", out);
        for needle in ["yellow", "blue", "orange", "badger"] {
            assert!(out.contains(needle), "{} missing from {}", needle, out);
        }
    }

    #[test]
    fn test_companion_is_removed() {
        let out = correct("Marcel and his friend Oliver exploring a cave", &marcel());
        assert!(!out.contains("Oliver"), "{}", out);
        assert!(!out.contains("friend"), "{}", out);
        assert!(out.starts_with("Marcel exploring a cave"), "{}", out);
        assert!(capitalized_words(&out).iter().all(|w| w == "Marcel"), "{}", out);
    }

    #[test]
    fn test_protagonist_named_as_companion_becomes_the_subject() {
        let out = correct("Oliver the owl and his friend Marcel flying kites", &marcel());
        assert!(out.starts_with("Marcel flying kites"), "{}", out);
        assert!(!out.contains("Oliver"), "{}", out);
        assert!(!out.contains("owl"), "{}", out);

        let out = correct("A windy hill, Pip and his pals Oliver and Marcel flying kites", &marcel());
        assert!(out.starts_with("A windy hill, Marcel flying kites"), "{}", out);
        assert!(capitalized_words(&out).iter().all(|w| w == "A" || w == "Marcel"), "{}", out);
    }

    #[test]
    fn test_family_and_unnamed_animals_are_removed() {
        let out = correct("Marcel and his mom baking a cake", &marcel());
        assert!(out.starts_with("Marcel baking a cake,"), "{}", out);
        assert!(!out.contains("mom"), "{}", out);

        let out = correct("Marcel with grandpa and a fox exploring a cave", &marcel());
        assert!(out.starts_with("Marcel exploring a cave,"), "{}", out);

        let out = correct("Marcel the badger and a fox exploring a cave", &marcel());
        assert!(out.starts_with("Marcel the badger exploring a cave,"), "{}", out);
        assert!(!out.contains("fox"), "{}", out);

        let out = correct("Marcel playing with two little frogs in a pond", &marcel());
        assert!(out.starts_with("Marcel playing in a pond,"), "{}", out);
    }

    #[test]
    fn test_animal_and_name_used_as_adjectives_are_kept() {
        let out = correct("Marcel decorating a tree with Christmas lights", &marcel());
        assert!(out.starts_with("Marcel decorating a tree with Christmas lights,"), "{}", out);

        let out = correct("Marcel dressed up with a bee costume", &marcel());
        assert!(out.contains("with a bee costume"), "{}", out);
        assert_eq!(PromptCorrector::default().audit(&out, &marcel()), Vec::new(), "{}", out);
    }

    #[test]
    fn test_possessive_companion_is_removed_whole() {
        let out = correct("Marcel and Oliver's friends dancing", &marcel());
        assert!(out.starts_with("Marcel dancing,"), "{}", out);
        assert!(!out.contains("friends"), "{}", out);
        assert!(!out.contains("Oliver"), "{}", out);
    }

    #[test]
    fn test_named_second_character_is_removed_but_protagonist_kept() {
        let out = correct("The owl and Marcel dance with Oliver the fox", &marcel());
        assert!(out.contains("and Marcel"), "{}", out);
        assert!(!out.contains("Oliver"), "{}", out);
        assert!(!out.contains("fox"), "{}", out);
    }

    #[test]
    fn test_groups_and_plural_characters_are_removed() {
        let out = correct(
            "Marcel dancing with a crowd of frogs, among other animals",
            &marcel(),
        );
        assert!(!out.contains("crowd"), "{}", out);
        assert!(!out.contains("animals"), "{}", out);
        assert!(out.starts_with("Marcel dancing"), "{}", out);
    }

    #[test]
    fn test_dangling_rewrite_gets_an_object() {
        let out = correct("Marcel watching a group of kids", &marcel());
        assert!(out.starts_with("Marcel standing in the scene"), "{}", out);
        assert!(!out.contains("front of,"), "{}", out);
    }

    #[test]
    fn test_missing_attributes_appended_in_profile_order() {
        let out = PromptCorrector::new(Vec::new()).correct("Marcel in a yellow hat on a boat", &marcel());
        assert_eq!(
            out,
            "Marcel in a yellow hat on a boat, Marcel is a badger, wearing a blue vest, orange shorts"
        );
    }

    #[test]
    fn test_empty_prompt_gets_full_profile() {
        let out = correct("", &marcel());
        assert!(out.starts_with("Marcel is a badger, wearing a yellow hat"), "{}", out);
        assert!(out.ends_with("no text or lettering in the image"), "{}", out);
    }

    #[test]
    fn test_directives_are_not_duplicated() {
        let corrector = PromptCorrector::new(vec!["square 1:1 composition.".to_string()]);
        let once = corrector.correct("Marcel the badger in a yellow hat, blue vest, orange shorts, square 1:1 composition", &marcel());
        assert_eq!(once.matches("square 1:1 composition").count(), 1, "{}", once);
    }

    #[test]
    fn test_directives_are_cleaned_on_construction() {
        let corrector = PromptCorrector::new(vec![
            "children watching from afar".to_string(),
            "soft colors".to_string(),
            "soft colors".to_string(),
        ]);
        assert_eq!(
            corrector.directives(),
            &["children standing in the scene".to_string(), "soft colors".to_string()]
        );
    }

    #[test]
    fn test_correct_is_idempotent() {
        let corrector = PromptCorrector::new(vec![
            "children's book illustration, soft pastel colors, 80s and 90s aesthetic".to_string(),
            "only one character in the scene".to_string(),
        ]);
        for prompt in SAMPLE_PROMPTS {
            let once = corrector.correct(prompt, &marcel());
            let twice = corrector.correct(&once, &marcel());
            assert_eq!(once, twice, "not idempotent for {:?}", prompt);
        }
    }

    #[test]
    fn test_corrected_prompts_pass_audit() {
        let corrector = PromptCorrector::default();
        let profile = marcel();
        for prompt in SAMPLE_PROMPTS {
            let out = corrector.correct(prompt, &profile);
            let lower = out.to_lowercase();
            assert!(lower.contains("badger"), "{}", out);
            for attribute in &profile.attributes {
                assert!(lower.contains(&attribute.color), "{}", out);
                assert!(lower.contains(&attribute.item), "{}", out);
            }
            assert_eq!(corrector.audit(&out, &profile), Vec::new(), "{}", out);
        }
    }

    #[test]
    fn test_audit_reports_each_problem() {
        let corrector = PromptCorrector::new(Vec::new());
        let issues = corrector.audit("Marcel and Oliver watching the sea", &marcel());
        assert!(issues.contains(&PromptIssue::ExtraCharacter("Oliver".to_string())));
        assert!(issues.contains(&PromptIssue::PassiveFraming("watching".to_string())));
        assert!(issues.contains(&PromptIssue::MissingAttribute("badger".to_string())));
        assert!(issues.contains(&PromptIssue::MissingAttribute("orange shorts".to_string())));
    }

    #[test]
    fn test_profile_without_attributes_only_needs_species() {
        let owl = CharacterProfile::new("", "owl");
        let out = PromptCorrector::new(Vec::new()).correct("flying over a pond", &owl);
        assert_eq!(out, "flying over a pond, an owl");
    }
}
