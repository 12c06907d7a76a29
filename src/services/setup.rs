use crate::core::config::{Config, StoryPreset};
use crate::core::state::{CharacterProfile, StoryRequest};
use anyhow::{bail, Context, Result};
use inquire::{required, Confirm, Text};
use log::info;

/// Clothing items asked for interactively; more can be listed in config.yml.
const MAX_INTERACTIVE_ITEMS: usize = 4;

pub fn request_from_preset(preset: &StoryPreset) -> StoryRequest {
    let profile = preset
        .attributes
        .iter()
        .fold(CharacterProfile::new(&preset.name, &preset.species), |p, a| {
            p.with_attribute(&a.item, &a.color)
        });
    StoryRequest {
        profile,
        topic: preset.topic.trim().to_string(),
        style: preset.style.trim().to_string(),
    }
}

fn preset_from_request(request: &StoryRequest) -> StoryPreset {
    StoryPreset {
        name: request.profile.name.clone(),
        species: request.profile.species.clone(),
        topic: request.topic.clone(),
        style: request.style.clone(),
        attributes: request.profile.attributes.clone(),
    }
}

pub fn validate_request(request: &StoryRequest) -> Result<()> {
    let profile = &request.profile;
    if profile.name.is_empty() {
        bail!("The main character needs a name");
    }
    if profile.species.is_empty() {
        bail!("The main character needs a species, e.g. badger or owl");
    }
    if request.topic.is_empty() {
        bail!("The story needs a topic");
    }
    if let Some(a) = profile.attributes.iter().find(|a| a.item.is_empty() || a.color.is_empty()) {
        bail!("Clothing needs both an item and a color (got \"{}\")", a.phrase().trim());
    }
    Ok(())
}

/// Returns the story to write: the `story` preset in unattended mode,
/// otherwise answers to interactive questions seeded with the preset.
pub fn collect_request(config: &mut Config) -> Result<StoryRequest> {
    if config.unattended {
        let preset = config
            .story
            .as_ref()
            .context("Unattended mode needs a `story` section in config.yml")?;
        let request = request_from_preset(preset);
        validate_request(&request)?;
        info!("Using story preset for {}", request.profile.describe());
        return Ok(request);
    }

    let preset = config.story.clone().unwrap_or_default();
    let request = ask_request(&preset)?;
    validate_request(&request)?;

    if config.story.as_ref().map(request_from_preset).as_ref() != Some(&request) {
        let save = Confirm::new("Save this story setup to config.yml for next time?")
            .with_default(false)
            .prompt()?;
        if save {
            config.story = Some(preset_from_request(&request));
            config.save()?;
            println!("Configuration saved.");
        }
    }

    Ok(request)
}

fn ask(prompt: &str, default: &str) -> Result<String> {
    let mut text = Text::new(prompt).with_validator(required!());
    if !default.is_empty() {
        text = text.with_default(default);
    }
    Ok(text.prompt()?.trim().to_string())
}

fn ask_request(preset: &StoryPreset) -> Result<StoryRequest> {
    let name = ask("Main character's name:", &preset.name)?;
    let species = ask("What kind of animal is it?", &preset.species)?;
    let topic = ask("What is the story about? (e.g. sharing, bedtime, bravery)", &preset.topic)?;
    let style = ask("Style and mood? (e.g. cozy, silly, adventure)", &preset.style)?;

    let mut profile = CharacterProfile::new(&name, &species);
    for i in 0..MAX_INTERACTIVE_ITEMS {
        let default_item = preset.attributes.get(i).map(|a| a.item.as_str()).unwrap_or("");
        let item = Text::new("Clothing item (leave empty to finish):")
            .with_default(default_item)
            .prompt()?;
        let item = item.trim();
        if item.is_empty() {
            break;
        }
        let default_color = preset.attributes.get(i).map(|a| a.color.as_str()).unwrap_or("");
        let color = ask(&format!("Color of the {}:", item), default_color)?;
        profile = profile.with_attribute(item, &color);
    }

    Ok(StoryRequest { profile, topic, style })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::Attribute;

    fn preset() -> StoryPreset {
        StoryPreset {
            name: " Marcel ".to_string(),
            species: "Badger".to_string(),
            topic: "bravery ".to_string(),
            style: "cozy".to_string(),
            attributes: vec![
                Attribute { item: "Hat".to_string(), color: "Yellow".to_string() },
                Attribute { item: "vest".to_string(), color: "blue".to_string() },
            ],
        }
    }

    #[test]
    fn test_request_from_preset_normalizes() {
        let request = request_from_preset(&preset());
        assert_eq!(request.profile.name, "Marcel");
        assert_eq!(request.profile.species, "badger");
        assert_eq!(request.topic, "bravery");
        assert_eq!(request.profile.outfit(), "a yellow hat, a blue vest");
        assert!(validate_request(&request).is_ok());

        let back = request_from_preset(&preset_from_request(&request));
        assert_eq!(back, request);
    }

    #[test]
    fn test_incomplete_requests_are_rejected() {
        let mut missing_species = preset();
        missing_species.species = "  ".to_string();
        assert!(validate_request(&request_from_preset(&missing_species)).is_err());

        let mut missing_color = preset();
        missing_color.attributes[1].color = String::new();
        let err = validate_request(&request_from_preset(&missing_color)).unwrap_err();
        assert!(err.to_string().contains("vest"));
    }

    #[test]
    fn test_unattended_uses_preset() -> Result<()> {
        let mut config = Config {
            unattended: true,
            story: Some(preset()),
            ..Config::default()
        };
        let request = collect_request(&mut config)?;
        assert_eq!(request.profile.attributes.len(), 2);

        config.story = None;
        assert!(collect_request(&mut config).is_err());
        Ok(())
    }
}
