//! Persona definitions
//!
//! Personas are loaded once from a JSON file and shared read-only between
//! agents. The only mutable part is each persona's current [`Emotion`], which
//! lives in the [`PersonaBook`] next to the immutable definitions.

use crate::{ChorusError, Result};
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Relation label used when two personas have no explicit relation
pub const DEFAULT_RELATION: &str = "友達";

/// Embed colour used when a persona's colour is missing or malformed
pub const DEFAULT_COLOR: u32 = 0x5865F2;

/// A named personality profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    /// Stable identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Free-form personality description fed to the generator
    #[serde(default)]
    pub personality: String,
    /// Relationship to the monitored user
    #[serde(default)]
    pub relationship: String,
    /// Synthesis engine speaker id
    pub voicevox_speaker_id: u32,
    /// Preset lines used when generation fails
    #[serde(default)]
    pub phrases: Vec<String>,
    /// Emoji occasionally appended to text remarks
    #[serde(default)]
    pub emoji: Vec<String>,
    /// Hex colour, with or without a `#`/`0x` prefix
    #[serde(default)]
    pub color: String,
    /// Relation labels keyed by other persona ids
    #[serde(default)]
    pub relations: HashMap<String, String>,
}

impl Persona {
    /// Parse [`Persona::color`] into an RGB value
    pub fn color_value(&self) -> u32 {
        let hex = self
            .color
            .trim()
            .trim_start_matches('#')
            .trim_start_matches("0x")
            .trim_start_matches("0X");
        u32::from_str_radix(hex, 16)
            .ok()
            .filter(|v| *v <= 0xFF_FF_FF)
            .unwrap_or(DEFAULT_COLOR)
    }

    /// A random fallback phrase
    pub fn random_phrase(&self) -> Option<&str> {
        self.phrases
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
    }

    /// A random emoji
    pub fn random_emoji(&self) -> Option<&str> {
        self.emoji.choose(&mut rand::thread_rng()).map(String::as_str)
    }

    /// Append one of the persona's emoji half of the time
    pub fn decorate(&self, text: &str) -> String {
        let include = rand::thread_rng().gen_bool(0.5);
        self.decorate_with(text, include)
    }

    /// Append an emoji when `include_emoji` is set and the persona has any
    pub fn decorate_with(&self, text: &str, include_emoji: bool) -> String {
        match self.random_emoji().filter(|_| include_emoji) {
            Some(emoji) => format!("{} {}", text, emoji),
            None => text.to_string(),
        }
    }
}

/// A persona's current mood
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    /// Default state
    #[default]
    Neutral,
    /// Cheerful
    Happy,
    /// Irritated
    Angry,
    /// Upset
    Sad,
}

impl Emotion {
    /// Lowercase label, as used in prompts
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Happy => "happy",
            Self::Angry => "angry",
            Self::Sad => "sad",
        }
    }

    /// Infer the mood a reply expresses from simple textual markers
    pub fn from_reply(text: &str) -> Self {
        const HAPPY: &[&str] = &["!", "！", "笑", "www", "😊"];
        const ANGRY: &[&str] = &["怒", "💢"];
        const SAD: &[&str] = &["泣", "悲しい", "😢"];

        if ANGRY.iter().any(|m| text.contains(m)) {
            Self::Angry
        } else if SAD.iter().any(|m| text.contains(m)) {
            Self::Sad
        } else if HAPPY.iter().any(|m| text.contains(m)) {
            Self::Happy
        } else {
            Self::Neutral
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct PersonaFile {
    characters: Vec<Persona>,
}

/// All loaded personas plus their mutable emotion state
#[derive(Debug)]
pub struct PersonaBook {
    personas: Vec<Arc<Persona>>,
    emotions: RwLock<HashMap<String, Emotion>>,
}

impl PersonaBook {
    /// Load personas from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ChorusError::persona(format!(
                "Failed to read persona file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let book = Self::from_json(&raw)?;
        tracing::info!(
            path = %path.as_ref().display(),
            personas = book.personas.len(),
            "Loaded personas"
        );
        Ok(book)
    }

    /// Parse personas from a JSON document
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: PersonaFile = serde_json::from_str(raw)?;
        Self::new(file.characters)
    }

    /// Build a book from already-parsed personas
    pub fn new(personas: Vec<Persona>) -> Result<Self> {
        if personas.is_empty() {
            return Err(ChorusError::persona("At least one persona is required"));
        }

        let mut seen = std::collections::HashSet::new();
        for p in &personas {
            if !seen.insert(p.id.as_str()) {
                return Err(ChorusError::persona(format!(
                    "Duplicate persona id '{}'",
                    p.id
                )));
            }
        }

        Ok(Self {
            personas: personas.into_iter().map(Arc::new).collect(),
            emotions: RwLock::new(HashMap::new()),
        })
    }

    pub(crate) fn unchecked(personas: Vec<Persona>) -> Self {
        Self {
            personas: personas.into_iter().map(Arc::new).collect(),
            emotions: RwLock::new(HashMap::new()),
        }
    }

    /// All personas, in file order
    pub fn personas(&self) -> &[Arc<Persona>] {
        &self.personas
    }

    /// Look up a persona by id
    pub fn get(&self, id: &str) -> Option<&Arc<Persona>> {
        self.personas.iter().find(|p| p.id == id)
    }

    /// How persona `from` regards persona `to`
    pub fn relation(&self, from: &str, to: &str) -> String {
        self.get(from)
            .and_then(|p| p.relations.get(to))
            .cloned()
            .unwrap_or_else(|| DEFAULT_RELATION.to_string())
    }

    /// `(name, relation)` for every other persona, in file order
    pub fn relations_of(&self, id: &str) -> Vec<(String, String)> {
        self.personas
            .iter()
            .filter(|p| p.id != id)
            .map(|p| (p.name.clone(), self.relation(id, &p.id)))
            .collect()
    }

    /// Current emotion of a persona
    pub fn emotion(&self, id: &str) -> Emotion {
        self.emotions.read().get(id).copied().unwrap_or_default()
    }

    /// Overwrite a persona's emotion
    pub fn set_emotion(&self, id: &str, emotion: Emotion) {
        if self.get(id).is_none() {
            tracing::debug!(persona = %id, "Ignoring emotion for unknown persona");
            return;
        }
        self.emotions.write().insert(id.to_string(), emotion);
    }

    /// Reset every persona to [`Emotion::Neutral`]
    pub fn reset_emotions(&self) {
        self.emotions.write().clear();
        tracing::debug!("Persona emotions reset");
    }
}

/// Collision-avoiding persona assignment
///
/// Personas are dealt from a shuffled deck without replacement. Once every
/// persona has been handed out the deck is refilled and reshuffled, so reuse
/// only happens when there are more agents than personas.
#[derive(Debug)]
pub struct PersonaDeck {
    all: Vec<Arc<Persona>>,
    remaining: Mutex<Vec<Arc<Persona>>>,
}

impl PersonaDeck {
    /// Create a deck over the given personas
    pub fn new(personas: &[Arc<Persona>]) -> Self {
        let mut remaining = personas.to_vec();
        remaining.shuffle(&mut rand::thread_rng());
        Self {
            all: personas.to_vec(),
            remaining: Mutex::new(remaining),
        }
    }

    /// Deal the next persona
    pub fn draw(&self) -> Option<Arc<Persona>> {
        let mut remaining = self.remaining.lock();
        if remaining.is_empty() {
            if self.all.is_empty() {
                return None;
            }
            *remaining = self.all.clone();
            remaining.shuffle(&mut rand::thread_rng());
        }
        remaining.pop()
    }
}
