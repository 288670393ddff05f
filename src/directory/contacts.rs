//! Contact Directory
//!
//! Statische Liste von Avatar-Profilen. Speichert Anzeigedaten und die
//! Parameter, mit denen ein Anruf gestartet wird.

use crate::call_engine::CallParameters;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Failed to read contact list: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse contact list: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Contact list is empty")]
    Empty,
}

// ============================================================================
// CONTACT STRUCT
// ============================================================================

/// Avatar-Profil mit Verbindungsparametern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub display_name: String,
    #[serde(rename = "avatarURL", alias = "avatarUrl")]
    pub avatar_url: String,
    pub one_liner: String,
    pub face_id: String,
    #[serde(default)]
    pub voice_id: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub first_message: Option<String>,
}

impl Contact {
    fn builtin(display_name: &str, avatar_url: &str, one_liner: &str, face_id: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            avatar_url: avatar_url.to_string(),
            one_liner: one_liner.to_string(),
            face_id: face_id.to_string(),
            voice_id: String::new(),
            system_prompt: None,
            first_message: None,
        }
    }

    /// Parameter für einen Anruf bei diesem Kontakt
    pub fn call_parameters(&self, api_key: impl Into<String>) -> CallParameters {
        CallParameters {
            display_name: self.display_name.clone(),
            face_id: self.face_id.clone(),
            voice_id: self.voice_id.clone(),
            first_message: self
                .first_message
                .clone()
                .unwrap_or_else(|| format!("Hey, it's {}!", self.display_name)),
            system_prompt: self.system_prompt.clone().unwrap_or_else(|| {
                format!(
                    "You are {}, {}. Keep your answers short and conversational.",
                    self.display_name, self.one_liner
                )
            }),
            api_key: api_key.into(),
        }
    }
}

// ============================================================================
// DIRECTORY
// ============================================================================

/// Richtung beim Blättern durch die Liste
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStep {
    Up,
    Down,
}

/// Kontaktliste mit genau einem ausgewählten Eintrag
#[derive(Debug, Clone)]
pub struct ContactDirectory {
    contacts: Vec<Contact>,
    selected: usize,
}

impl ContactDirectory {
    /// Die mitgelieferten Avatare
    pub fn builtin() -> Self {
        const BASE: &str = "https://kodan-videos.s3.us-east-2.amazonaws.com";
        let contacts = vec![
            Contact::builtin(
                "Kareem",
                &format!("{}/2GPMNls.md.png", BASE),
                "backend engineer",
                "123",
            ),
            Contact::builtin(
                "Thomas",
                &format!(
                    "{}/Screenshot%202024-12-07%20at%201.40.37%E2%80%AFPM.png",
                    BASE
                ),
                "indie hacker",
                "124",
            ),
            Contact::builtin(
                "Lucas",
                &format!(
                    "{}/Screenshot%202024-12-07%20at%201.19.46%E2%80%AFPM.png",
                    BASE
                ),
                "a CS student",
                "125",
            ),
            Contact::builtin(
                "Nuné",
                &format!(
                    "{}/Screenshot%202024-12-07%20at%201.19.31%E2%80%AFPM.png",
                    BASE
                ),
                "startup consultant",
                "156e758d-5823-4d45-bb76-337188e70880",
            ),
            Contact::builtin(
                "Nasif",
                &format!(
                    "{}/Screenshot%202024-12-07%20at%201.20.00%E2%80%AFPM.png",
                    BASE
                ),
                "postdoc",
                "127",
            ),
        ];

        Self {
            contacts,
            selected: 0,
        }
    }

    /// Lädt eine Kontaktliste im JSON-Format (Array von Kontakten)
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let contacts: Vec<Contact> = serde_json::from_str(&raw)?;
        if contacts.is_empty() {
            return Err(DirectoryError::Empty);
        }

        tracing::info!(
            "Loaded {} contact(s) from {}",
            contacts.len(),
            path.as_ref().display()
        );
        Ok(Self {
            contacts,
            selected: 0,
        })
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    /// Sucht einen Kontakt nach Anzeigename (Groß-/Kleinschreibung egal)
    pub fn find(&self, name: &str) -> Option<&Contact> {
        let needle = name.trim().to_lowercase();
        self.contacts
            .iter()
            .find(|c| c.display_name.to_lowercase() == needle)
    }

    pub fn selected(&self) -> Option<&Contact> {
        self.contacts.get(self.selected)
    }

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    /// Verschiebt die Auswahl, am Ende geht es vorne weiter
    pub fn move_selection(&mut self, step: SelectionStep) -> Option<&Contact> {
        let len = self.contacts.len();
        if len == 0 {
            return None;
        }
        self.selected = match step {
            SelectionStep::Up if self.selected == 0 => len - 1,
            SelectionStep::Up => self.selected - 1,
            SelectionStep::Down => (self.selected + 1) % len,
        };
        self.selected()
    }

    /// Parameter für den ausgewählten Kontakt
    pub fn call_parameters(&self, api_key: impl Into<String>) -> Option<CallParameters> {
        self.selected().map(|c| c.call_parameters(api_key))
    }
}

impl Default for ContactDirectory {
    fn default() -> Self {
        Self::builtin()
    }
}

// ============================================================================
// TESTS
// ============================================================================
