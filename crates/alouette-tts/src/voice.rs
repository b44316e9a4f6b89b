//! Voice descriptors and backend tiers.

use serde::{Deserialize, Serialize};

use crate::error::{AlouetteError, AlouetteResult};

/// Voice gender classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    /// Male voice
    Male,
    /// Female voice
    Female,
    /// Gender-neutral voice
    Neutral,
    /// Gender not reported by the backend
    Unknown,
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Male => write!(f, "male"),
            Self::Female => write!(f, "female"),
            Self::Neutral => write!(f, "neutral"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Backend capability tier.
///
/// Native backends wrap an engine shipped with the operating system and
/// only exist on some platforms. Universal backends work everywhere and
/// act as the fallback target when a native engine is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendTier {
    /// Platform-provided engine, not available everywhere
    Native,
    /// Cross-platform engine, always available
    Universal,
}

impl BackendTier {
    /// Check whether this tier has a peer tier to fall back to
    #[must_use]
    pub const fn has_fallback_tier(&self) -> bool {
        matches!(self, Self::Native)
    }

    /// The tier used when this tier's backend is unusable
    #[must_use]
    pub const fn fallback_tier(&self) -> Option<Self> {
        match self {
            Self::Native => Some(Self::Universal),
            Self::Universal => None,
        }
    }
}

impl std::fmt::Display for BackendTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Universal => write!(f, "universal"),
        }
    }
}

/// A voice available for synthesis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    /// Unique voice identifier
    pub id: String,
    /// Human-readable voice name
    pub name: String,
    /// BCP 47 language tag, e.g. "en-US"
    pub language: String,
    /// Voice gender
    pub gender: Gender,
    /// Whether the backend marks this voice as a default for its language
    pub is_default: bool,
    /// Tier of the backend this voice belongs to
    pub tier: BackendTier,
}

impl Voice {
    /// Create a new voice
    pub fn new<S: Into<String>>(id: S, name: S, language: S, gender: Gender) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            language: language.into(),
            gender,
            is_default: false,
            tier: BackendTier::Universal,
        }
    }

    /// Mark this voice as a language default
    #[must_use]
    pub const fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Set the backend tier this voice belongs to
    #[must_use]
    pub const fn with_tier(mut self, tier: BackendTier) -> Self {
        self.tier = tier;
        self
    }

    /// Check if this voice supports the given language.
    ///
    /// Comparison is by primary subtag, so an "en-US" voice supports
    /// "en" and "en-GB" requests.
    #[must_use]
    pub fn supports_language(&self, language: &str) -> bool {
        let own = self.language.split('-').next().unwrap_or(&self.language);
        let requested = language.split('-').next().unwrap_or(language);
        own.eq_ignore_ascii_case(requested)
    }

    /// Validate voice parameters
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any required field is empty.
    pub fn validate(&self) -> AlouetteResult<()> {
        if self.id.is_empty() {
            return Err(AlouetteError::validation("Voice ID cannot be empty"));
        }
        if self.name.is_empty() {
            return Err(AlouetteError::validation("Voice name cannot be empty"));
        }
        if self.language.is_empty() {
            return Err(AlouetteError::validation("Voice language cannot be empty"));
        }
        Ok(())
    }
}

impl std::fmt::Display for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.language, self.gender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_voice() -> Voice {
        Voice::new("en_us_heather", "Heather", "en-US", Gender::Female)
    }

    #[test]
    fn test_voice_creation() {
        let voice = test_voice();
        assert_eq!(voice.id, "en_us_heather");
        assert_eq!(voice.name, "Heather");
        assert_eq!(voice.language, "en-US");
        assert_eq!(voice.gender, Gender::Female);
        assert!(!voice.is_default);
        assert_eq!(voice.tier, BackendTier::Universal);
    }

    #[test]
    fn test_voice_builder() {
        let voice = test_voice().as_default().with_tier(BackendTier::Native);
        assert!(voice.is_default);
        assert_eq!(voice.tier, BackendTier::Native);
    }

    #[test]
    fn test_supports_language() {
        let voice = test_voice();
        assert!(voice.supports_language("en"));
        assert!(voice.supports_language("en-US"));
        assert!(voice.supports_language("en-GB"));
        assert!(voice.supports_language("EN"));
        assert!(!voice.supports_language("fr"));
        assert!(!voice.supports_language("fr-FR"));
    }

    #[test]
    fn test_voice_validation() {
        assert!(test_voice().validate().is_ok());

        let mut voice = test_voice();
        voice.id = String::new();
        assert!(voice.validate().is_err());

        let mut voice = test_voice();
        voice.name = String::new();
        assert!(voice.validate().is_err());

        let mut voice = test_voice();
        voice.language = String::new();
        assert!(voice.validate().is_err());
    }

    #[test]
    fn test_tier_fallback() {
        assert!(BackendTier::Native.has_fallback_tier());
        assert!(!BackendTier::Universal.has_fallback_tier());
        assert_eq!(
            BackendTier::Native.fallback_tier(),
            Some(BackendTier::Universal)
        );
        assert_eq!(BackendTier::Universal.fallback_tier(), None);
    }

    #[test]
    fn test_display() {
        let voice = test_voice();
        assert_eq!(voice.to_string(), "Heather (en-US, female)");
        assert_eq!(BackendTier::Native.to_string(), "native");
        assert_eq!(Gender::Neutral.to_string(), "neutral");
    }

    #[test]
    fn test_serde_round_trip() {
        let voice = test_voice().as_default();
        let json = serde_json::to_string(&voice).unwrap();
        let parsed: Voice = serde_json::from_str(&json).unwrap();
        assert_eq!(voice, parsed);
    }
}
