//! Voice catalog and the flag decoration shown in voice pickers.

use crate::error::{Error, Result};
use std::fmt;

/// Every voice identifier the engine ships with.
pub const VOICES: &[&str] = &[
    "af_alloy",
    "af_aoede",
    "af_bella",
    "af_heart",
    "af_jessica",
    "af_kore",
    "af_nicole",
    "af_nova",
    "af_river",
    "af_sarah",
    "af_sky",
    "am_adam",
    "am_echo",
    "am_eric",
    "am_fenrir",
    "am_liam",
    "am_michael",
    "am_onyx",
    "am_puck",
    "am_santa",
    "bf_alice",
    "bf_emma",
    "bf_isabella",
    "bf_lily",
    "bm_daniel",
    "bm_fable",
    "bm_george",
    "bm_lewis",
    "ef_dora",
    "em_alex",
    "em_santa",
    "ff_siwis",
    "hf_alpha",
    "hf_beta",
    "hm_omega",
    "hm_psi",
    "if_sara",
    "im_nicola",
    "jf_alpha",
    "jf_gongitsune",
    "jf_nezumi",
    "jf_tebukuro",
    "jm_kumo",
    "pf_dora",
    "pm_alex",
    "pm_santa",
    "zf_xiaobei",
    "zf_xiaoni",
    "zf_xiaoxiao",
    "zf_xiaoyi",
    "zm_yunjian",
    "zm_yunxi",
    "zm_yunxia",
    "zm_yunyang",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    AmericanEnglish,
    BritishEnglish,
    Spanish,
    French,
    Hindi,
    Italian,
    Japanese,
    BrazilianPortuguese,
    Mandarin,
}

impl Language {
    const ALL: [Language; 9] = [
        Language::AmericanEnglish,
        Language::BritishEnglish,
        Language::Spanish,
        Language::French,
        Language::Hindi,
        Language::Italian,
        Language::Japanese,
        Language::BrazilianPortuguese,
        Language::Mandarin,
    ];

    /// Infer the language from a voice identifier's first character.
    pub fn from_voice(voice: &str) -> Option<Self> {
        match voice.chars().next()? {
            'a' => Some(Language::AmericanEnglish),
            'b' => Some(Language::BritishEnglish),
            'e' => Some(Language::Spanish),
            'f' => Some(Language::French),
            'h' => Some(Language::Hindi),
            'i' => Some(Language::Italian),
            'j' => Some(Language::Japanese),
            'p' => Some(Language::BrazilianPortuguese),
            'z' => Some(Language::Mandarin),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Language::AmericanEnglish => "en-us",
            Language::BritishEnglish => "en-gb",
            Language::Spanish => "es",
            Language::French => "fr-fr",
            Language::Hindi => "hi",
            Language::Italian => "it",
            Language::Japanese => "ja",
            Language::BrazilianPortuguese => "pt-br",
            Language::Mandarin => "cmn",
        }
    }

    pub fn flag(self) -> &'static str {
        match self {
            Language::AmericanEnglish => "🇺🇸",
            Language::BritishEnglish => "🇬🇧",
            Language::Spanish => "🇪🇸",
            Language::French => "🇫🇷",
            Language::Hindi => "🇮🇳",
            Language::Italian => "🇮🇹",
            Language::Japanese => "🇯🇵",
            Language::BrazilianPortuguese => "🇧🇷",
            Language::Mandarin => "🇨🇳",
        }
    }
}

/// A validated voice identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Voice(String);

impl Voice {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if Language::from_voice(&id).is_none() {
            return Err(Error::UnknownVoice(id));
        }
        Ok(Self(id))
    }

    /// Parse either a bare identifier or a flag-decorated one.
    pub fn from_display(label: &str) -> Result<Self> {
        Self::new(deemojify(label))
    }

    pub fn id(&self) -> &str {
        &self.0
    }

    pub fn language(&self) -> Language {
        // Validated in `new`.
        Language::from_voice(&self.0).unwrap_or(Language::AmericanEnglish)
    }

    /// The single-letter language code the engine expects.
    pub fn lang_code(&self) -> &str {
        &self.0[..1]
    }

    pub fn display(&self) -> String {
        emojify(&self.0)
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Voices the pickers offer. Non-English voices are not read reliably yet.
pub fn english_voices() -> impl Iterator<Item = &'static str> {
    VOICES
        .iter()
        .copied()
        .filter(|v| v.starts_with('a') || v.starts_with('b'))
}

/// Prefix a voice with its language flag, e.g. `🇺🇸 af_heart`.
pub fn emojify(voice: &str) -> String {
    match Language::from_voice(voice) {
        Some(language) => format!("{} {}", language.flag(), voice),
        None => voice.to_string(),
    }
}

/// Strip a flag prefix added by [`emojify`]. Undecorated input is returned as is.
pub fn deemojify(label: &str) -> &str {
    for language in Language::ALL {
        if let Some(rest) = label.strip_prefix(language.flag()) {
            return rest.strip_prefix(' ').unwrap_or(rest);
        }
    }
    label
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emojify_round_trips_for_every_voice() {
        for voice in VOICES {
            assert_eq!(deemojify(&emojify(voice)), *voice);
        }
    }

    #[test]
    fn languages_from_prefix() {
        assert_eq!(Language::from_voice("af_heart").unwrap().tag(), "en-us");
        assert_eq!(Language::from_voice("bm_lewis").unwrap().tag(), "en-gb");
        assert_eq!(Language::from_voice("zm_yunxi").unwrap().tag(), "cmn");
        assert!(Language::from_voice("xx_nobody").is_none());
        assert!(Language::from_voice("").is_none());
    }

    #[test]
    fn decorated_labels_parse_back() {
        let voice = Voice::from_display("🇬🇧 bf_emma").unwrap();
        assert_eq!(voice.id(), "bf_emma");
        assert_eq!(voice.lang_code(), "b");
        assert_eq!(voice.display(), "🇬🇧 bf_emma");
        assert!(Voice::new("q_unknown").is_err());
    }

    #[test]
    fn english_subset() {
        let english: Vec<_> = english_voices().collect();
        assert_eq!(english.len(), 28);
        assert!(english.iter().all(|v| v.starts_with('a') || v.starts_with('b')));
    }
}
