//! Language detection with `whatlang`, reported as ISO 639-1 codes.

use folio_core::normalize::LanguageDetector;
use whatlang::Lang;

/// Minimum number of alphabetic characters before a guess is attempted.
const MIN_ALPHABETIC: usize = 3;

/// Detects the dominant language of a text.
#[derive(Debug, Clone, Default)]
pub struct WhatlangDetector {
    /// Only report guesses whatlang itself considers reliable.
    reliable_only: bool,
}

impl WhatlangDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A detector that returns `None` for low-confidence guesses.
    pub fn reliable_only() -> Self {
        Self {
            reliable_only: true,
        }
    }
}

impl LanguageDetector for WhatlangDetector {
    fn detect(&self, text: &str) -> Option<String> {
        if text.chars().filter(|c| c.is_alphabetic()).count() < MIN_ALPHABETIC {
            return None;
        }
        let info = whatlang::detect(text)?;
        if self.reliable_only && !info.is_reliable() {
            return None;
        }
        iso639_1(info.lang()).map(str::to_string)
    }
}

/// Two-letter code for the languages documents are likely to be written in.
pub fn iso639_1(lang: Lang) -> Option<&'static str> {
    let code = match lang {
        Lang::Eng => "en",
        Lang::Fra => "fr",
        Lang::Deu => "de",
        Lang::Spa => "es",
        Lang::Ita => "it",
        Lang::Por => "pt",
        Lang::Nld => "nl",
        Lang::Rus => "ru",
        Lang::Pol => "pl",
        Lang::Swe => "sv",
        Lang::Dan => "da",
        Lang::Fin => "fi",
        Lang::Tur => "tr",
        Lang::Ara => "ar",
        Lang::Cmn => "zh",
        Lang::Jpn => "ja",
        Lang::Kor => "ko",
        _ => return None,
    };
    Some(code)
}
