use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use whatlang::Lang;

use crate::config::ContentFilters;
use crate::error::RejectReason;

/// An accepted, storable text record. Created here on acceptance, written
/// once by the record store, immutable afterwards.
///
/// The metadata map is ordered so serialized records are byte-identical for
/// identical content, timestamp aside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRecord {
    pub source_url: String,
    pub text: String,
    pub extracted_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

impl TextRecord {
    pub fn language(&self) -> &str {
        self.metadata.get("language").map(String::as_str).unwrap_or("")
    }

    pub fn length(&self) -> &str {
        self.metadata.get("length").map(String::as_str).unwrap_or("")
    }
}

/// Applies the configured filters in order (length, language, blocklist),
/// short-circuiting on the first failure. Deterministic, no I/O.
pub fn validate(
    source_url: &str,
    text: &str,
    filters: &ContentFilters,
) -> Result<TextRecord, RejectReason> {
    let length = text.chars().count();
    if length < filters.min_text_length {
        return Err(RejectReason::TooShort);
    }

    let language = match whatlang::detect(text) {
        Some(info) => lang_code(info.lang()).to_string(),
        // Undetectable text is not in the allowed set either.
        None => return Err(RejectReason::LanguageNotAllowed),
    };
    if !filters.allowed_languages.iter().any(|l| l == &language) {
        return Err(RejectReason::LanguageNotAllowed);
    }

    let lowered = text.to_lowercase();
    for phrase in &filters.blocklist_phrases {
        if lowered.contains(&phrase.to_lowercase()) {
            return Err(RejectReason::BlocklistMatch(phrase.clone()));
        }
    }

    let mut metadata = BTreeMap::new();
    metadata.insert("language".to_string(), language);
    metadata.insert("length".to_string(), length.to_string());

    Ok(TextRecord {
        source_url: source_url.to_string(),
        text: text.to_string(),
        extracted_at: Utc::now(),
        metadata,
    })
}

/// Two-letter codes for the languages people actually configure; ISO 639-3
/// from whatlang otherwise.
fn lang_code(lang: Lang) -> &'static str {
    match lang {
        Lang::Eng => "en",
        Lang::Spa => "es",
        Lang::Fra => "fr",
        Lang::Deu => "de",
        Lang::Ita => "it",
        Lang::Por => "pt",
        Lang::Rus => "ru",
        Lang::Jpn => "ja",
        Lang::Kor => "ko",
        Lang::Cmn => "zh",
        other => other.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENGLISH: &str = "The harvest finished before sunset, and the workers \
        carried the last of the grain into the barn while the light held. \
        Nobody spoke much on the walk back; the day had been long and the road \
        was dusty, but the stores were full for the winter ahead.";

    fn filters() -> ContentFilters {
        ContentFilters {
            min_text_length: 100,
            allowed_languages: vec!["en".to_string()],
            blocklist_phrases: vec!["lorem ipsum".to_string()],
        }
    }

    #[test]
    fn accepts_valid_text_and_sets_metadata() {
        let record = validate("https://ex.test/a", ENGLISH, &filters()).unwrap();
        assert_eq!(record.source_url, "https://ex.test/a");
        assert_eq!(record.language(), "en");
        assert_eq!(
            record.length().parse::<usize>().unwrap(),
            ENGLISH.chars().count()
        );
        assert!(record.length().parse::<usize>().unwrap() >= 100);
    }

    #[test]
    fn rejects_short_text_first() {
        // Short AND blocklisted: length check wins, checks short-circuit.
        let err = validate("u", "lorem ipsum", &filters()).unwrap_err();
        assert_eq!(err, RejectReason::TooShort);
    }

    #[test]
    fn rejects_disallowed_language() {
        let spanish = "El cosechador terminó su trabajo antes del atardecer y \
            los trabajadores llevaron el grano al granero mientras duraba la \
            luz. Nadie habló mucho en el camino de vuelta; el día había sido \
            largo y el camino polvoriento, pero las reservas estaban llenas.";
        let err = validate("u", spanish, &filters()).unwrap_err();
        assert_eq!(err, RejectReason::LanguageNotAllowed);
    }

    #[test]
    fn rejects_blocklisted_phrase_case_insensitively() {
        let text = format!("{ENGLISH} Lorem IPSUM filler follows here.");
        let err = validate("u", &text, &filters()).unwrap_err();
        assert_eq!(
            err,
            RejectReason::BlocklistMatch("lorem ipsum".to_string())
        );
    }

    #[test]
    fn accepted_records_satisfy_all_invariants() {
        let record = validate("u", ENGLISH, &filters()).unwrap();
        let f = filters();
        assert!(record.text.chars().count() >= f.min_text_length);
        assert!(f.allowed_languages.contains(&record.language().to_string()));
        let lowered = record.text.to_lowercase();
        assert!(f
            .blocklist_phrases
            .iter()
            .all(|p| !lowered.contains(&p.to_lowercase())));
    }
}
