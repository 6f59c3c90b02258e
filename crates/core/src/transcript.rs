//! Transcript document written by the transcription stage (`lyrics.json`).
//!
//! A track whose recognized text is shorter than [`MIN_TEXT_LENGTH`]
//! characters counts as instrumental and produces the explicit empty
//! transcript instead of an error.

use serde::{Deserialize, Serialize};

/// Minimum trimmed text length for a transcript to count as lyrics.
pub const MIN_TEXT_LENGTH: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub words: Vec<Word>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub language: Option<String>,
    pub instrumental: bool,
    pub segments: Vec<Segment>,
}

impl Transcript {
    /// The well-formed empty result for tracks without lyrics.
    pub fn instrumental() -> Self {
        Self {
            language: None,
            instrumental: true,
            segments: Vec::new(),
        }
    }

    /// Build a transcript from recognizer output, collapsing to
    /// [`Transcript::instrumental`] when there is too little text.
    pub fn from_segments(language: Option<String>, segments: Vec<Segment>) -> Self {
        if total_text_len(&segments) < MIN_TEXT_LENGTH {
            return Self::instrumental();
        }
        let segments = segments
            .into_iter()
            .map(|mut s| {
                s.text = s.text.trim().to_string();
                s
            })
            .filter(|s| !s.text.is_empty())
            .collect();
        Self {
            language,
            instrumental: false,
            segments,
        }
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}

/// Length of the joined, trimmed segment text.
fn total_text_len(segments: &[Segment]) -> usize {
    segments
        .iter()
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64, text: &str) -> Segment {
        Segment {
            start,
            end,
            text: text.into(),
            words: Vec::new(),
        }
    }

    #[test]
    fn silence_is_instrumental() {
        let t = Transcript::from_segments(Some("en".into()), Vec::new());
        assert_eq!(t, Transcript::instrumental());
    }

    #[test]
    fn short_text_is_instrumental() {
        let t = Transcript::from_segments(Some("en".into()), vec![seg(0.0, 1.0, "  oh  ")]);
        assert!(t.instrumental);
        assert!(t.language.is_none());
        assert!(t.segments.is_empty());
    }

    #[test]
    fn lyrics_are_kept_and_trimmed() {
        let t = Transcript::from_segments(
            Some("en".into()),
            vec![
                seg(0.0, 2.5, " Hello darkness my old friend "),
                seg(2.5, 3.0, "   "),
            ],
        );
        assert!(!t.instrumental);
        assert_eq!(t.language.as_deref(), Some("en"));
        assert_eq!(t.segments.len(), 1);
        assert_eq!(t.segments[0].text, "Hello darkness my old friend");
    }

    #[test]
    fn instrumental_wire_shape() {
        let value = serde_json::to_value(Transcript::instrumental()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"language": null, "instrumental": true, "segments": []})
        );
    }
}
