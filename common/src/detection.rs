use serde::{Deserialize, Serialize};

/// One sentence of an analysed page with the emotion it should be read with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceEmotion {
    pub sentence: String,
    pub emotion: String,
}

/// Response body of `POST /process-image/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageAnalysis {
    #[serde(default)]
    pub full_text: String,
    pub sentences: Vec<SentenceEmotion>,
}

impl PageAnalysis {
    /// Normalise whitespace and strip stray escapes in every text field.
    pub fn cleaned(self) -> Self {
        Self {
            full_text: clean_text(&self.full_text),
            sentences: self
                .sentences
                .into_iter()
                .map(|s| SentenceEmotion {
                    sentence: clean_text(&s.sentence),
                    emotion: clean_text(&s.emotion),
                })
                .collect(),
        }
    }
}

/// Newlines become spaces, backslashes are dropped, whitespace runs collapse.
pub fn clean_text(text: &str) -> String {
    text.replace('\\', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// One detection pushed by the socket endpoint, box as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: [f64; 4],
    pub class: String,
    pub confidence: f64,
    /// Estimated distance in centimetres.
    pub depth: f64,
}

impl Detection {
    /// `(x, y, width, height)` of the box, clamped to non-negative size.
    pub fn rect(&self) -> (f64, f64, f64, f64) {
        let [x1, y1, x2, y2] = self.bbox;
        (x1, y1, (x2 - x1).max(0.0), (y2 - y1).max(0.0))
    }

    pub fn label(&self) -> String {
        format!(
            "{} ({:.2}, {:.1} cm)",
            self.class, self.confidence, self.depth
        )
    }
}

/// Parse one socket message. An empty JSON object means nothing was detected.
pub fn parse_detection_message(text: &str) -> Result<Option<Detection>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    match &value {
        serde_json::Value::Object(map) if map.is_empty() => Ok(None),
        _ => serde_json::from_value(value).map(Some),
    }
}

/// Socket body for "no detection in this frame".
pub fn empty_detection_message() -> String {
    "{}".to_string()
}

/// A prediction from an object-detection model, box as `[x, y, width, height]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub bbox: [f64; 4],
    pub class: String,
    pub score: f64,
}

/// Result of a remote recognition round trip; the two paths never share a shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionResult {
    /// Page text analysed by `POST /process-image/`.
    Sentences(PageAnalysis),
    /// One message from the detection socket; `None` for an empty frame.
    Detection(Option<Detection>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_collapses_whitespace_and_backslashes() {
        assert_eq!(clean_text("  Hello\n\nworld\\  again \t"), "Hello world again");
        assert_eq!(clean_text(""), "");
    }

    #[test]
    fn cleaned_touches_every_field() {
        let analysis = PageAnalysis {
            full_text: "A\nB".into(),
            sentences: vec![SentenceEmotion {
                sentence: " It was\\ sunny. ".into(),
                emotion: "happy\n".into(),
            }],
        }
        .cleaned();
        assert_eq!(analysis.full_text, "A B");
        assert_eq!(analysis.sentences[0].sentence, "It was sunny.");
        assert_eq!(analysis.sentences[0].emotion, "happy");
    }

    #[test]
    fn page_analysis_tolerates_missing_full_text() {
        let parsed: PageAnalysis =
            serde_json::from_str(r#"{"sentences":[{"sentence":"Hi.","emotion":"sad"}]}"#).unwrap();
        assert_eq!(parsed.full_text, "");
        assert_eq!(parsed.sentences.len(), 1);
    }

    #[test]
    fn detection_uses_box_key() {
        let msg = r#"{"box":[10,20,110,220],"class":"chair","confidence":0.91,"depth":42.5}"#;
        let det = parse_detection_message(msg).unwrap().unwrap();
        assert_eq!(det.class, "chair");
        assert_eq!(det.rect(), (10.0, 20.0, 100.0, 200.0));
        assert_eq!(det.label(), "chair (0.91, 42.5 cm)");
        let back = serde_json::to_value(&det).unwrap();
        assert!(back.get("box").is_some());
    }

    #[test]
    fn empty_object_is_no_detection() {
        assert_eq!(parse_detection_message(&empty_detection_message()).unwrap(), None);
        assert!(parse_detection_message(r#"{"class":"dog"}"#).is_err());
        assert!(parse_detection_message("not json").is_err());
    }
}
