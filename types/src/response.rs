//! Structured payloads carried by full-response frames.

/// Codes the gateway uses to report success. Anything else is an error.
pub const SUCCESS_CODES: [i64; 3] = [0, 1000, 3000];

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Utterance {
    #[serde(default)]
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    utterance_end: Option<bool>,
}

impl Utterance {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            utterance_end: None,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn utterance_end(&self) -> bool {
        self.utterance_end.unwrap_or(false)
    }
}

/// `result` is either a list of utterances or a single one, depending on the
/// gateway version.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum RecognitionResult {
    Many(Vec<Utterance>),
    One(Utterance),
}

impl RecognitionResult {
    pub fn first(&self) -> Option<&Utterance> {
        match self {
            RecognitionResult::Many(items) => items.first(),
            RecognitionResult::One(item) => Some(item),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ServerResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reqid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sequence: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<RecognitionResult>,
}

impl ServerResponse {
    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_result(mut self, result: RecognitionResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn code(&self) -> Option<i64> {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn result(&self) -> Option<&RecognitionResult> {
        self.result.as_ref()
    }

    /// A missing code counts as success.
    pub fn is_error(&self) -> bool {
        self.code.is_some_and(|code| !SUCCESS_CODES.contains(&code))
    }

    /// Recognized text of the first utterance, if any and non-blank.
    pub fn text(&self) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(RecognitionResult::first)
            .map(Utterance::text)
            .filter(|text| !text.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn both_result_shapes_yield_text() {
        let legacy: ServerResponse = serde_json::from_value(json!({
            "code": 1000, "message": "Success", "sequence": 3, "result": [{"text": "你好"}]
        })).unwrap();
        assert_eq!(legacy.text(), Some("你好"));
        assert!(!legacy.is_error());

        let current: ServerResponse = serde_json::from_value(json!({
            "result": {"text": "再见", "utterance_end": true}
        })).unwrap();
        assert_eq!(current.text(), Some("再见"));
        assert!(current.result().and_then(RecognitionResult::first).unwrap().utterance_end());
    }

    #[test]
    fn blank_or_missing_text() {
        let empty: ServerResponse = serde_json::from_value(json!({"result": [{"text": "  "}]})).unwrap();
        assert_eq!(empty.text(), None);
        let none: ServerResponse = serde_json::from_value(json!({"code": 0})).unwrap();
        assert_eq!(none.text(), None);
        let no_items: ServerResponse = serde_json::from_value(json!({"result": []})).unwrap();
        assert_eq!(no_items.text(), None);
    }

    #[test]
    fn error_codes() {
        for code in SUCCESS_CODES {
            assert!(!ServerResponse::default().with_code(code).is_error());
        }
        assert!(ServerResponse::default().with_code(1013).is_error());
        assert!(!ServerResponse::default().is_error());
    }
}
