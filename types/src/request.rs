//! Full-request payloads opening a recognition or synthesis exchange.

pub const RECOGNITION_SAMPLE_RATE: u32 = 16000;
pub const SYNTHESIS_SAMPLE_RATE: u32 = 24000;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct User {
    uid: String,
}

impl User {
    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: uid.into() }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RecognitionAudio {
    format: String,
    codec: String,
    rate: u32,
    bits: u16,
    channel: u16,
}

impl Default for RecognitionAudio {
    fn default() -> Self {
        Self {
            format: "pcm".to_string(),
            codec: "raw".to_string(),
            rate: RECOGNITION_SAMPLE_RATE,
            bits: 16,
            channel: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RecognitionParams {
    reqid: String,
    workflow: String,
    sequence: i32,
    model_name: String,
    enable_itn: bool,
    result_type: String,
}

/// Opening payload of a recognition exchange: 16 kHz mono PCM16, full results.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RecognitionRequest {
    user: User,
    audio: RecognitionAudio,
    request: RecognitionParams,
}

impl RecognitionRequest {
    pub fn new(uid: impl Into<String>, reqid: impl Into<String>) -> Self {
        Self {
            user: User::new(uid),
            audio: RecognitionAudio::default(),
            request: RecognitionParams {
                reqid: reqid.into(),
                workflow: "audio_in".to_string(),
                sequence: 1,
                model_name: "bigmodel".to_string(),
                enable_itn: true,
                result_type: "full".to_string(),
            },
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.request.model_name = model.into();
        self
    }

    pub fn with_sequence(mut self, sequence: i32) -> Self {
        self.request.sequence = sequence;
        self
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn reqid(&self) -> &str {
        &self.request.reqid
    }

    pub fn model(&self) -> &str {
        &self.request.model_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.audio.rate
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SynthesisAudio {
    voice_type: String,
    encoding: String,
    rate: u32,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SynthesisParams {
    reqid: String,
    text: String,
    operation: String,
    with_timestamp: u8,
}

/// Opening payload of a synthesis exchange; the whole text is submitted at once.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SynthesisRequest {
    user: User,
    audio: SynthesisAudio,
    request: SynthesisParams,
}

impl SynthesisRequest {
    pub fn new(uid: impl Into<String>, reqid: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user: User::new(uid),
            audio: SynthesisAudio {
                voice_type: "BV001_streaming".to_string(),
                encoding: "mp3".to_string(),
                rate: SYNTHESIS_SAMPLE_RATE,
            },
            request: SynthesisParams {
                reqid: reqid.into(),
                text: text.into(),
                operation: "submit".to_string(),
                with_timestamp: 1,
            },
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.audio.voice_type = voice.into();
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>, rate: u32) -> Self {
        self.audio.encoding = encoding.into();
        self.audio.rate = rate;
        self
    }

    pub fn reqid(&self) -> &str {
        &self.request.reqid
    }

    pub fn text(&self) -> &str {
        &self.request.text
    }

    pub fn voice(&self) -> &str {
        &self.audio.voice_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recognition_request_shape() {
        let request = RecognitionRequest::new("scriptbuddy", "r-1");
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "user": {"uid": "scriptbuddy"},
                "audio": {"format": "pcm", "codec": "raw", "rate": 16000, "bits": 16, "channel": 1},
                "request": {
                    "reqid": "r-1",
                    "workflow": "audio_in",
                    "sequence": 1,
                    "model_name": "bigmodel",
                    "enable_itn": true,
                    "result_type": "full"
                }
            })
        );
    }

    #[test]
    fn synthesis_request_shape() {
        let request = SynthesisRequest::new("scriptbuddy", "r-2", "你好").with_voice("BV700_streaming");
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "user": {"uid": "scriptbuddy"},
                "audio": {"voice_type": "BV700_streaming", "encoding": "mp3", "rate": 24000},
                "request": {"reqid": "r-2", "text": "你好", "operation": "submit", "with_timestamp": 1}
            })
        );
    }
}
