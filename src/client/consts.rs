pub const RECOGNITION_URL_VAR: &str = "SCRIPTBUDDY_ASR_URL";
pub const SYNTHESIS_URL_VAR: &str = "SCRIPTBUDDY_TTS_URL";
pub const GATEWAY_TOKEN_VAR: &str = "SCRIPTBUDDY_GATEWAY_TOKEN";
pub const UID_VAR: &str = "SCRIPTBUDDY_UID";

pub const RECOGNITION_URL: &str = "ws://127.0.0.1:8000/api/ws/asr";
pub const SYNTHESIS_URL: &str = "ws://127.0.0.1:8000/api/ws/tts";
pub const DEFAULT_UID: &str = "scriptbuddy";
pub const DEFAULT_MODEL: &str = "bigmodel";
pub const DEFAULT_VOICE: &str = "BV001_streaming";
pub const DEFAULT_ENCODING: &str = "mp3";
pub const DEFAULT_SYNTHESIS_RATE: u32 = 24000;

pub const AUTHORIZATION_HEADER: &str = "Authorization";
