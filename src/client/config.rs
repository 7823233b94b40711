use secrecy::SecretString;

use crate::client::consts;

/// Endpoints and request defaults shared by both session variants.
#[derive(Debug)]
pub struct Config {
    recognition_url: String,
    synthesis_url: String,
    uid: String,
    model: String,
    voice: String,
    encoding: String,
    synthesis_rate: u32,
    token: Option<SecretString>,
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    pub fn with_recognition_url(mut self, url: &str) -> Self {
        self.config.recognition_url = url.to_string();
        self
    }

    pub fn with_synthesis_url(mut self, url: &str) -> Self {
        self.config.synthesis_url = url.to_string();
        self
    }

    pub fn with_uid(mut self, uid: &str) -> Self {
        self.config.uid = uid.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.model = model.to_string();
        self
    }

    pub fn with_voice(mut self, voice: &str) -> Self {
        self.config.voice = voice.to_string();
        self
    }

    pub fn with_encoding(mut self, encoding: &str, sample_rate: u32) -> Self {
        self.config.encoding = encoding.to_string();
        self.config.synthesis_rate = sample_rate;
        self
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.config.token = Some(SecretString::from(token.to_string()));
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Defaults, overridden by `SCRIPTBUDDY_ASR_URL`, `SCRIPTBUDDY_TTS_URL`,
    /// `SCRIPTBUDDY_UID` and `SCRIPTBUDDY_GATEWAY_TOKEN` when set.
    pub fn new() -> Self {
        Self {
            recognition_url: std::env::var(consts::RECOGNITION_URL_VAR)
                .unwrap_or_else(|_| consts::RECOGNITION_URL.to_string()),
            synthesis_url: std::env::var(consts::SYNTHESIS_URL_VAR)
                .unwrap_or_else(|_| consts::SYNTHESIS_URL.to_string()),
            uid: std::env::var(consts::UID_VAR).unwrap_or_else(|_| consts::DEFAULT_UID.to_string()),
            model: consts::DEFAULT_MODEL.to_string(),
            voice: consts::DEFAULT_VOICE.to_string(),
            encoding: consts::DEFAULT_ENCODING.to_string(),
            synthesis_rate: consts::DEFAULT_SYNTHESIS_RATE,
            // the gateway proxy authenticates; a token is only forwarded when configured
            token: std::env::var(consts::GATEWAY_TOKEN_VAR)
                .ok()
                .filter(|token| !token.is_empty())
                .map(SecretString::from),
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn recognition_url(&self) -> &str {
        &self.recognition_url
    }

    pub fn synthesis_url(&self) -> &str {
        &self.synthesis_url
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn synthesis_rate(&self) -> u32 {
        self.synthesis_rate
    }

    pub fn token(&self) -> Option<&SecretString> {
        self.token.as_ref()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
