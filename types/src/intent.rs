use crate::script::RoleKey;

/// Control intents a rehearsing user can express by voice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    #[default]
    None,
    Stop,
    Restart,
    ChangeRole,
    ChangeLevel,
}

impl Intent {
    pub const LABELS: [&'static str; 5] =
        ["NONE", "STOP", "RESTART", "CHANGE_ROLE", "CHANGE_LEVEL"];

    pub fn label(&self) -> &'static str {
        match self {
            Intent::None => "NONE",
            Intent::Stop => "STOP",
            Intent::Restart => "RESTART",
            Intent::ChangeRole => "CHANGE_ROLE",
            Intent::ChangeLevel => "CHANGE_LEVEL",
        }
    }

    /// Maps a classifier reply to an intent. Anything unrecognized is `None`.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "STOP" => Intent::Stop,
            "RESTART" => Intent::Restart,
            "CHANGE_ROLE" => Intent::ChangeRole,
            "CHANGE_LEVEL" => Intent::ChangeLevel,
            _ => Intent::None,
        }
    }
}

/// What the classifier may know about the line being rehearsed.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IntentContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_role: Option<RoleKey>,
}

impl IntentContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_last_line(mut self, line: impl Into<String>) -> Self {
        self.last_line = Some(line.into());
        self
    }

    pub fn with_current_role(mut self, role: RoleKey) -> Self {
        self.current_role = Some(role);
        self
    }

    pub fn last_line(&self) -> Option<&str> {
        self.last_line.as_deref()
    }

    pub fn current_role(&self) -> Option<RoleKey> {
        self.current_role
    }
}
