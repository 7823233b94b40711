use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Role keys used by script lines. `Together` lines are performed jointly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum RoleKey {
    #[serde(rename = "甲", alias = "A", alias = "a")]
    Jia,
    #[serde(rename = "乙", alias = "B", alias = "b")]
    Yi,
    #[serde(rename = "合", alias = "together", alias = "Together")]
    Together,
}

impl RoleKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKey::Jia => "甲",
            RoleKey::Yi => "乙",
            RoleKey::Together => "合",
        }
    }

    pub fn is_together(&self) -> bool {
        matches!(self, RoleKey::Together)
    }
}

impl fmt::Display for RoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role key: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for RoleKey {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "甲" | "A" | "a" => Ok(RoleKey::Jia),
            "乙" | "B" | "b" => Ok(RoleKey::Yi),
            "合" | "together" | "Together" => Ok(RoleKey::Together),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum LineId {
    Number(i64),
    Text(String),
}

impl From<i64> for LineId {
    fn from(id: i64) -> Self {
        LineId::Number(id)
    }
}

impl From<&str> for LineId {
    fn from(id: &str) -> Self {
        LineId::Text(id.to_string())
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineId::Number(n) => write!(f, "{n}"),
            LineId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScriptLine {
    id: LineId,
    role: RoleKey,
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    emotion: Option<String>,
    /// Milliseconds.
    #[serde(default, rename = "duration", skip_serializing_if = "Option::is_none")]
    duration_hint: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sort: Option<i64>,
}

impl ScriptLine {
    pub fn new(id: impl Into<LineId>, role: RoleKey, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            emotion: None,
            duration_hint: None,
            sort: None,
        }
    }

    pub fn with_duration_hint(mut self, millis: u32) -> Self {
        self.duration_hint = Some(millis);
        self
    }

    pub fn id(&self) -> &LineId {
        &self.id
    }

    pub fn role(&self) -> RoleKey {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn emotion(&self) -> Option<&str> {
        self.emotion.as_deref()
    }

    pub fn duration_hint(&self) -> Option<u32> {
        self.duration_hint
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct ScriptMeta {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "roleMap")]
    role_map: BTreeMap<String, String>,
}

/// Wire shape of a script document: `{ meta: {..}, lines: [..] }`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ScriptSource {
    #[serde(default)]
    meta: ScriptMeta,
    #[serde(default)]
    lines: Vec<ScriptLine>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(from = "ScriptSource", into = "ScriptSource")]
pub struct ScriptDocument {
    title: String,
    description: String,
    role_names: BTreeMap<RoleKey, String>,
    lines: Vec<ScriptLine>,
}

impl From<ScriptSource> for ScriptDocument {
    fn from(source: ScriptSource) -> Self {
        let role_names = source
            .meta
            .role_map
            .into_iter()
            .filter_map(|(key, label)| key.parse::<RoleKey>().ok().map(|role| (role, label)))
            .collect();
        let mut lines = source.lines;
        // stable, so unsorted lines keep document order
        lines.sort_by_key(|line| line.sort);

        Self {
            title: source.meta.title,
            description: source.meta.description,
            role_names,
            lines,
        }
    }
}

impl From<ScriptDocument> for ScriptSource {
    fn from(doc: ScriptDocument) -> Self {
        Self {
            meta: ScriptMeta {
                title: doc.title,
                description: doc.description,
                role_map: doc
                    .role_names
                    .into_iter()
                    .map(|(role, label)| (role.to_string(), label))
                    .collect(),
            },
            lines: doc.lines,
        }
    }
}

impl ScriptDocument {
    pub fn new(title: impl Into<String>, lines: Vec<ScriptLine>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            role_names: BTreeMap::new(),
            lines,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn lines(&self) -> &[ScriptLine] {
        &self.lines
    }

    pub fn line(&self, index: usize) -> Option<&ScriptLine> {
        self.lines.get(index)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Display label for a role, falling back to the key itself.
    pub fn display_name(&self, role: RoleKey) -> &str {
        self.role_names
            .get(&role)
            .map(String::as_str)
            .unwrap_or(role.as_str())
    }

    /// Roles a user can pick: every non-together role with at least one line.
    pub fn selectable_roles(&self) -> Vec<RoleKey> {
        let mut roles: Vec<RoleKey> = self
            .lines
            .iter()
            .map(ScriptLine::role)
            .filter(|role| !role.is_together())
            .collect();
        roles.sort();
        roles.dedup();
        roles
    }
}
