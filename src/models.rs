use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/* ------------ rooms ------------ */
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Room {
    pub id:         String,
    pub code:       String,
    pub language:   Language,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pre-image of a room's buffer, written once per accepted update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub id:        i64,
    #[serde(skip)]
    pub room_id:   String,
    pub code:      String,
    pub timestamp: DateTime<Utc>,
    pub author:    Option<String>,
}

/* ------------ languages ------------ */
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Java,
    Cpp,
    Go,
    Other(String),
}

impl Language {
    pub fn as_str(&self) -> &str {
        match self {
            Language::Python     => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Java       => "java",
            Language::Cpp        => "cpp",
            Language::Go         => "go",
            Language::Other(s)   => s,
        }
    }

    /// Starter buffer for a freshly created room.
    pub fn template(&self) -> String {
        match self {
            Language::Python     => "# Write your Python code here\n\n".into(),
            Language::JavaScript => "// Write your JavaScript code here\n\n".into(),
            Language::TypeScript => "// Write your TypeScript code here\n\n".into(),
            Language::Java => "// Write your Java code here\n\npublic class Main {\n    public static void main(String[] args) {\n        \n    }\n}\n".into(),
            Language::Cpp => "// Write your C++ code here\n\n#include <iostream>\n\nint main() {\n    \n    return 0;\n}\n".into(),
            Language::Go => "// Write your Go code here\n\npackage main\n\nimport \"fmt\"\n\nfunc main() {\n    \n}\n".into(),
            Language::Other(name) => format!("// Write your {name} code here\n\n"),
        }
    }

    pub fn keywords(&self) -> &'static [&'static str] {
        const PY: &[&str] = &[
            "def", "class", "import", "from", "if", "elif", "else", "for", "while", "try",
            "except", "finally", "with", "return", "yield", "lambda", "pass", "break", "continue",
        ];
        const JS: &[&str] = &[
            "function", "const", "let", "var", "if", "else", "for", "while", "return", "async",
            "await", "try", "catch", "class", "extends", "import", "export", "default",
        ];
        const TS: &[&str] = &[
            "function", "const", "let", "var", "if", "else", "for", "while", "return", "async",
            "await", "try", "catch", "class", "extends", "import", "export", "default",
            "interface", "type", "enum", "public", "private",
        ];
        match self {
            Language::Python     => PY,
            Language::JavaScript => JS,
            Language::TypeScript => TS,
            _                    => &[],
        }
    }
}

impl From<&str> for Language {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "python" | "py"                => Language::Python,
            "javascript" | "js"            => Language::JavaScript,
            "typescript" | "ts"            => Language::TypeScript,
            "java"                         => Language::Java,
            "cpp" | "c++"                  => Language::Cpp,
            "go" | "golang"                => Language::Go,
            other                          => Language::Other(other.to_string()),
        }
    }
}

impl From<String> for Language {
    fn from(raw: String) -> Self { Language::from(raw.as_str()) }
}

impl From<Language> for String {
    fn from(lang: Language) -> Self {
        match lang {
            Language::Other(s) => s,
            known              => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}
