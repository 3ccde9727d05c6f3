use regex::Regex;

use crate::models::Language;

#[derive(Clone, Debug, PartialEq)]
pub struct Suggestion {
    pub text: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub kind: &'static str,
}

#[derive(thiserror::Error, Debug)]
pub enum SuggestError {
    #[error("invalid completion pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Produces a completion for `code` at character offset `cursor`.
/// Callers guarantee `cursor <= code.chars().count()`.
pub trait Suggester: Send + Sync {
    fn suggest(&self, code: &str, cursor: usize, language: &Language) -> Result<Suggestion, SuggestError>;
}

enum Test {
    Pattern(Regex),
    /// Pattern on the line plus a predicate over everything before the cursor.
    PatternWith(Regex, fn(&str) -> bool),
    Line(fn(&str) -> bool),
}

struct Rule {
    test: Test,
    text: &'static str,
    confidence: f64,
    kind: &'static str,
}

impl Rule {
    fn matches(&self, line: &str, context: &str) -> bool {
        match &self.test {
            Test::Pattern(re)             => re.is_match(line),
            Test::PatternWith(re, extra)  => re.is_match(line) && extra(context),
            Test::Line(f)                 => f(line),
        }
    }
}

fn rule(test: Test, text: &'static str, confidence: f64, kind: &'static str) -> Rule {
    Rule { test, text, confidence, kind }
}

fn re(pattern: &str) -> Result<Regex, SuggestError> { Ok(Regex::new(pattern)?) }

pub struct RuleSuggester {
    python: Vec<Rule>,
    javascript: Vec<Rule>,
    generic: Vec<Rule>,
}

impl RuleSuggester {
    pub fn new() -> Result<Self, SuggestError> {
        let python = vec![
            rule(Test::Pattern(re(r"print\($")?), "'Hello, World!')", 0.85, "completion"),
            rule(Test::Pattern(re(r"def\s+\w+\([^)]*\):\s*$")?), "\n    \"\"\"Function description.\"\"\"", 0.80, "docstring"),
            rule(Test::Pattern(re(r"class\s+\w+.*:\s*$")?), "\n    def __init__(self):\n        pass", 0.82, "method"),
            rule(Test::Pattern(re(r"from\s+\w+\s+import\s+$")?), "typing import List, Dict, Optional", 0.75, "import"),
            rule(Test::Pattern(re(r"for\s+\w+\s+in\s+$")?), "range(10):\n        ", 0.78, "completion"),
            rule(Test::Pattern(re(r"if\s+.*:\s*$")?), "\n        pass", 0.70, "statement"),
            rule(
                Test::PatternWith(re(r"\s+return\s+$")?, |ctx| ctx.contains("def is_") || ctx.contains("def has_")),
                "True", 0.75, "boolean",
            ),
            rule(Test::Pattern(re(r"\s+return\s+$")?), "None", 0.70, "return_value"),
            rule(Test::Pattern(re(r"\[.*for\s+\w+\s+in\s+$")?), "items]", 0.73, "comprehension"),
            rule(Test::Line(|l| l.contains("= [") && l.ends_with('[')), "1, 2, 3]", 0.65, "list_literal"),
            rule(Test::Line(|l| l.contains("= {") && l.ends_with('{')), "'key': 'value'}", 0.65, "dict_literal"),
            rule(Test::Line(|l| l.contains(".append(") && l.ends_with('(')), "item)", 0.72, "method_arg"),
            rule(Test::Line(|l| l.contains(".join(") && l.ends_with('(')), "items)", 0.74, "method_arg"),
        ];

        let javascript = vec![
            rule(Test::Line(|l| l.contains("console.log(")), "'Hello, World!')", 0.85, "completion"),
            rule(Test::Line(|l| l.trim().ends_with("=>")), " {\n    \n}", 0.80, "arrow_function"),
            rule(Test::Line(|l| l.contains("const ") && l.ends_with("= ")), "[]", 0.70, "initialization"),
        ];

        let generic = vec![
            rule(Test::Line(|l| l.trim().ends_with('(')), ")", 0.60, "bracket_close"),
            rule(Test::Line(|l| l.trim().ends_with('[')), "]", 0.60, "bracket_close"),
            rule(Test::Line(|l| l.trim().ends_with('{')), "}", 0.60, "bracket_close"),
        ];

        Ok(Self { python, javascript, generic })
    }

    fn rules_for(&self, language: &Language) -> &[Rule] {
        match language {
            Language::Python     => &self.python[..],
            Language::JavaScript => &self.javascript[..],
            _                    => &[],
        }
    }
}

impl Suggester for RuleSuggester {
    fn suggest(&self, code: &str, cursor: usize, language: &Language) -> Result<Suggestion, SuggestError> {
        let context: String = code.chars().take(cursor).collect();
        let line = context.rsplit('\n').next().unwrap_or("");

        let hit = self
            .rules_for(language)
            .iter()
            .chain(&self.generic)
            .find(|r| r.matches(line, &context));

        let suggestion = match hit {
            Some(r) => Suggestion { text: r.text.to_string(), confidence: r.confidence, kind: r.kind },
            None => match complete_keyword(line, language) {
                Some(rest) => Suggestion { text: rest.to_string(), confidence: 0.55, kind: "keyword" },
                None => Suggestion { text: "# TODO: Implement".into(), confidence: 0.50, kind: "comment" },
            },
        };
        tracing::debug!(%language, cursor, kind = suggestion.kind, "suggestion generated");
        Ok(suggestion)
    }
}

/// Remainder of the first keyword that the word under the cursor starts.
fn complete_keyword(line: &str, language: &Language) -> Option<&'static str> {
    let start = line
        .char_indices()
        .rev()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
        .map_or(0, |(i, c)| i + c.len_utf8());
    let word = &line[start..];
    if word.chars().count() < 2 {
        return None;
    }
    language
        .keywords()
        .iter()
        .find(|kw| kw.len() > word.len() && kw.starts_with(word))
        .map(|kw| &kw[word.len()..])
}
