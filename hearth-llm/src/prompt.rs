//! Prompt catalog for the memory operations.
//!
//! The set of prompts is closed: every operation the memory subsystem can
//! ask a model about is a [`PromptOp`] variant, and each carries a fixed
//! placeholder set. Templates use `{name}` placeholders; `{{` and `}}`
//! produce literal braces.
//!
//! Built-in templates are compiled in. A directory of versioned TOML files
//! can override any of them (see [`PromptCatalog::from_directory`]).

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use tracing::debug;

use crate::error::{LlmError, Result};
use crate::types::{LlmRequest, LlmTier};

/// Importance ("poignancy") rating of a single memory (Tier 1).
pub const SCORE_MEMORY_IMPORTANCE: &str = "On the scale of 1 to 10, where 1 is purely mundane \
(e.g., brushing teeth, making bed) and 10 is extremely poignant (e.g., a break up, college \
acceptance), rate the likely poignancy of the following piece of memory. Respond with a single \
integer.\nMemory: {memory_content}\nRating: ";

/// The three most salient questions about recent observations (Tier 2).
pub const TOPICS_OF_REFLECTION: &str = "{observations}\n\n\
Given only the information above, what are the 3 most salient high-level questions we can \
answer about the subjects in the statements?\n\
Provide each question on a new line.";

/// Five novel insights on one reflection question (Tier 2).
pub const INSIGHTS_ON_TOPIC: &str = "Statements relevant to: '{topic}'\n\
---\n\
{related_statements}\n\
---\n\
What 5 high-level novel insights can you infer from the above statements that are relevant \
for answering the following question?\n\
Do not include any insights that are not relevant to the question.\n\
Do not repeat any insights that have already been made.\n\n\
Question: {topic}\n\n\
(example format: insight (because of 1, 5, 3))\n";

/// Identifies a prompt template by the memory operation that uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptOp {
    /// Rate the poignancy of one memory.
    ScoreMemoryImportance,
    /// Derive reflection questions from recent memories.
    TopicsOfReflection,
    /// Infer insights on one reflection question.
    InsightsOnTopic,
}

impl PromptOp {
    /// All operations.
    #[must_use]
    pub fn all() -> &'static [PromptOp] {
        &[
            Self::ScoreMemoryImportance,
            Self::TopicsOfReflection,
            Self::InsightsOnTopic,
        ]
    }

    /// Operation name used in catalogs and logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ScoreMemoryImportance => "_score_memory_importance",
            Self::TopicsOfReflection => "_get_topics_of_reflection",
            Self::InsightsOnTopic => "_get_insights_on_topic",
        }
    }

    /// The TOML filename (without path) that overrides this template.
    #[must_use]
    pub fn filename(self) -> &'static str {
        match self {
            Self::ScoreMemoryImportance => "score_memory_importance.toml",
            Self::TopicsOfReflection => "topics_of_reflection.toml",
            Self::InsightsOnTopic => "insights_on_topic.toml",
        }
    }

    /// The placeholders this operation's template may reference.
    #[must_use]
    pub fn placeholders(self) -> &'static [&'static str] {
        match self {
            Self::ScoreMemoryImportance => &["memory_content"],
            Self::TopicsOfReflection => &["observations"],
            Self::InsightsOnTopic => &["topic", "related_statements"],
        }
    }

    fn builtin(self) -> PromptTemplate {
        match self {
            Self::ScoreMemoryImportance => PromptTemplate {
                version: "builtin".into(),
                tier: LlmTier::SmallLocal,
                max_tokens: 16,
                temperature: 0.2,
                template: SCORE_MEMORY_IMPORTANCE.into(),
            },
            Self::TopicsOfReflection => PromptTemplate {
                version: "builtin".into(),
                tier: LlmTier::LargeModel,
                max_tokens: 200,
                temperature: 0.7,
                template: TOPICS_OF_REFLECTION.into(),
            },
            Self::InsightsOnTopic => PromptTemplate {
                version: "builtin".into(),
                tier: LlmTier::LargeModel,
                max_tokens: 400,
                temperature: 0.7,
                template: INSIGHTS_ON_TOPIC.into(),
            },
        }
    }
}

impl fmt::Display for PromptOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PromptOp {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|op| op.name() == s)
            .ok_or_else(|| LlmError::UnknownOperation(s.to_string()))
    }
}

/// A template segment produced by [`parse_template`].
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Brace(char),
    Placeholder(&'a str),
}

/// Split a template into literal text, escaped braces and placeholders.
/// An unterminated `{` is kept as literal text.
fn parse_template(template: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let bytes = template.as_bytes();
    let mut i = 0;
    let mut text_start = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'{' | b'}' if bytes.get(i + 1) == Some(&bytes[i]) => {
                if text_start < i {
                    segments.push(Segment::Text(&template[text_start..i]));
                }
                segments.push(Segment::Brace(char::from(bytes[i])));
                i += 2;
                text_start = i;
            }
            b'{' => match template[i + 1..].find('}') {
                Some(len) => {
                    if text_start < i {
                        segments.push(Segment::Text(&template[text_start..i]));
                    }
                    segments.push(Segment::Placeholder(&template[i + 1..i + 1 + len]));
                    i += len + 2;
                    text_start = i;
                }
                None => break,
            },
            _ => i += 1,
        }
    }
    if text_start < template.len() {
        segments.push(Segment::Text(&template[text_start..]));
    }
    segments
}

/// Render `template`, substituting every `{name}` from `vars`.
///
/// # Errors
///
/// Returns [`LlmError::MissingVariable`] naming `operation` if a placeholder
/// has no binding.
pub fn render_template(operation: &str, template: &str, vars: &[(&str, &str)]) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    for segment in parse_template(template) {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Brace(c) => out.push(c),
            Segment::Placeholder(name) => {
                let value = vars
                    .iter()
                    .find_map(|(key, value)| (*key == name).then_some(*value))
                    .ok_or_else(|| LlmError::MissingVariable {
                        operation: operation.to_string(),
                        variable: name.to_string(),
                    })?;
                out.push_str(value);
            }
        }
    }
    Ok(out)
}

/// Inner `[prompt]` section of a TOML override file.
#[derive(Debug, Clone, Deserialize)]
struct TomlPromptFile {
    prompt: TomlPromptData,
}

#[derive(Debug, Clone, Deserialize)]
struct TomlPromptData {
    version: String,
    tier: u8,
    max_tokens: u32,
    temperature: f32,
    template: String,
}

/// A loaded, ready-to-render prompt template.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    /// Prompt version string (e.g., "1.0").
    pub version: String,
    /// Model tier the rendered prompt is sent to.
    pub tier: LlmTier,
    /// Maximum output tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Template text with `{key}` placeholders.
    pub template: String,
}

impl PromptTemplate {
    /// Placeholder names referenced by the template, in order of appearance.
    #[must_use]
    pub fn placeholders(&self) -> Vec<&str> {
        parse_template(&self.template)
            .into_iter()
            .filter_map(|s| match s {
                Segment::Placeholder(name) => Some(name),
                _ => None,
            })
            .collect()
    }
}

/// Immutable mapping from [`PromptOp`] to its template.
///
/// # Example
///
/// ```
/// use hearth_llm::prompt::{PromptCatalog, PromptOp};
///
/// let catalog = PromptCatalog::builtin();
/// let prompt = catalog
///     .render(PromptOp::ScoreMemoryImportance, &[("memory_content", "I saw a wolf")])
///     .unwrap();
/// assert!(prompt.ends_with("Memory: I saw a wolf\nRating: "));
/// ```
#[derive(Debug, Clone)]
pub struct PromptCatalog {
    templates: HashMap<PromptOp, PromptTemplate>,
}

impl Default for PromptCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptCatalog {
    /// Catalog of the compiled-in templates.
    #[must_use]
    pub fn builtin() -> Self {
        let templates = PromptOp::all()
            .iter()
            .map(|op| (*op, op.builtin()))
            .collect();
        Self { templates }
    }

    /// Built-in templates overlaid with the TOML files found in `dir`.
    ///
    /// Each file must be named after [`PromptOp::filename`] and hold a
    /// `[prompt]` table with `version`, `tier` (1 or 2), `max_tokens`,
    /// `temperature` and `template`. Unknown files are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ConfigError`] if `dir` is not a directory, a file
    /// cannot be read or parsed, the tier is unknown, or the template
    /// references a placeholder outside the operation's fixed set.
    pub fn from_directory(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(LlmError::ConfigError(format!(
                "prompt directory not found: {}",
                dir.display()
            )));
        }

        let mut catalog = Self::builtin();
        for op in PromptOp::all() {
            let path = dir.join(op.filename());
            if !path.exists() {
                continue;
            }
            let content = std::fs::read_to_string(&path).map_err(|e| {
                LlmError::ConfigError(format!("failed to read {}: {e}", path.display()))
            })?;
            let parsed: TomlPromptFile = toml::from_str(&content).map_err(|e| {
                LlmError::ConfigError(format!("failed to parse {}: {e}", path.display()))
            })?;

            let d = parsed.prompt;
            let tier = match d.tier {
                1 => LlmTier::SmallLocal,
                2 => LlmTier::LargeModel,
                other => {
                    return Err(LlmError::ConfigError(format!(
                        "{}: unsupported tier {other}",
                        path.display()
                    )));
                }
            };
            let template = PromptTemplate {
                version: d.version,
                tier,
                max_tokens: d.max_tokens,
                temperature: d.temperature,
                template: d.template,
            };
            if let Some(unknown) = template
                .placeholders()
                .into_iter()
                .find(|p| !op.placeholders().contains(p))
            {
                return Err(LlmError::ConfigError(format!(
                    "{}: placeholder '{{{unknown}}}' is not bound by {op}",
                    path.display()
                )));
            }

            debug!(op = %op, version = %template.version, "prompt override loaded");
            catalog.templates.insert(*op, template);
        }

        Ok(catalog)
    }

    /// Template for an operation.
    #[must_use]
    pub fn get(&self, op: PromptOp) -> Option<&PromptTemplate> {
        self.templates.get(&op)
    }

    fn template(&self, op: PromptOp) -> Result<&PromptTemplate> {
        self.get(op)
            .ok_or_else(|| LlmError::UnknownOperation(op.name().to_string()))
    }

    /// Render an operation's template.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::MissingVariable`] if a referenced placeholder is
    /// absent from `vars`.
    pub fn render(&self, op: PromptOp, vars: &[(&str, &str)]) -> Result<String> {
        render_template(op.name(), &self.template(op)?.template, vars)
    }

    /// Render a template looked up by operation name.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::UnknownOperation`] for names outside the catalog,
    /// otherwise as [`PromptCatalog::render`].
    pub fn render_named(&self, name: &str, vars: &[(&str, &str)]) -> Result<String> {
        self.render(name.parse()?, vars)
    }

    /// Render an operation into a request carrying the template's tier and
    /// sampling settings.
    ///
    /// # Errors
    ///
    /// As [`PromptCatalog::render`].
    pub fn request(&self, op: PromptOp, vars: &[(&str, &str)]) -> Result<LlmRequest> {
        let template = self.template(op)?;
        let prompt = render_template(op.name(), &template.template, vars)?;
        let base = match template.tier {
            LlmTier::SmallLocal => LlmRequest::tier1(prompt),
            LlmTier::LargeModel => LlmRequest::tier2(prompt),
        };
        Ok(LlmRequest {
            max_tokens: template.max_tokens,
            temperature: template.temperature,
            ..base
        })
    }

    /// Number of loaded templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether no templates are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_rendering_works() {
        let rendered = render_template(
            "greeting",
            "Hello {name}, you are a {role}.",
            &[("name", "Villager 0"), ("role", "herbalist")],
        )
        .expect("render");
        assert_eq!(rendered, "Hello Villager 0, you are a herbalist.");
    }

    #[test]
    fn missing_variable_is_an_error() {
        let err = render_template("greeting", "Hello {name}, {unknown}.", &[("name", "Ana")])
            .expect_err("unbound placeholder");
        match err {
            LlmError::MissingVariable { operation, variable } => {
                assert_eq!(operation, "greeting");
                assert_eq!(variable, "unknown");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn doubled_braces_are_literal() {
        let rendered =
            render_template("json", "{{\"rating\": {n}}}", &[("n", "7")]).expect("render");
        assert_eq!(rendered, "{\"rating\": 7}");
    }

    #[test]
    fn unterminated_brace_is_kept() {
        let rendered = render_template("odd", "value {x} and {oops", &[("x", "1")]).expect("render");
        assert_eq!(rendered, "value 1 and {oops");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let rendered = render_template("t", "{a}", &[("a", "{b}")]).expect("render");
        assert_eq!(rendered, "{b}");
    }

    #[test]
    fn prompt_op_from_str_round_trip() {
        for op in PromptOp::all() {
            let parsed: PromptOp = op.to_string().parse().expect("should parse");
            assert_eq!(*op, parsed);
        }
    }

    #[test]
    fn unknown_operation_name() {
        let catalog = PromptCatalog::builtin();
        let err = catalog
            .render_named("_compute_agent_summary", &[])
            .expect_err("not in catalog");
        assert!(matches!(err, LlmError::UnknownOperation(name) if name == "_compute_agent_summary"));
    }

    #[test]
    fn builtin_placeholders_match_fixed_sets() {
        let catalog = PromptCatalog::builtin();
        assert_eq!(catalog.len(), PromptOp::all().len());
        for op in PromptOp::all() {
            let template = catalog.get(*op).expect("builtin");
            for placeholder in template.placeholders() {
                assert!(op.placeholders().contains(&placeholder), "{op}: {placeholder}");
            }
        }
    }

    #[test]
    fn request_uses_template_tier() {
        let catalog = PromptCatalog::builtin();
        let scoring = catalog
            .request(PromptOp::ScoreMemoryImportance, &[("memory_content", "x")])
            .expect("request");
        assert_eq!(scoring.tier, LlmTier::SmallLocal);
        assert_eq!(scoring.max_tokens, 16);

        let topics = catalog
            .request(PromptOp::TopicsOfReflection, &[("observations", "x")])
            .expect("request");
        assert_eq!(topics.tier, LlmTier::LargeModel);
    }

    #[test]
    fn from_directory_overrides_builtin() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("score_memory_importance.toml"),
            r#"
[prompt]
version = "2.0"
tier = 1
max_tokens = 4
temperature = 0.0
template = "Rate 1-10: {memory_content}"
"#,
        )
        .expect("write");

        let catalog = PromptCatalog::from_directory(dir.path()).expect("load");
        let template = catalog.get(PromptOp::ScoreMemoryImportance).expect("loaded");
        assert_eq!(template.version, "2.0");
        assert_eq!(
            catalog
                .render(PromptOp::ScoreMemoryImportance, &[("memory_content", "a wolf")])
                .expect("render"),
            "Rate 1-10: a wolf"
        );
        // Untouched operations keep the built-in text.
        assert_eq!(
            catalog.get(PromptOp::InsightsOnTopic).expect("builtin").version,
            "builtin"
        );
    }

    #[test]
    fn from_directory_rejects_foreign_placeholders() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("topics_of_reflection.toml"),
            r#"
[prompt]
version = "1.1"
tier = 2
max_tokens = 100
temperature = 0.5
template = "{observations} about {agent_name}"
"#,
        )
        .expect("write");

        assert!(matches!(
            PromptCatalog::from_directory(dir.path()),
            Err(LlmError::ConfigError(_))
        ));
    }

    #[test]
    fn from_directory_errors_on_missing_dir() {
        let result = PromptCatalog::from_directory("/tmp/nonexistent_hearth_prompts_dir");
        assert!(result.is_err());
    }
}
