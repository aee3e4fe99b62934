//! Prompt Templates
//!
//! Prompts are markdown templates keyed by their file stem (e.g. `system_prompt.md`
//! is the `"system_prompt"` template). Placeholders use the `{name}` syntax and are
//! substituted in a single pass, so substituted values are never expanded again.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

pub const SYSTEM_PROMPT: &str = "system_prompt";
pub const FORMAT_CORRECTION: &str = "format_correction";
pub const GENERATE_SIMILAR_EXERCISE: &str = "generate_similar_exercise";
pub const STRUCTURE_TRANSCRIPT: &str = "structure_transcript";

const BUILTIN: [(&str, &str); 4] = [
    (SYSTEM_PROMPT, include_str!("../prompts/system_prompt.md")),
    (FORMAT_CORRECTION, include_str!("../prompts/format_correction.md")),
    (
        GENERATE_SIMILAR_EXERCISE,
        include_str!("../prompts/generate_similar_exercise.md"),
    ),
    (
        STRUCTURE_TRANSCRIPT,
        include_str!("../prompts/structure_transcript.md"),
    ),
];

/// A named collection of prompt templates.
#[derive(Debug, Clone)]
pub struct PromptSet {
    templates: HashMap<String, String>,
}

impl PromptSet {
    /// The templates compiled into the crate.
    pub fn builtin() -> Self {
        Self {
            templates: BUILTIN
                .iter()
                .map(|(key, body)| (key.to_string(), body.to_string()))
                .collect(),
        }
    }

    /// Builds a set from an explicit map, e.g. for tests or custom deployments.
    pub fn from_map(templates: HashMap<String, String>) -> Self {
        Self { templates }
    }

    /// Loads `*.md` files from `dir` on top of the built-in templates.
    ///
    /// A missing directory is not an error: the built-in templates are used as-is.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut prompts = Self::builtin();
        if !dir.is_dir() {
            warn!(path = %dir.display(), "Prompts directory not found, using built-in prompts");
            return Ok(prompts);
        }
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
                let key = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .context("Could not get file stem")?
                    .to_string();
                let body = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read prompt '{}'", path.display()))?;
                info!(prompt = %key, "Loaded prompt override");
                prompts.templates.insert(key, body);
            }
        }
        Ok(prompts)
    }

    pub fn get(&self, key: &str) -> Result<&str> {
        self.templates
            .get(key)
            .map(String::as_str)
            .with_context(|| format!("Missing prompt template: '{}'", key))
    }

    /// Renders a template, replacing every `{name}` with its value.
    ///
    /// Braces that do not enclose a known name (e.g. JSON examples) are kept.
    pub fn render(&self, key: &str, vars: &[(&str, &str)]) -> Result<String> {
        let template = self.get(key)?;
        let mut rendered = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            rendered.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let value = after.find('}').and_then(|close| {
                let name = &after[..close];
                vars.iter()
                    .find(|(var, _)| *var == name)
                    .map(|(_, value)| (*value, close))
            });
            match value {
                Some((value, close)) => {
                    rendered.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    rendered.push('{');
                    rest = after;
                }
            }
        }
        rendered.push_str(rest);
        Ok(rendered)
    }
}

impl Default for PromptSet {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_contains_every_required_template() {
        let prompts = PromptSet::builtin();
        for key in [
            SYSTEM_PROMPT,
            FORMAT_CORRECTION,
            GENERATE_SIMILAR_EXERCISE,
            STRUCTURE_TRANSCRIPT,
        ] {
            assert!(prompts.get(key).is_ok(), "missing {key}");
        }
    }

    #[test]
    fn render_replaces_placeholders_and_keeps_json_braces() {
        let prompts = PromptSet::builtin();
        let rendered = prompts
            .render(
                GENERATE_SIMILAR_EXERCISE,
                &[("topic", "food"), ("target_language", "Italian"), ("examples", "EX")],
            )
            .unwrap();
        assert!(rendered.contains("\"food\""));
        assert!(rendered.contains("EX"));
        assert!(rendered.contains("{\"transcript\""));
        assert!(!rendered.contains("{topic}"));
    }

    #[test]
    fn system_prompt_tells_the_model_which_language_to_save() {
        let prompts = PromptSet::builtin();
        let rendered = prompts
            .render(
                SYSTEM_PROMPT,
                &[
                    ("topic", "food"),
                    ("difficulty", "easy"),
                    ("target_language", "Spanish"),
                    ("tool_descriptions", "save_exercise"),
                    ("expected_kind", "text_exercise"),
                    ("output_contract", "{}"),
                ],
            )
            .unwrap();
        assert!(rendered.contains("pass `Spanish` as its `target_language`"));
        assert!(!rendered.contains("{target_language}"));
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let prompts = PromptSet::from_map(HashMap::from([(
            "t".to_string(),
            "topic={topic} problem={problem} lang={target_language}".to_string(),
        )]));
        let rendered = prompts
            .render(
                "t",
                &[
                    ("topic", "{problem} and {target_language}"),
                    ("problem", "model said {\"kind\": \"{topic}\"}"),
                    ("target_language", "Italian"),
                ],
            )
            .unwrap();
        assert_eq!(
            rendered,
            "topic={problem} and {target_language} problem=model said {\"kind\": \"{topic}\"} \
             lang=Italian"
        );
    }

    #[test]
    fn unknown_and_unclosed_braces_are_kept() {
        let prompts = PromptSet::from_map(HashMap::from([(
            "t".to_string(),
            "{unknown} {{topic}} {topic".to_string(),
        )]));
        let rendered = prompts.render("t", &[("topic", "food")]).unwrap();
        assert_eq!(rendered, "{unknown} {food} {topic");
    }

    #[test]
    fn missing_template_is_an_error() {
        let prompts = PromptSet::from_map(HashMap::new());
        let err = prompts.get(SYSTEM_PROMPT).unwrap_err();
        assert!(err.to_string().contains("system_prompt"));
    }

    #[test]
    fn load_dir_overrides_builtin_templates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("format_correction.md"), "fix it: {problem}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let prompts = PromptSet::load_dir(dir.path()).unwrap();
        assert_eq!(
            prompts.render(FORMAT_CORRECTION, &[("problem", "bad")]).unwrap(),
            "fix it: bad"
        );
        assert!(prompts.get(SYSTEM_PROMPT).unwrap().contains("language teacher"));
        assert!(prompts.get("notes").is_err());
    }

    #[test]
    fn load_dir_falls_back_when_directory_is_missing() {
        let prompts = PromptSet::load_dir(Path::new("/definitely/not/here")).unwrap();
        assert!(prompts.get(SYSTEM_PROMPT).is_ok());
    }
}
