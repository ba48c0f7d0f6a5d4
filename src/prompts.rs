//! The instructions we send to the model for each OCR stage.

use handlebars::{Handlebars, no_escape};
use schemars::JsonSchema;

use crate::{async_utils::io::read_json_or_toml, prelude::*};

/// The built-in prompts, used unless `--prompts` is given.
const DEFAULT_PROMPTS: &str = include_str!("prompts/default_prompts.toml");

/// Name of our registered structuring template.
const STRUCTURE_TEMPLATE: &str = "structure";

/// Prompt configuration, as read from a TOML or JSON file.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PromptConfig {
    /// Instruction sent alongside the image in the extraction stage.
    pub extract_instruction: String,

    /// Handlebars template for the structuring stage. `{{ocr_text}}` is
    /// replaced with the extracted text.
    pub structure_template: String,
}

/// Compiled prompts.
#[derive(Debug)]
pub struct Prompts {
    /// Instruction for the extraction stage.
    extract_instruction: String,

    /// Template registry holding the structuring template.
    templates: Handlebars<'static>,
}

impl Prompts {
    /// Compile a [`PromptConfig`].
    pub fn from_config(config: PromptConfig) -> Result<Self> {
        if config.extract_instruction.trim().is_empty() {
            return Err(anyhow!("extract_instruction must not be empty"));
        }

        let mut templates = Handlebars::new();
        // The OCR text is markdown, not HTML. It must reach the model untouched.
        templates.register_escape_fn(no_escape);
        templates.set_strict_mode(true);
        templates
            .register_template_string(STRUCTURE_TEMPLATE, &config.structure_template)
            .context("failed to parse structure_template")?;

        let prompts = Self {
            extract_instruction: config.extract_instruction,
            templates,
        };

        // Make sure the template actually uses the OCR text.
        let sentinel = "\u{0}ocr-text-sentinel\u{0}";
        if !prompts.render_structure_request(sentinel)?.contains(sentinel) {
            return Err(anyhow!("structure_template must include {{{{ocr_text}}}}"));
        }
        Ok(prompts)
    }

    /// The built-in prompts.
    pub fn builtin() -> Self {
        let config = toml::from_str::<PromptConfig>(DEFAULT_PROMPTS)
            .expect("failed to parse built-in prompts");
        Self::from_config(config).expect("failed to compile built-in prompts")
    }

    /// Load prompts from `path`, or use the built-in prompts.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let config = read_json_or_toml::<PromptConfig>(path).await?;
                Self::from_config(config)
                    .with_context(|| format!("invalid prompts in {:?}", path))
            }
            None => Ok(Self::builtin()),
        }
    }

    /// Instruction for the extraction stage.
    pub fn extract_instruction(&self) -> &str {
        &self.extract_instruction
    }

    /// Build the structuring stage's message around `ocr_text`.
    pub fn render_structure_request(&self, ocr_text: &str) -> Result<String> {
        self.templates
            .render(STRUCTURE_TEMPLATE, &json!({ "ocr_text": ocr_text }))
            .context("failed to render structure_template")
    }
}
