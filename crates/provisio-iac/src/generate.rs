//! IaC generation over a black-box text generator.
//!
//! The generator is asked for code only; anything it wraps in Markdown fences
//! is stripped before the result is versioned. Architecture synthesis asks
//! for JSON and tolerates malformed replies by falling back to an empty
//! document that keeps the raw text.

use std::sync::Arc;

use async_trait::async_trait;
use provisio_core::{IacTool, Provenance, ProvisioError, ProvisioResult};
use provisio_state::IacVersion;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::resolver::DesignResolver;
use crate::versions::VersionStore;

/// A text-generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Complete `prompt` under `system` instructions.
    async fn complete(&self, system: &str, prompt: &str) -> ProvisioResult<String>;
}

/// One architecture component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default = "one")]
    pub count: u32,
    #[serde(default)]
    pub description: String,
}

fn one() -> u32 {
    1
}

/// Structured architecture produced by synthesis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureDoc {
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub networking: serde_json::Value,
    #[serde(default)]
    pub storage: serde_json::Value,
    #[serde(default)]
    pub monitoring: serde_json::Value,
    /// Generator output kept verbatim when it could not be parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl ArchitectureDoc {
    /// Parse a generator reply; malformed JSON yields the default document
    /// with `raw_response` set.
    pub fn from_response(text: &str) -> Self {
        let candidate = extract_json(text);
        match serde_json::from_str::<ArchitectureDoc>(candidate) {
            Ok(mut doc) => {
                doc.raw_response = None;
                doc
            }
            Err(e) => {
                warn!(error = %e, "architecture reply was not valid JSON, using default");
                ArchitectureDoc {
                    networking: serde_json::json!({}),
                    storage: serde_json::json!({}),
                    monitoring: serde_json::json!({}),
                    raw_response: Some(text.to_string()),
                    ..ArchitectureDoc::default()
                }
            }
        }
    }
}

/// Remove Markdown code fences (with or without a language tag).
pub fn strip_code_fences(text: &str) -> ProvisioResult<String> {
    if !text.contains("```") {
        return Ok(text.to_string());
    }
    let fence = Regex::new(r"```[A-Za-z0-9_+-]*[ \t]*\r?\n?")
        .map_err(|e| ProvisioError::Generation(e.to_string()))?;
    Ok(fence.replace_all(text, "").trim().to_string())
}

/// The JSON payload of a reply: the first fenced block if there is one,
/// otherwise the outermost `{ ... }` span, otherwise the whole text.
fn extract_json(text: &str) -> &str {
    let fenced = Regex::new(r"(?s)```(?:json)?\s*\n(.*?)```")
        .ok()
        .and_then(|re| re.captures(text))
        .and_then(|c| c.get(1));
    if let Some(body) = fenced {
        return body.as_str().trim();
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text.trim(),
    }
}

/// Generates and modifies IaC versions through a [`TextGenerator`].
pub struct CodeGenerator {
    designs: Arc<dyn DesignResolver>,
    generator: Arc<dyn TextGenerator>,
    versions: Arc<VersionStore>,
}

impl CodeGenerator {
    pub fn new(
        designs: Arc<dyn DesignResolver>,
        generator: Arc<dyn TextGenerator>,
        versions: Arc<VersionStore>,
    ) -> Self {
        Self {
            designs,
            generator,
            versions,
        }
    }

    /// Generate `tool` source for a design and store it as the new current version.
    pub async fn generate(&self, design_id: &str, tool: IacTool) -> ProvisioResult<IacVersion> {
        let design = self
            .designs
            .get_design(design_id)?
            .ok_or_else(|| ProvisioError::not_found("design", design_id))?;

        let architecture = serde_json::to_string_pretty(&design.architecture)
            .map_err(|e| ProvisioError::Generation(e.to_string()))?;
        let system = format!(
            "You are a {tool} expert. Write {tool} code for the given infrastructure architecture. \
             Reply with code only, no explanations and no Markdown code blocks."
        );
        let prompt = format!(
            "Infrastructure architecture:\n{architecture}\n\nProvider: {}\nDesign type: {}\n\n\
             Write {tool} code for this architecture. Reply with code only.",
            design.provider.as_deref().unwrap_or("aws"),
            design.design_type.as_str(),
        );

        debug!(design = %design_id, %tool, "requesting generated code");
        let reply = self.generator.complete(&system, &prompt).await?;
        let source = strip_code_fences(&reply)?;
        let version = self
            .versions
            .create(design_id, tool, &source, Provenance::System)
            .await?;
        info!(design = %design_id, %tool, version = version.version, "generated iac version");
        Ok(version)
    }

    /// Rewrite an existing version according to `instruction` and store the
    /// result as a new current version with `user_prompt` provenance.
    pub async fn modify_with_prompt(
        &self,
        version_id: &str,
        instruction: &str,
    ) -> ProvisioResult<IacVersion> {
        let base = self.versions.get(version_id)?;
        if self.designs.get_design(&base.design_id)?.is_none() {
            return Err(ProvisioError::not_found("design", base.design_id));
        }

        let tool = base.tool;
        let system = format!(
            "You are a {tool} expert. Modify the existing code as requested. \
             Reply with code only, no explanations and no Markdown code blocks."
        );
        let prompt = format!(
            "Existing code:\n{}\n\nRequested change:\n{instruction}\n\n\
             Apply the requested change. Reply with code only.",
            base.source
        );

        debug!(version = %version_id, %tool, "requesting modified code");
        let reply = self.generator.complete(&system, &prompt).await?;
        let source = strip_code_fences(&reply)?;
        let version = self
            .versions
            .create(&base.design_id, tool, &source, Provenance::UserPrompt)
            .await?;
        info!(
            design = %base.design_id,
            from = base.version,
            to = version.version,
            "modified iac version"
        );
        Ok(version)
    }

    /// Ask for a structured architecture for `requirements`.
    ///
    /// Only a generator failure is an error; an unparseable reply becomes
    /// the default document plus `raw_response`.
    pub async fn synthesize_architecture(&self, requirements: &str) -> ProvisioResult<ArchitectureDoc> {
        let system = "You are an infrastructure architect. Reply with a single JSON object with keys \
                      `components` (list of {name, type, spec, count, description}), \
                      `networking`, `storage` and `monitoring`.";
        let reply = self.generator.complete(system, requirements).await?;
        Ok(ArchitectureDoc::from_response(&reply))
    }
}
