//! Prompt templates and rendering.
//!
//! Three templates ship inside the binary; `[prompts] dir` swaps all of them
//! for files on disk. Placeholders look like `{name}` and are substituted in
//! a single pass, so braces inside document text are never expanded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

const BUILTIN_CLASSIFY: &str = include_str!("../prompts/classify.txt");
const BUILTIN_CLASSIFY_FILE: &str = include_str!("../prompts/classify_file.txt");
const BUILTIN_SUMMARY: &str = include_str!("../prompts/summary.txt");

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt template not found: {}", .0.display())]
    Missing(PathBuf),
    #[error("cannot read prompt template {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct PromptTemplates {
    classify: String,
    classify_file: String,
    summary: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptTemplates {
    pub fn builtin() -> Self {
        Self {
            classify: BUILTIN_CLASSIFY.to_string(),
            classify_file: BUILTIN_CLASSIFY_FILE.to_string(),
            summary: BUILTIN_SUMMARY.to_string(),
        }
    }

    /// Load `classify.txt`, `classify_file.txt` and `summary.txt` from `dir`.
    /// Every file must exist.
    pub fn from_dir(dir: &Path) -> Result<Self, PromptError> {
        Ok(Self {
            classify: read_template(&dir.join("classify.txt"))?,
            classify_file: read_template(&dir.join("classify_file.txt"))?,
            summary: read_template(&dir.join("summary.txt"))?,
        })
    }

    /// Built-in templates unless a directory is configured.
    pub fn load(dir: Option<&Path>) -> Result<Self, PromptError> {
        match dir {
            Some(dir) => Self::from_dir(dir),
            None => Ok(Self::builtin()),
        }
    }

    /// Classification prompt. With a `file_reference` the file-reference
    /// template is used and `text`/`truncated` are ignored.
    pub fn build_classify_prompt(
        &self,
        filename: &str,
        file_extension: &str,
        text: &str,
        truncated: bool,
        file_reference: Option<&Path>,
    ) -> String {
        match file_reference {
            Some(path) => {
                let file_path = path.display().to_string();
                render(
                    &self.classify_file,
                    &[
                        ("filename", filename),
                        ("file_extension", file_extension),
                        ("file_path", &file_path),
                    ],
                )
            }
            None => render(
                &self.classify,
                &[
                    ("filename", filename),
                    ("file_extension", file_extension),
                    ("truncated", if truncated { "true" } else { "false" }),
                    ("extracted_text", text),
                ],
            ),
        }
    }

    pub fn build_summary_prompt(&self, filename: &str, text: &str) -> String {
        render(&self.summary, &[("filename", filename), ("text", text)])
    }
}

fn read_template(path: &Path) -> Result<String, PromptError> {
    if !path.is_file() {
        return Err(PromptError::Missing(path.to_path_buf()));
    }
    std::fs::read_to_string(path).map_err(|source| PromptError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Replace `{key}` tokens found in `template`. Anything else in braces
/// (JSON examples, unknown names) is copied through untouched.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let vars: HashMap<&str, &str> = vars.iter().copied().collect();
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let key = &after[..close];
            let is_ident = !key.is_empty()
                && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if is_ident {
                vars.get(key).map(|v| (*v, close))
            } else {
                None
            }
        });
        match value {
            Some((v, close)) => {
                out.push_str(v);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
