//! Prompt template loading and rendering
//!
//! Templates are plain text with `{placeholder}` variables drawn from the
//! group/image context plus the template's custom variables. Unknown
//! placeholders are left intact so prompt text that legitimately contains
//! braces survives rendering.

use std::path::Path;

use crate::error::{GeneratorError, GeneratorResult};
use crate::models::TemplateContext;

pub fn load_template(path: &Path) -> GeneratorResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        GeneratorError::template(format!("failed to read template {}: {}", path.display(), e))
    })
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute `{name}` placeholders from the context into the template.
pub fn render(template: &str, context: &TemplateContext) -> String {
    let mut rendered = template.to_string();

    let builtin = [
        ("group_index", context.group_index.to_string()),
        ("group_num", context.group_num.to_string()),
        ("image_index", context.image_index.to_string()),
        ("image_num", context.image_num.to_string()),
        ("total_groups", context.total_groups.to_string()),
        ("mode", context.mode.to_string()),
    ];
    for (name, value) in builtin {
        rendered = rendered.replace(&format!("{{{}}}", name), &value);
    }
    for (name, value) in &context.custom_vars {
        rendered = rendered.replace(&format!("{{{}}}", name), &render_value(value));
    }
    rendered
}

/// Strip trailing hashtag-only lines from generated copy.
///
/// Copy models tend to append their own `#tag #tag` footer; the user's
/// configured tags replace it, so the model's version is removed.
pub fn strip_trailing_tags(content: &str) -> String {
    let mut lines: Vec<&str> = content.trim_end().lines().collect();
    while let Some(last) = lines.last() {
        let trimmed = last.trim();
        if trimmed.starts_with('#') && is_tag_line(trimmed) {
            lines.pop();
        } else {
            break;
        }
    }
    lines.join("\n")
}

fn is_tag_line(line: &str) -> bool {
    line.split_whitespace()
        .all(|word| word.starts_with('#') && word.len() > 1)
}
