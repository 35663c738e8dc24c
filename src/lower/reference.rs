//! Parse `{{nodeId.field}}` strings into `ValueExpr`.
//!
//! Templates are interpolation only: a `{{…}}` holds a dotted reference path
//! and nothing else. Statement blocks, assignment, calls and filters are
//! rejected here so that every later phase sees references only.

use std::collections::HashSet;

use serde_json::Value;

use crate::ir::types::*;

/// Root of a workflow-input reference.
pub const INPUT_ROOT: &str = "input";
/// Root of the current fan-out element.
pub const ITEM_ROOT: &str = "item";
/// The current fan-out element index.
pub const INDEX_ROOT: &str = "index";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateIssue {
    /// A construct outside the interpolation language (T001).
    Forbidden(String),
    /// Unterminated or otherwise unparseable reference (T002).
    Malformed(String),
}

impl TemplateIssue {
    pub fn code(&self) -> &'static str {
        match self {
            TemplateIssue::Forbidden(_) => "T001",
            TemplateIssue::Malformed(_) => "T002",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            TemplateIssue::Forbidden(m) | TemplateIssue::Malformed(m) => m,
        }
    }
}

/// Parse a template string into a ValueExpr.
///
/// `node_ids` is the set of every node in the graph; a reference root is the
/// longest dotted prefix naming one of them, so ids containing `.` resolve.
pub fn resolve_value_expr(
    input: &str,
    node_ids: &HashSet<&str>,
) -> Result<ValueExpr, TemplateIssue> {
    if input.contains("{%") || input.contains("%}") {
        return Err(TemplateIssue::Forbidden(format!(
            "Statement blocks are not allowed in templates: '{}'",
            input
        )));
    }
    if input.contains("{#") {
        return Err(TemplateIssue::Forbidden(format!(
            "Comment blocks are not allowed in templates: '{}'",
            input
        )));
    }

    let trimmed = input.trim();

    // Pure reference: entire string is {{ref}}
    if trimmed.starts_with("{{") && trimmed.ends_with("}}") && trimmed.matches("{{").count() == 1 {
        let inner = &trimmed[2..trimmed.len() - 2];
        return parse_single_ref(inner, node_ids);
    }

    if !input.contains("{{") {
        if input.contains("}}") {
            return Err(TemplateIssue::Malformed(format!(
                "Unmatched '}}}}' in template '{}'",
                input
            )));
        }
        return Ok(ValueExpr::string(input));
    }

    let parts = parse_template_parts(input, node_ids)?;
    if let [TemplatePart::Lit { value }] = parts.as_slice() {
        return Ok(ValueExpr::string(value.as_str()));
    }
    Ok(ValueExpr::Template { parts })
}

/// A condition operand: template strings parse as references, every other
/// JSON value is a literal.
pub fn resolve_operand(value: &Value, node_ids: &HashSet<&str>) -> Result<ValueExpr, TemplateIssue> {
    match value {
        Value::String(s) if s.contains("{{") || s.contains("{%") => resolve_value_expr(s, node_ids),
        other => Ok(ValueExpr::literal(other.clone())),
    }
}

/// A condition field: either a template or a bare reference path.
pub fn resolve_field(field: &str, node_ids: &HashSet<&str>) -> Result<ValueExpr, TemplateIssue> {
    if field.contains("{{") || field.contains("{%") {
        resolve_value_expr(field, node_ids)
    } else {
        parse_single_ref(field, node_ids)
    }
}

fn parse_single_ref(inner: &str, node_ids: &HashSet<&str>) -> Result<ValueExpr, TemplateIssue> {
    let path = inner.trim();
    check_reference_syntax(path)?;

    let (root, rest) = split_ref(path);
    match root {
        INPUT_ROOT => Ok(ValueExpr::input(rest)),
        ITEM_ROOT => Ok(ValueExpr::item(rest)),
        INDEX_ROOT if rest.is_empty() => Ok(ValueExpr::Index),
        INDEX_ROOT => Err(TemplateIssue::Malformed(format!(
            "'{{{{index}}}}' has no fields: '{}'",
            path
        ))),
        _ => {
            let (node_id, field_path) = split_node_ref(path, node_ids);
            Ok(ValueExpr::binding(node_id, field_path))
        }
    }
}

fn check_reference_syntax(path: &str) -> Result<(), TemplateIssue> {
    if path.is_empty() {
        return Err(TemplateIssue::Malformed("Empty template reference '{{}}'".into()));
    }
    if path.contains('=') {
        return Err(TemplateIssue::Forbidden(format!(
            "Assignment is not allowed in templates: '{}'",
            path
        )));
    }
    if path.contains('(') || path.contains(')') {
        return Err(TemplateIssue::Forbidden(format!(
            "Calls are not allowed in templates: '{}'",
            path
        )));
    }
    if path.contains('|') {
        return Err(TemplateIssue::Forbidden(format!(
            "Filters are not allowed in templates: '{}'",
            path
        )));
    }
    let valid_segment =
        |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !path.split('.').all(valid_segment) {
        return Err(TemplateIssue::Malformed(format!(
            "Invalid reference path '{}'",
            path
        )));
    }
    Ok(())
}

fn split_ref(s: &str) -> (&str, &str) {
    match s.find('.') {
        Some(pos) => (&s[..pos], &s[pos + 1..]),
        None => (s, ""),
    }
}

/// Split on the longest prefix that names a node; falls back to the first
/// segment when nothing matches.
fn split_node_ref<'a>(path: &'a str, node_ids: &HashSet<&str>) -> (&'a str, &'a str) {
    let mut best = None;
    for (pos, _) in path.match_indices('.') {
        if node_ids.contains(&path[..pos]) {
            best = Some(pos);
        }
    }
    if node_ids.contains(path) {
        return (path, "");
    }
    match best {
        Some(pos) => (&path[..pos], &path[pos + 1..]),
        None => split_ref(path),
    }
}

fn parse_template_parts(
    input: &str,
    node_ids: &HashSet<&str>,
) -> Result<Vec<TemplatePart>, TemplateIssue> {
    let mut parts = Vec::new();
    let mut remaining = input;

    while let Some(start) = remaining.find("{{") {
        if start > 0 {
            parts.push(TemplatePart::Lit {
                value: remaining[..start].to_string(),
            });
        }

        let after_open = &remaining[start + 2..];
        match after_open.find("}}") {
            Some(end) => {
                let inner = &after_open[..end];
                if inner.contains("{{") {
                    return Err(TemplateIssue::Malformed(format!(
                        "Nested '{{{{' in template '{}'",
                        input
                    )));
                }
                let expr = parse_single_ref(inner, node_ids)?;
                parts.push(TemplatePart::Expr { value: expr });
                remaining = &after_open[end + 2..];
            }
            None => {
                return Err(TemplateIssue::Malformed(format!(
                    "Unterminated '{{{{' in template '{}'",
                    input
                )));
            }
        }
    }

    if remaining.contains("}}") {
        return Err(TemplateIssue::Malformed(format!(
            "Unmatched '}}}}' in template '{}'",
            input
        )));
    }
    if !remaining.is_empty() {
        parts.push(TemplatePart::Lit {
            value: remaining.to_string(),
        });
    }

    Ok(parts)
}
