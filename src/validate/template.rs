//! Template safety and scope checks (T001–T003).
//!
//! Each template is parsed into a `ValueExpr` and then resolved against the
//! binding context visible at its location: workflow inputs, control
//! ancestors, and `item`/`index` inside fan-out nodes.

use std::collections::BTreeSet;

use crate::error::CompilerError;
use crate::ir::types::{TemplatePart, ValueExpr};
use crate::lower::CompileContext;
use crate::lower::reference::{TemplateIssue, resolve_field, resolve_operand, resolve_value_expr};
use crate::lower::typing::{TypeEnv, infer_type};
use crate::parse::types::{GraphNode, NodeBody};
use crate::registry::ValueType;

/// Which node ids a template may reference.
pub enum Visible<'s> {
    All,
    Nodes(&'s BTreeSet<String>),
}

pub struct Scope<'s> {
    pub visible: Visible<'s>,
    pub fan_out: bool,
}

impl Scope<'_> {
    fn sees(&self, node_id: &str) -> bool {
        match &self.visible {
            Visible::All => true,
            Visible::Nodes(ids) => ids.contains(node_id),
        }
    }
}

/// Resolve a parsed template in `scope`, returning the expression and its
/// static type.
pub fn check_expr(
    ctx: &CompileContext,
    parsed: Result<ValueExpr, TemplateIssue>,
    scope: &Scope,
    owner: Option<&str>,
    location: &str,
) -> Result<(ValueExpr, ValueType), CompilerError> {
    let owner_id = owner.map(str::to_string);
    let expr = parsed.map_err(|issue| {
        CompilerError::validate(
            issue.code(),
            format!("{}: {}", location, issue.message()),
            owner_id.clone(),
        )
    })?;

    for root in referenced_nodes(&expr) {
        if !ctx.node_ids.contains(root) {
            return Err(CompilerError::validate(
                "T003",
                format!("{}: undefined variable '{}'", location, root),
                owner_id,
            ));
        }
        if !scope.sees(root) {
            return Err(CompilerError::validate(
                "T003",
                format!(
                    "{}: '{}' is not an upstream node and is not in scope",
                    location, root
                ),
                owner_id,
            ));
        }
    }

    let env = TypeEnv {
        workflow_inputs: &ctx.doc.inputs,
        ports: &ctx.ports,
        fan_out: scope.fan_out,
    };
    let value_type = infer_type(&expr, &env).map_err(|reason| {
        CompilerError::validate("T003", format!("{}: {}", location, reason), owner_id.clone())
    })?;
    Ok((expr, value_type))
}

fn referenced_nodes(expr: &ValueExpr) -> Vec<&str> {
    match expr {
        ValueExpr::Binding(b) => vec![b.node_id.as_str()],
        ValueExpr::Template { parts } => parts
            .iter()
            .flat_map(|p| match p {
                TemplatePart::Expr { value } => referenced_nodes(value),
                TemplatePart::Lit { .. } => vec![],
            })
            .collect(),
        _ => vec![],
    }
}

/// Node inputs see workflow inputs, ancestors and, on fan-out nodes, the
/// current element.
pub fn input_scope<'s>(node: &GraphNode, ancestors: &'s BTreeSet<String>) -> Scope<'s> {
    Scope {
        visible: Visible::Nodes(ancestors),
        fan_out: node.is_fan_out(),
    }
}

/// Check every template in the document. Returns all errors found.
pub fn validate_templates(ctx: &CompileContext) -> Vec<CompilerError> {
    let mut errors = Vec::new();

    for node in ctx.unique_nodes() {
        let ancestors = ctx.ancestors(&node.id);
        let scope = input_scope(node, &ancestors);
        let owner = Some(node.id.as_str());

        for (port, template) in &node.inputs {
            let location = format!("Input '{}' of node '{}'", port, node.id);
            let parsed = resolve_value_expr(template, &ctx.node_ids);
            if let Err(e) = check_expr(ctx, parsed, &scope, owner, &location) {
                errors.push(e);
            }
        }

        if let NodeBody::Condition { conditions, .. } = &node.body {
            let scope = Scope {
                visible: Visible::Nodes(&ancestors),
                fan_out: false,
            };
            for (i, c) in conditions.iter().enumerate() {
                let location = format!("Condition {} of node '{}'", i, node.id);
                let parsed = resolve_field(&c.field, &ctx.node_ids);
                if let Err(e) = check_expr(ctx, parsed, &scope, owner, &location) {
                    errors.push(e);
                }
                if let Some(value) = &c.value {
                    let parsed = resolve_operand(value, &ctx.node_ids);
                    if let Err(e) = check_expr(ctx, parsed, &scope, owner, &location) {
                        errors.push(e);
                    }
                }
            }
        }

        if let Some(decl) = &node.compensation {
            let mut with_self = ancestors.clone();
            with_self.insert(node.id.clone());
            let scope = Scope {
                visible: Visible::Nodes(&with_self),
                fan_out: node.is_fan_out(),
            };
            for (port, template) in &decl.inputs {
                let location = format!("Compensation input '{}' of node '{}'", port, node.id);
                let parsed = resolve_value_expr(template, &ctx.node_ids);
                if let Err(e) = check_expr(ctx, parsed, &scope, owner, &location) {
                    errors.push(e);
                }
            }
        }
    }

    let scope = Scope {
        visible: Visible::All,
        fan_out: false,
    };
    for (name, template) in &ctx.doc.outputs {
        let location = format!("Workflow output '{}'", name);
        let parsed = resolve_value_expr(template, &ctx.node_ids);
        if let Err(e) = check_expr(ctx, parsed, &scope, None, &location) {
            errors.push(e);
        }
    }

    errors
}
