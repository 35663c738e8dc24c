//! Node builder: resolve one authored node into a `NodeIR`.

use std::collections::BTreeMap;

use crate::config::CompilerConfig;
use crate::error::CompilerError;
use crate::ir::types::*;
use crate::parse::types::{CompensationDecl, GraphNode, NodeBody};
use crate::registry::{PortSchema, Registry, Runtime, ValueType};

use super::context::CompileContext;
use super::reference::{resolve_field, resolve_operand, resolve_value_expr};

/// Task queue for nodes the orchestrator evaluates itself (conditions and
/// sub-workflow dispatch) when neither node nor config names one.
pub const ORCHESTRATOR_TASK_QUEUE: &str = "orchestrator";

/// Resolve runtime, task queue and timeout: node override, then the action
/// contract's default, then the compiler config.
pub fn resolve_execution(
    node: &GraphNode,
    registry: &Registry,
    config: &CompilerConfig,
) -> Result<ExecutionTarget, Vec<CompilerError>> {
    let contract = node.action_kind().and_then(|kind| registry.contract(kind));
    let orchestrated = node.action_kind().is_none();
    let node_id = Some(node.id.clone());

    let runtime = node
        .runtime
        .or(contract.and_then(|c| c.runtime))
        .or(config.default_runtime)
        .or(orchestrated.then_some(Runtime::Host));
    let task_queue = node
        .task_queue
        .clone()
        .or_else(|| contract.and_then(|c| c.task_queue.clone()))
        .or_else(|| config.default_task_queue.clone())
        .or_else(|| orchestrated.then(|| ORCHESTRATOR_TASK_QUEUE.to_string()));
    let timeout_ms = node
        .timeout_ms
        .or(contract.and_then(|c| c.timeout_ms))
        .unwrap_or(config.default_timeout_ms);

    let mut errors = Vec::new();
    if runtime.is_none() {
        errors.push(CompilerError::validate(
            "R005",
            format!(
                "Node '{}' has no runtime: set one on the node, its contract or the compiler config",
                node.id
            ),
            node_id.clone(),
        ));
    }
    if task_queue.is_none() {
        errors.push(CompilerError::validate(
            "R006",
            format!(
                "Node '{}' has no task queue: set one on the node, its contract or the compiler config",
                node.id
            ),
            node_id,
        ));
    }

    match (runtime, task_queue) {
        (Some(runtime), Some(task_queue)) => Ok(ExecutionTarget {
            runtime,
            task_queue,
            timeout_ms,
        }),
        _ => Err(errors),
    }
}

/// Build the IR node for `node`.
pub fn build_node(node: &GraphNode, ctx: &CompileContext) -> Result<NodeIR, Vec<CompilerError>> {
    let node_id = Some(node.id.clone());
    let missing = |what: &str| {
        vec![CompilerError::lower(
            "L002",
            format!("Node '{}' references unresolved {}", node.id, what),
            node_id.clone(),
        )]
    };

    let ports = ctx.ports_of(&node.id).ok_or_else(|| missing("contract"))?;
    let execution = resolve_execution(node, ctx.registry, ctx.config)?;

    let kind = match &node.body {
        NodeBody::Action { action } => NodeKind::Action {
            action: action.clone(),
        },
        NodeBody::Foreach {
            action,
            max_concurrency,
            success_policy,
        } => NodeKind::FanOut {
            mode: FanOutMode::Foreach,
            action: action.clone(),
            max_concurrency: *max_concurrency,
            success_policy: success_policy.unwrap_or_default(),
            element_outputs: element_outputs(action, ctx.registry),
        },
        NodeBody::Map {
            action,
            max_concurrency,
            success_policy,
        } => NodeKind::FanOut {
            mode: FanOutMode::Map,
            action: action.clone(),
            max_concurrency: Some(*max_concurrency),
            success_policy: success_policy.unwrap_or_default(),
            element_outputs: element_outputs(action, ctx.registry),
        },
        NodeBody::Retry {
            action,
            max_attempts,
            backoff,
        } => NodeKind::Retry {
            action: action.clone(),
            policy: RetryPolicy {
                max_attempts: *max_attempts,
                backoff: backoff.unwrap_or_default(),
            },
        },
        NodeBody::Condition {
            conditions,
            combine_with,
        } => {
            let mut lowered = Vec::with_capacity(conditions.len());
            for c in conditions {
                let operator = ComparisonOp::parse(&c.operator)
                    .ok_or_else(|| missing(&format!("operator '{}'", c.operator)))?;
                let field = resolve_field(&c.field, &ctx.node_ids)
                    .map_err(|e| template_error(node, e.message()))?;
                let value = match &c.value {
                    Some(v) => Some(
                        resolve_operand(v, &ctx.node_ids)
                            .map_err(|e| template_error(node, e.message()))?,
                    ),
                    None => None,
                };
                lowered.push(ConditionIR {
                    field,
                    operator,
                    value,
                });
            }
            NodeKind::Condition {
                conditions: lowered,
                combine_with: *combine_with,
            }
        }
        NodeBody::Subworkflow { workflow } => {
            let signature = ctx
                .registry
                .workflow(workflow)
                .ok_or_else(|| missing(&format!("workflow '{}'", workflow)))?;
            NodeKind::Subworkflow {
                workflow_id: workflow.clone(),
                input_contract: signature.inputs.clone(),
                output_contract: signature.outputs.clone(),
            }
        }
    };

    let inputs = build_inputs(node, &ports.inputs, ctx)?;

    let compensation = match &node.compensation {
        Some(decl) => Some(build_compensation(node, decl, ctx)?),
        None => None,
    };

    Ok(NodeIR {
        id: node.id.clone(),
        label: node.label().to_string(),
        kind,
        execution,
        params: node.params.clone(),
        inputs,
        outputs: ports.outputs.clone(),
        compensation,
    })
}

fn element_outputs(action: &str, registry: &Registry) -> Vec<PortSchema> {
    registry
        .contract(action)
        .map(|c| c.outputs.clone())
        .unwrap_or_default()
}

/// Data edges and input templates targeting `node`, one binding per port,
/// sorted by port name.
fn build_inputs(
    node: &GraphNode,
    declared: &[PortSchema],
    ctx: &CompileContext,
) -> Result<Vec<InputBinding>, Vec<CompilerError>> {
    let mut bindings: BTreeMap<String, ValueExpr> = BTreeMap::new();

    for edge in ctx.doc.data_edges.iter().filter(|e| e.target == node.id) {
        bindings.insert(
            edge.target_port.clone(),
            ValueExpr::binding(edge.source.clone(), edge.field_path()),
        );
    }
    for (port, template) in &node.inputs {
        let expr = resolve_value_expr(template, &ctx.node_ids)
            .map_err(|e| template_error(node, e.message()))?;
        bindings.insert(port.clone(), expr);
    }

    Ok(typed_bindings(bindings, declared))
}

fn build_compensation(
    node: &GraphNode,
    decl: &CompensationDecl,
    ctx: &CompileContext,
) -> Result<CompensationIR, Vec<CompilerError>> {
    let declared = ctx
        .registry
        .contract(&decl.action)
        .map(|c| c.inputs.clone())
        .unwrap_or_default();

    let mut bindings = BTreeMap::new();
    for (port, template) in &decl.inputs {
        let expr = resolve_value_expr(template, &ctx.node_ids)
            .map_err(|e| template_error(node, e.message()))?;
        bindings.insert(port.clone(), expr);
    }

    let timeout_ms = decl
        .timeout_ms
        .or(ctx.registry.contract(&decl.action).and_then(|c| c.timeout_ms))
        .unwrap_or(ctx.config.default_compensation_timeout_ms);

    Ok(CompensationIR {
        action: decl.action.clone(),
        params: decl.params.clone(),
        inputs: typed_bindings(bindings, &declared),
        timeout_ms,
    })
}

fn typed_bindings(
    bindings: BTreeMap<String, ValueExpr>,
    declared: &[PortSchema],
) -> Vec<InputBinding> {
    bindings
        .into_iter()
        .map(|(port, expr)| {
            let value_type = declared
                .iter()
                .find(|p| p.name == port)
                .map(|p| p.value_type.clone())
                .unwrap_or(ValueType::Any);
            InputBinding {
                port,
                value_type,
                expr,
            }
        })
        .collect()
}

fn template_error(node: &GraphNode, message: &str) -> Vec<CompilerError> {
    vec![CompilerError::lower(
        "L003",
        message.to_string(),
        Some(node.id.clone()),
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::types::NodeBody;
    use crate::registry::NodeContract;

    fn node(body: NodeBody) -> GraphNode {
        GraphNode {
            id: "n".into(),
            label: None,
            body,
            params: Default::default(),
            inputs: Default::default(),
            compensation: None,
            runtime: None,
            task_queue: None,
            timeout_ms: None,
        }
    }

    fn registry() -> Registry {
        Registry::default().with_contract(NodeContract {
            kind: "work".into(),
            runtime: Some(Runtime::Container),
            task_queue: Some("workers".into()),
            timeout_ms: Some(10),
            params: vec![],
            inputs: vec![],
            outputs: vec![],
        })
    }

    #[test]
    fn node_override_beats_contract() {
        let mut n = node(NodeBody::Action {
            action: "work".into(),
        });
        n.runtime = Some(Runtime::Host);
        let target = resolve_execution(&n, &registry(), &CompilerConfig::default()).unwrap();
        assert_eq!(target.runtime, Runtime::Host);
        assert_eq!(target.task_queue, "workers");
        assert_eq!(target.timeout_ms, 10);
    }

    #[test]
    fn config_is_the_last_fallback() {
        let registry = Registry::default().with_contract(NodeContract {
            kind: "bare".into(),
            runtime: None,
            task_queue: None,
            timeout_ms: None,
            params: vec![],
            inputs: vec![],
            outputs: vec![],
        });
        let n = node(NodeBody::Action {
            action: "bare".into(),
        });
        let errors = resolve_execution(&n, &registry, &CompilerConfig::default()).unwrap_err();
        let codes: Vec<&str> = errors.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, vec!["R005", "R006"]);

        let config = CompilerConfig {
            default_runtime: Some(Runtime::Host),
            default_task_queue: Some("general".into()),
            ..CompilerConfig::default()
        };
        let target = resolve_execution(&n, &registry, &config).unwrap();
        assert_eq!(target.task_queue, "general");
        assert_eq!(target.timeout_ms, config.default_timeout_ms);
    }

    #[test]
    fn condition_nodes_run_on_the_orchestrator() {
        let n = node(NodeBody::Condition {
            conditions: vec![],
            combine_with: Default::default(),
        });
        let target = resolve_execution(&n, &Registry::default(), &CompilerConfig::default()).unwrap();
        assert_eq!(target.runtime, Runtime::Host);
        assert_eq!(target.task_queue, ORCHESTRATOR_TASK_QUEUE);
    }
}
