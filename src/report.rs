use anyhow::{Context, Result};
use serde_sarif::sarif::{
    Location, LogicalLocation, Message, MultiformatMessageString, ReportingDescriptor,
    Result as SarifResult, ResultLevel,
};

use linkgraph::graph::{CallGraph, MethodRef};

/// Metadata describing a reported result kind.
#[derive(Clone, Debug)]
pub(crate) struct RuleMetadata {
    pub(crate) id: &'static str,
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
}

pub(crate) const UNRESOLVED_METHOD: RuleMetadata = RuleMetadata {
    id: "UNRESOLVED_METHOD",
    name: "Unresolved method",
    description: "Invoked method whose declaration is not present in the input or classpath",
};

pub(crate) const CALL_EDGE: RuleMetadata = RuleMetadata {
    id: "CALL_EDGE",
    name: "Call edge",
    description: "Resolved call between two methods of a requested vertex",
};

pub(crate) fn rule_descriptors() -> Vec<ReportingDescriptor> {
    [UNRESOLVED_METHOD, CALL_EDGE]
        .iter()
        .map(|rule| {
            ReportingDescriptor::builder()
                .id(rule.id)
                .name(rule.name)
                .short_description(
                    MultiformatMessageString::builder()
                        .text(rule.description)
                        .build(),
                )
                .build()
        })
        .collect()
}

/// One result per call target the graph could not resolve.
pub(crate) fn unresolved_results(graph: &CallGraph) -> Vec<SarifResult> {
    graph
        .unresolved_declarations()
        .into_values()
        .flatten()
        .map(|reference| {
            SarifResult::builder()
                .rule_id(UNRESOLVED_METHOD.id)
                .level(ResultLevel::Warning)
                .message(result_message(format!("Unresolved call target: {reference}")))
                .locations(vec![method_location(&reference)])
                .build()
        })
        .collect()
}

/// One result per incoming and outgoing edge of `method`.
pub(crate) fn edge_results(graph: &CallGraph, method: &MethodRef) -> Result<Vec<SarifResult>> {
    let vertex = graph
        .find_vertex(method)
        .with_context(|| format!("method not found in call graph: {method}"))?;
    let outgoing = graph
        .calls_of(vertex.declaration())
        .into_iter()
        .map(|callee| edge_result(method, &callee));
    let incoming = graph
        .callers_of(vertex.declaration())
        .into_iter()
        .map(|caller| edge_result(&caller, method));
    Ok(outgoing.chain(incoming).collect())
}

fn edge_result(caller: &MethodRef, callee: &MethodRef) -> SarifResult {
    SarifResult::builder()
        .rule_id(CALL_EDGE.id)
        .level(ResultLevel::Note)
        .message(result_message(format!("{caller} calls {callee}")))
        .locations(vec![method_location(caller)])
        .related_locations(vec![method_location(callee)])
        .build()
}

pub(crate) fn method_location(reference: &MethodRef) -> Location {
    let logical = LogicalLocation::builder()
        .name(format!(
            "{}.{}{}",
            reference.owner, reference.name, reference.descriptor
        ))
        .kind("function")
        .build();
    Location::builder().logical_locations(vec![logical]).build()
}

pub(crate) fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use linkgraph::config::CallGraphConfig;
    use linkgraph::graph::ScanState;
    use linkgraph::ir::{
        CallKind, CallSite, Class, Instruction, InstructionKind, Method, MethodAccess,
    };
    use linkgraph::workspace::{Resource, Workspace};

    const STATIC: MethodAccess = MethodAccess {
        is_public: true,
        is_private: false,
        is_static: true,
        is_abstract: false,
    };

    fn calling(name: &str, owner: &str, callee: &str) -> Method {
        Method::new(name, "()V", STATIC).with_instructions(vec![Instruction {
            offset: 0,
            kind: InstructionKind::Invoke(CallSite {
                owner: owner.to_string(),
                name: callee.to_string(),
                descriptor: "()V".to_string(),
                kind: CallKind::Static,
                is_interface: false,
            }),
        }])
    }

    fn graph() -> Arc<CallGraph> {
        let primary = Resource::new("app");
        primary.insert_class(Class::new("App", None).with_methods(vec![
            calling("main", "App", "run"),
            calling("run", "Missing", "gone"),
        ]));
        let graph = CallGraph::new(Arc::new(Workspace::new(primary)), CallGraphConfig::default());
        graph.initialize().expect("start scan");
        assert_eq!(graph.wait_for_scan(), ScanState::Ready);
        graph
    }

    #[test]
    fn unresolved_targets_become_warnings() {
        let results = unresolved_results(&graph());
        let value = serde_json::to_value(&results).expect("serialize results");

        assert_eq!(results.len(), 1);
        assert_eq!(value[0]["ruleId"], "UNRESOLVED_METHOD");
        assert_eq!(value[0]["level"], "warning");
        assert_eq!(
            value[0]["locations"][0]["logicalLocations"][0]["name"],
            "Missing.gone()V"
        );
    }

    #[test]
    fn edges_are_reported_in_both_directions() {
        let graph = graph();
        let results =
            edge_results(&graph, &MethodRef::new("App", "run", "()V")).expect("edge results");
        let value = serde_json::to_value(&results).expect("serialize results");

        assert_eq!(results.len(), 1);
        assert_eq!(value[0]["ruleId"], "CALL_EDGE");
        assert_eq!(value[0]["message"]["text"], "App.main ()V calls App.run ()V");
        assert!(edge_results(&graph, &MethodRef::new("App", "absent", "()V")).is_err());
    }
}
