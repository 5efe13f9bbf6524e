// src/graph.rs
//! Computation graph model handed to the engine.
//!
//! Two encodings reach the gateway: the engine's API-native id -> node map, and the
//! document its UI editor saves (a top-level `nodes` array). The encoding is decided
//! once in [`Workflow::from_value`]; everything downstream matches on the variant.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use thiserror::Error;

/// Operations that write a savable image or video
pub const ARTIFACT_SINK_OPERATIONS: &[&str] = &[
    "SaveImage",
    "SaveAnimatedWEBP",
    "SaveAnimatedPNG",
    "SaveVideo",
    "SaveWEBM",
    "VHS_VideoCombine",
];

/// Prefix the engine uses when a sink node does not set one
pub const DEFAULT_OUTPUT_PREFIX: &str = "ComfyUI";

pub fn is_artifact_sink(operation: &str) -> bool {
    ARTIFACT_SINK_OPERATIONS.contains(&operation)
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("graph has no nodes")]
    Empty,
    #[error("node '{node}' input '{input}' links to missing node '{target}'")]
    DanglingLink {
        node: String,
        input: String,
        target: String,
    },
    #[error("graph has no artifact sink node (expected one of {})", ARTIFACT_SINK_OPERATIONS.join(", "))]
    NoArtifactSink,
    #[error("malformed graph document: {0}")]
    Malformed(String),
}

/// Reference to another node's output: `[node_id, output_index]` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeLink(pub String, pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Link(NodeLink),
    Literal(Value),
}

impl ParamValue {
    pub fn as_link(&self) -> Option<&NodeLink> {
        match self {
            ParamValue::Link(link) => Some(link),
            ParamValue::Literal(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Literal(value) => value.as_str(),
            ParamValue::Link(_) => None,
        }
    }
}

/// Always serialized in the engine's wire shape (`class_type` + `inputs`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGraphNode")]
pub struct GraphNode {
    #[serde(rename = "class_type")]
    pub operation: String,
    #[serde(rename = "inputs")]
    pub parameters: BTreeMap<String, ParamValue>,
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Accepted node shapes: parameters nested under `inputs`/`parameters`, written inline
/// next to the operation, or both
#[derive(Deserialize)]
struct RawGraphNode {
    #[serde(rename = "class_type", alias = "op", alias = "operation")]
    operation: String,
    #[serde(rename = "inputs", alias = "parameters", default)]
    parameters: BTreeMap<String, ParamValue>,
    #[serde(rename = "_meta", default)]
    meta: Option<Value>,
    #[serde(flatten)]
    inline: BTreeMap<String, ParamValue>,
}

impl TryFrom<RawGraphNode> for GraphNode {
    type Error = String;

    fn try_from(raw: RawGraphNode) -> Result<Self, Self::Error> {
        let mut parameters = raw.parameters;
        for (name, value) in raw.inline {
            if parameters.contains_key(&name) {
                return Err(format!(
                    "parameter '{}' of '{}' is given both inline and under inputs",
                    name, raw.operation
                ));
            }
            parameters.insert(name, value);
        }

        Ok(Self {
            operation: raw.operation,
            parameters,
            meta: raw.meta,
        })
    }
}

impl GraphNode {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            parameters: BTreeMap::new(),
            meta: None,
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters
            .insert(name.into(), ParamValue::Literal(value.into()));
        self
    }

    pub fn with_link(mut self, name: impl Into<String>, node_id: impl Into<String>, output_index: u32) -> Self {
        self.parameters.insert(
            name.into(),
            ParamValue::Link(NodeLink(node_id.into(), output_index)),
        );
        self
    }

    pub fn is_artifact_sink(&self) -> bool {
        is_artifact_sink(&self.operation)
    }
}

/// API-native graph: node id -> node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComputationGraph {
    nodes: BTreeMap<String, GraphNode>,
}

impl ComputationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, id: impl Into<String>, node: GraphNode) -> Self {
        self.nodes.insert(id.into(), node);
        self
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in graph order (numeric ids compare numerically)
    pub fn ordered_nodes(&self) -> Vec<(&str, &GraphNode)> {
        let mut nodes: Vec<(&str, &GraphNode)> =
            self.nodes.iter().map(|(id, node)| (id.as_str(), node)).collect();
        nodes.sort_by(|(a, _), (b, _)| compare_node_ids(a, b));
        nodes
    }

    pub fn sink_nodes(&self) -> Vec<(&str, &GraphNode)> {
        self.ordered_nodes()
            .into_iter()
            .filter(|(_, node)| node.is_artifact_sink())
            .collect()
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::Empty);
        }

        for (id, node) in self.ordered_nodes() {
            for (input, value) in &node.parameters {
                if let Some(NodeLink(target, _)) = value.as_link() {
                    if !self.nodes.contains_key(target) {
                        return Err(GraphError::DanglingLink {
                            node: id.to_string(),
                            input: input.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }
        }

        if self.sink_nodes().is_empty() {
            return Err(GraphError::NoArtifactSink);
        }

        Ok(())
    }

    pub fn output_prefix(&self) -> String {
        self.sink_nodes()
            .first()
            .and_then(|(_, node)| node.parameters.get("filename_prefix"))
            .and_then(ParamValue::as_str)
            .unwrap_or(DEFAULT_OUTPUT_PREFIX)
            .to_string()
    }
}

fn compare_node_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Node as saved by the engine's UI editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorNode {
    pub id: Value,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub widgets_values: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EditorNode {
    fn filename_prefix(&self) -> Option<&str> {
        match &self.widgets_values {
            Value::Array(values) => values.first().and_then(Value::as_str),
            Value::Object(values) => values.get("filename_prefix").and_then(Value::as_str),
            _ => None,
        }
    }
}

/// Editor-format document. Keys other than `nodes` pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorGraph {
    pub nodes: Vec<EditorNode>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EditorGraph {
    pub fn sink_nodes(&self) -> impl Iterator<Item = &EditorNode> {
        self.nodes.iter().filter(|node| is_artifact_sink(&node.node_type))
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::Empty);
        }
        if self.sink_nodes().next().is_none() {
            return Err(GraphError::NoArtifactSink);
        }
        Ok(())
    }

    pub fn output_prefix(&self) -> String {
        self.sink_nodes()
            .next()
            .and_then(EditorNode::filename_prefix)
            .unwrap_or(DEFAULT_OUTPUT_PREFIX)
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GraphEncoding {
    ApiNative,
    EditorFormat,
}

/// A validated graph in one of the two encodings
#[derive(Debug, Clone, PartialEq)]
pub enum Workflow {
    ApiNative(ComputationGraph),
    EditorFormat(EditorGraph),
}

impl Workflow {
    /// Decide the encoding and validate. The only place the document is sniffed.
    pub fn from_value(value: Value) -> Result<Self, GraphError> {
        let is_editor = value.get("nodes").map(Value::is_array).unwrap_or(false);

        let workflow = if is_editor {
            let graph: EditorGraph = serde_json::from_value(value)
                .map_err(|e| GraphError::Malformed(e.to_string()))?;
            Workflow::EditorFormat(graph)
        } else {
            let graph: ComputationGraph = serde_json::from_value(value)
                .map_err(|e| GraphError::Malformed(e.to_string()))?;
            Workflow::ApiNative(graph)
        };

        workflow.validate()?;
        Ok(workflow)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, GraphError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| GraphError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn encoding(&self) -> GraphEncoding {
        match self {
            Workflow::ApiNative(_) => GraphEncoding::ApiNative,
            Workflow::EditorFormat(_) => GraphEncoding::EditorFormat,
        }
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        match self {
            Workflow::ApiNative(graph) => graph.validate(),
            Workflow::EditorFormat(graph) => graph.validate(),
        }
    }

    pub fn as_api_native(&self) -> Option<&ComputationGraph> {
        match self {
            Workflow::ApiNative(graph) => Some(graph),
            Workflow::EditorFormat(_) => None,
        }
    }

    /// Filename prefix the first artifact sink writes under
    pub fn output_prefix(&self) -> String {
        match self {
            Workflow::ApiNative(graph) => graph.output_prefix(),
            Workflow::EditorFormat(graph) => graph.output_prefix(),
        }
    }

    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        match self {
            Workflow::ApiNative(graph) => serde_json::to_value(graph),
            Workflow::EditorFormat(graph) => serde_json::to_value(graph),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cat_graph() -> Value {
        json!({
            "1": {"class_type": "CLIPTextEncode", "inputs": {"text": "cat"}},
            "2": {"class_type": "KSampler", "inputs": {"positive": ["1", 0], "seed": 7}},
            "3": {"class_type": "SaveImage", "inputs": {"images": ["2", 0], "filename_prefix": "cat"}}
        })
    }

    #[test]
    fn test_api_native_detected_and_parsed() {
        let workflow = Workflow::from_value(cat_graph()).unwrap();
        assert_eq!(workflow.encoding(), GraphEncoding::ApiNative);

        let graph = workflow.as_api_native().unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(
            graph.node("3").unwrap().parameters.get("images"),
            Some(&ParamValue::Link(NodeLink("2".into(), 0)))
        );
        assert_eq!(
            graph.node("2").unwrap().parameters.get("seed"),
            Some(&ParamValue::Literal(json!(7)))
        );
        assert_eq!(workflow.output_prefix(), "cat");
    }

    #[test]
    fn test_op_alias_accepted() {
        let value = json!({
            "1": {"op": "TextEncode", "inputs": {"text": "cat"}},
            "2": {"op": "SaveImage", "inputs": {"images": ["1", 0]}}
        });
        let workflow = Workflow::from_value(value).unwrap();
        assert_eq!(workflow.output_prefix(), DEFAULT_OUTPUT_PREFIX);
    }

    #[test]
    fn test_inline_parameters_folded_into_inputs() {
        let value = json!({
            "1": {"op": "TextEncode", "text": "cat"},
            "2": {"op": "Sample", "positive": ["1", 0], "inputs": {"seed": 3}},
            "3": {"op": "SaveImage", "images": ["2", 0], "filename_prefix": "cat"}
        });
        let workflow = Workflow::from_value(value).unwrap();
        assert_eq!(workflow.output_prefix(), "cat");

        let wire = workflow.to_json().unwrap();
        assert_eq!(wire["1"]["inputs"]["text"], "cat");
        assert_eq!(wire["2"]["inputs"]["positive"], json!(["1", 0]));
        assert_eq!(wire["2"]["inputs"]["seed"], 3);
        assert_eq!(wire["3"]["inputs"]["images"], json!(["2", 0]));

        // The wire shape parses back to the same graph
        assert_eq!(Workflow::from_value(wire).unwrap(), workflow);
    }

    #[test]
    fn test_inline_dangling_link_rejected() {
        let value = json!({
            "1": {"op": "TextEncode", "text": "cat"},
            "3": {"op": "SaveImage", "images": ["9", 0]}
        });
        assert_eq!(
            Workflow::from_value(value).unwrap_err(),
            GraphError::DanglingLink {
                node: "3".into(),
                input: "images".into(),
                target: "9".into(),
            }
        );
    }

    #[test]
    fn test_parameter_given_twice_rejected() {
        let value = json!({
            "3": {"op": "SaveImage", "filename_prefix": "a", "inputs": {"filename_prefix": "b"}}
        });
        assert!(matches!(Workflow::from_value(value), Err(GraphError::Malformed(_))));
    }

    #[test]
    fn test_dangling_link_rejected() {
        let value = json!({
            "3": {"class_type": "SaveImage", "inputs": {"images": ["9", 0]}}
        });
        let err = Workflow::from_value(value).unwrap_err();
        assert_eq!(
            err,
            GraphError::DanglingLink {
                node: "3".into(),
                input: "images".into(),
                target: "9".into(),
            }
        );
    }

    #[test]
    fn test_graph_without_sink_rejected() {
        let value = json!({
            "1": {"class_type": "CLIPTextEncode", "inputs": {"text": "cat"}}
        });
        assert_eq!(Workflow::from_value(value).unwrap_err(), GraphError::NoArtifactSink);
        assert_eq!(Workflow::from_value(json!({})).unwrap_err(), GraphError::Empty);
    }

    #[test]
    fn test_malformed_document() {
        let err = Workflow::from_value(json!({"1": {"inputs": {}}})).unwrap_err();
        assert!(matches!(err, GraphError::Malformed(_)));
        assert!(matches!(Workflow::from_slice(b"not json"), Err(GraphError::Malformed(_))));
    }

    #[test]
    fn test_editor_format_detected() {
        let value = json!({
            "last_node_id": 9,
            "nodes": [
                {"id": 6, "type": "CLIPTextEncode", "widgets_values": ["cat"]},
                {"id": 9, "type": "SaveImage", "widgets_values": ["editor_cat"]}
            ],
            "links": [[1, 6, 0, 9, 0, "IMAGE"]]
        });
        let workflow = Workflow::from_value(value.clone()).unwrap();
        assert_eq!(workflow.encoding(), GraphEncoding::EditorFormat);
        assert!(workflow.as_api_native().is_none());
        assert_eq!(workflow.output_prefix(), "editor_cat");
        // Passthrough keys survive serialization
        assert_eq!(workflow.to_json().unwrap(), value);
    }

    #[test]
    fn test_editor_video_prefix_from_object_widgets() {
        let value = json!({
            "nodes": [
                {"id": 1, "type": "VHS_VideoCombine", "widgets_values": {"filename_prefix": "videos/clip", "frame_rate": 8}}
            ]
        });
        assert_eq!(Workflow::from_value(value).unwrap().output_prefix(), "videos/clip");
    }

    #[test]
    fn test_sink_order_is_numeric() {
        let graph = ComputationGraph::new()
            .with_node("10", GraphNode::new("SaveImage").with_input("filename_prefix", "late"))
            .with_node("9", GraphNode::new("SaveImage").with_input("filename_prefix", "early"));
        let ids: Vec<&str> = graph.sink_nodes().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["9", "10"]);
        assert_eq!(graph.output_prefix(), "early");
    }

    #[test]
    fn test_builder_roundtrips_to_wire_shape() {
        let graph = ComputationGraph::new()
            .with_node("1", GraphNode::new("EmptyLatentImage").with_input("width", 512))
            .with_node("2", GraphNode::new("SaveImage").with_link("images", "1", 0));
        let value = serde_json::to_value(&graph).unwrap();
        assert_eq!(value["2"]["class_type"], "SaveImage");
        assert_eq!(value["2"]["inputs"]["images"], json!(["1", 0]));
        assert_eq!(value["1"]["inputs"]["width"], 512);
    }
}
