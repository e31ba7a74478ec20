//! Proto tree mirroring the executed plan, plus decoding of the FTv1
//! payloads subgraphs attach under `extensions.ftv1`.

use base64::Engine as _;
use prost::Message as _;

use crate::plan::FlattenPathSegment;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TraceNode {
    #[prost(oneof = "trace_node::Node", tags = "1, 2, 3, 4")]
    pub node: Option<trace_node::Node>,
}

pub mod trace_node {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Node {
        #[prost(message, tag = "1")]
        Sequence(super::SequenceTrace),
        #[prost(message, tag = "2")]
        Parallel(super::ParallelTrace),
        #[prost(message, tag = "3")]
        Flatten(Box<super::FlattenTrace>),
        #[prost(message, tag = "4")]
        Fetch(super::FetchTrace),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SequenceTrace {
    #[prost(message, repeated, tag = "1")]
    pub nodes: Vec<TraceNode>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ParallelTrace {
    #[prost(message, repeated, tag = "1")]
    pub nodes: Vec<TraceNode>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FlattenTrace {
    #[prost(message, repeated, tag = "1")]
    pub response_path: Vec<ResponsePathElement>,
    #[prost(message, optional, boxed, tag = "2")]
    pub node: Option<Box<TraceNode>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchTrace {
    #[prost(string, tag = "1")]
    pub service_name: String,
    /// Monotonic offset from the start of request execution.
    #[prost(uint64, tag = "2")]
    pub sent_time_offset_ns: u64,
    #[prost(message, optional, tag = "3")]
    pub sent_time: Option<::prost_types::Timestamp>,
    #[prost(message, optional, tag = "4")]
    pub received_time: Option<::prost_types::Timestamp>,
    #[prost(message, optional, tag = "5")]
    pub trace: Option<SubgraphTrace>,
    #[prost(bool, tag = "6")]
    pub trace_parsing_failed: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResponsePathElement {
    #[prost(oneof = "response_path_element::Id", tags = "1, 2")]
    pub id: Option<response_path_element::Id>,
}

pub mod response_path_element {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Id {
        #[prost(string, tag = "1")]
        FieldName(String),
        #[prost(uint32, tag = "2")]
        Index(u32),
    }
}

/// Timing tree reported by a subgraph for its own execution.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubgraphTrace {
    #[prost(message, optional, tag = "1")]
    pub start_time: Option<::prost_types::Timestamp>,
    #[prost(message, optional, tag = "2")]
    pub end_time: Option<::prost_types::Timestamp>,
    #[prost(uint64, tag = "3")]
    pub duration_ns: u64,
    #[prost(message, optional, tag = "4")]
    pub root: Option<SubgraphTraceNode>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubgraphTraceNode {
    #[prost(string, tag = "1")]
    pub response_name: String,
    #[prost(string, tag = "2")]
    pub r#type: String,
    #[prost(string, tag = "3")]
    pub parent_type: String,
    #[prost(uint64, tag = "4")]
    pub start_time: u64,
    #[prost(uint64, tag = "5")]
    pub end_time: u64,
    #[prost(message, repeated, tag = "6")]
    pub child: Vec<SubgraphTraceNode>,
    #[prost(message, repeated, tag = "7")]
    pub error: Vec<SubgraphTraceError>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubgraphTraceError {
    #[prost(string, tag = "1")]
    pub message: String,
    #[prost(string, tag = "2")]
    pub json: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TraceDecodeError {
    #[error("subgraph trace payload was not base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("subgraph trace payload was not a valid proto: {0}")]
    Proto(#[from] prost::DecodeError),
}

pub fn decode_ftv1_trace(encoded: &str) -> Result<SubgraphTrace, TraceDecodeError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded)?;
    Ok(SubgraphTrace::decode(bytes.as_slice())?)
}

/// Subgraphs report their root fields under their own root type names; the
/// gateway presents them under the canonical operation root.
pub(crate) fn override_root_parent_type(trace: &mut SubgraphTrace, root_type_name: &str) {
    if let Some(root) = &mut trace.root {
        for child in &mut root.child {
            child.parent_type = root_type_name.to_string();
        }
    }
}

impl TraceNode {
    pub fn empty() -> Self {
        TraceNode { node: None }
    }

    pub fn sequence(nodes: Vec<TraceNode>) -> Self {
        TraceNode {
            node: Some(trace_node::Node::Sequence(SequenceTrace { nodes })),
        }
    }

    pub fn parallel(nodes: Vec<TraceNode>) -> Self {
        TraceNode {
            node: Some(trace_node::Node::Parallel(ParallelTrace { nodes })),
        }
    }

    pub fn flatten(path: &[FlattenPathSegment], child: TraceNode) -> Self {
        TraceNode {
            node: Some(trace_node::Node::Flatten(Box::new(FlattenTrace {
                response_path: response_path_to_proto(path),
                node: Some(Box::new(child)),
            }))),
        }
    }

    pub fn fetch(fetch: FetchTrace) -> Self {
        TraceNode {
            node: Some(trace_node::Node::Fetch(fetch)),
        }
    }
}

/// List fan-out segments carry no information once indexes are resolved, so
/// only field steps are kept.
pub fn response_path_to_proto(path: &[FlattenPathSegment]) -> Vec<ResponsePathElement> {
    path.iter()
        .filter_map(|segment| match segment {
            FlattenPathSegment::Field(field_name) => Some(ResponsePathElement {
                id: Some(response_path_element::Id::FieldName(field_name.to_string())),
            }),
            FlattenPathSegment::List => None,
        })
        .collect()
}
