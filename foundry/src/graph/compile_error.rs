//! Graph compilation error.

use thiserror::Error;

/// Error when compiling a state graph.
///
/// Validation ensures every id in edges (except START/END) exists in the node
/// map, exactly one edge leaves START, END is reachable, and no node has both a
/// fixed outgoing edge and conditional edges.
#[derive(Debug, Error)]
pub enum CompilationError {
    /// A node id in an edge was not registered via `add_node`.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// No edge (or more than one) has from_id == START.
    #[error("graph must have exactly one edge from START")]
    MissingStart,

    /// No path reaches END.
    #[error("graph has no edge or conditional path to END")]
    MissingEnd,

    /// Edges are malformed (duplicate outgoing edge, unreachable node).
    #[error("invalid graph shape: {0}")]
    InvalidShape(String),

    /// A node has both an outgoing edge and conditional edges.
    #[error("node has both edge and conditional edges: {0}")]
    NodeHasBothEdgeAndConditional(String),

    /// A value in a conditional path_map is not a valid node id or END.
    #[error("conditional path_map invalid target: {0}")]
    InvalidConditionalPathMap(String),
}
