//! Next-step result from a graph node.

/// Next step after running a node.
///
/// - **Continue**: follow the declared outgoing edge.
/// - **Node(id)**: jump to the given node (used inside bounded loops).
/// - **End**: stop; the current state is the final result.
///
/// For nodes with conditional edges the router decides and the returned value is
/// ignored.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Next {
    Continue,
    Node(String),
    End,
}
