//! Concrete collaborator clients: the chain node, the pool contracts, and
//! the agent event index.

pub mod agent_index;
pub mod fevm;
pub mod lotus;
