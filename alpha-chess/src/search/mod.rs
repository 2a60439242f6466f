mod batch;
mod debug;
mod node;
mod noise;
mod play;
mod tree;
mod ucb;


pub use batch::{Batch, BatchResult, Pending};
pub use debug::TreeStatus;
pub use node::Node;
pub use noise::dirichlet_noise;
pub use tree::Tree;

/// Identifies a node that is waiting for evaluation.
pub type Handle = u64;
