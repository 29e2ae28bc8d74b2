pub mod resolver;
pub mod traversal;

pub use resolver::{InheritanceResolver, ResolvedNode, Resolution, ResolverSettings};
pub use traversal::{traverse, TraversalAlgorithm};
