pub mod definition;
pub mod resolver;

pub use definition::{Dependency, DependencyExt, DependencyTag};
pub use resolver::{DependencyResolver, KegResolver, ResolvedDependency, StaticResolver};
