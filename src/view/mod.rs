mod resolver;

pub use resolver::{ResolvedView, ViewResolver};
