pub mod authority;
pub mod boost;
pub mod plan;
pub mod recommendation;
pub mod signal;
pub mod tokens;
