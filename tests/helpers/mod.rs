pub mod builders;
pub mod policies;

pub use builders::{DocumentBuilder, RegistryBuilder, TestRegistry};
pub use policies::PolicyDir;
