pub mod catalog;
pub mod common;
pub mod dependency;
pub mod project;
pub mod run;
pub mod schema;

pub use catalog::*;
pub use common::*;
pub use dependency::*;
pub use project::*;
pub use run::*;
pub use schema::*;
