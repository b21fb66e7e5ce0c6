//! Stagehand domain model: build context, plans and the error taxonomy.

pub mod context;
pub mod error;
pub mod plan;

pub use context::BuildContext;
pub use error::{CoreError, PlanError, Result};
pub use plan::{Plan, Stage};
