pub mod browser;
pub mod catalog;
pub mod content;
pub mod dispatcher;
pub mod pool;
pub mod state;
pub mod validation;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use catalog::{ToolCatalog, ToolDescriptor, ToolId};
pub use dispatcher::{ContentItem, ToolDispatcher, ToolFailure, ToolResponse};
pub use pool::{ConnectionScope, SessionFactory, SessionLease, SessionManager, SessionPool};
pub use state::ServerState;
pub use validation::{validate, ToolArgs, ValidationLimits};
