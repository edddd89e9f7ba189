//! Worker provisioning and tool configuration.

pub mod provisioning;
pub mod resources;

pub use provisioning::{WorkerLease, WorkerProvisioner, WorkerSpec, WorkerStrategy};
pub use resources::{
    ApprovalMode, McpToolResource, RequireApproval, ToolDefinition, ToolNames, ToolResources,
    normalize_mcp_url,
};
