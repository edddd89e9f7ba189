//! Tool definitions and run-time tool resources.
//!
//! The external inventory server is exposed to workers as an MCP tool. Its
//! definition is attached when a worker is created, and its run-time settings
//! (approval mode and headers) are attached to every run submission.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default label of the external tool server.
pub const DEFAULT_SERVER_LABEL: &str = "inventory_mcp";

/// Approval mode applied by the backend before calling a tool.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Every call surfaces as a pending action.
    #[default]
    Always,
    /// Calls run without asking.
    Never,
}

/// A list of tool names.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ToolNames {
    /// Tool names.
    pub tool_names: Vec<String>,
}

/// Approval setting: a global mode or per-tool lists.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequireApproval {
    /// Same mode for every tool.
    Mode(ApprovalMode),
    /// Explicit lists.
    PerTool {
        /// Tools that always require approval.
        #[serde(default)]
        always: ToolNames,
        /// Tools that never require approval.
        #[serde(default)]
        never: ToolNames,
    },
}

impl Default for RequireApproval {
    fn default() -> Self {
        Self::Mode(ApprovalMode::Always)
    }
}

/// Run-time settings for one MCP tool server.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct McpToolResource {
    /// Label matching the tool definition.
    pub server_label: String,
    /// Approval setting.
    pub require_approval: RequireApproval,
    /// Headers forwarded to the tool server.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// Tool resources attached to a run submission.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ToolResources {
    /// MCP server settings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp: Vec<McpToolResource>,
}

impl ToolResources {
    /// Whether nothing would be sent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mcp.is_empty()
    }
}

/// Tool definition attached to a worker at creation time.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDefinition {
    /// External MCP tool server.
    Mcp {
        /// Label referenced by run-time resources.
        server_label: String,
        /// Server URL, ending in `/mcp`.
        server_url: String,
    },
}

/// Normalise an external tool base URL so it ends with a single `/mcp` segment.
#[must_use]
pub fn normalize_mcp_url(base: &str) -> String {
    let trimmed = base.trim().trim_end_matches('/');
    if trimmed.ends_with("/mcp") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/mcp")
    }
}
