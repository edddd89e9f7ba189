//! Run orchestration: polling a run to completion and approving tool calls.

pub mod approval;
pub mod poller;

pub use approval::{
    AllowListResolver, AutoApproveResolver, ToolApprovalResolver, resolver_from_config,
};
pub use poller::{RunOutcome, RunPoller};
