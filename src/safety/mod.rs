pub mod gate;
pub mod hard_block;
pub mod patterns;
pub mod tiers;

pub use gate::{SafetyGate, SafetyVerdict};
pub use hard_block::{check_hard_block, sanitize_command, validate_path};
pub use tiers::{ApprovalMode, ToolTier, parse_approval_mode, tool_tier};
