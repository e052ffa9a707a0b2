pub mod approvals;
pub mod daemon;
pub mod routes;
pub mod sse;

pub use approvals::{PendingApprovals, WebApprovalHandler};
pub use daemon::{DEFAULT_PORT, start_gateway};
pub use routes::{GatewayState, SharedState};
