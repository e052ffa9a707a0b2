pub mod canvas_stream;
pub mod compaction;
pub mod events;
pub mod loop_;
pub mod queue;

pub use events::{AgentEvent, EventSink};
pub use loop_::{AgentLoopConfig, ToolExecutor, run_agent_loop};
pub use queue::MessageQueue;
