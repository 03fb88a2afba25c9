pub mod anthropic;
pub mod bedrock;
pub mod mcp;
pub mod openai_compat;
pub mod registry;
pub mod scripted;
pub mod tool_loop;
pub mod tool_process;
pub mod traits;
pub(crate) mod util;

// Re-exports for convenience.
pub use registry::AdapterRegistry;
pub use scripted::{Script, ScriptedAdapter};
pub use tool_loop::ToolLoopAdapter;
pub use traits::{InvokeContext, Invoker, Outcome};
