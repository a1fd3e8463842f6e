pub mod credentials;
pub mod loader;
pub mod schema;

pub use loader::{get_config_path, load_config, save_config};
pub use schema::{
    AgentDefaults, Config, ContextConfig, DebugConfig, GeminiConfig, ModelsConfig,
    ProvidersConfig, RetrySettings, SandboxConfig, SearchConfig, ToolsConfig, WorkspaceConfig,
};
