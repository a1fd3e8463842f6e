use serde::{Deserialize, Serialize};

/// Generates a `Debug` impl that redacts secret fields.
///
/// Field specifiers:
/// - `field_name`            : printed normally via `&self.field_name`
/// - `redact(field_name)`    : `String` field: shows `[empty]` or `[REDACTED]`
macro_rules! redact_debug {
    (@field $builder:ident, $self:ident, redact($field:ident)) => {
        $builder.field(
            stringify!($field),
            &if $self.$field.is_empty() {
                "[empty]"
            } else {
                "[REDACTED]"
            },
        );
    };
    (@field $builder:ident, $self:ident, $field:ident) => {
        $builder.field(stringify!($field), &$self.$field);
    };

    (@fields $builder:ident, $self:ident,) => {};
    (@fields $builder:ident, $self:ident, redact($field:ident), $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, redact($field));
        redact_debug!(@fields $builder, $self, $($rest)*);
    };
    (@fields $builder:ident, $self:ident, $field:ident, $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, $field);
        redact_debug!(@fields $builder, $self, $($rest)*);
    };

    ($struct_name:ident, $($fields:tt)*) => {
        impl std::fmt::Debug for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut builder = f.debug_struct(stringify!($struct_name));
                redact_debug!(@fields builder, self, $($fields)*);
                builder.finish()
            }
        }
    };
}

// Submodules are declared after the macro so they can use `redact_debug!`
mod agent;
mod providers;
mod tools;

pub use agent::*;
pub use providers::*;
pub use tools::*;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub agent: AgentDefaults,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent.max_turns == 0 {
            anyhow::bail!("agent.maxTurns must be at least 1");
        }
        if !(0.0..=2.0).contains(&self.agent.temperature) {
            anyhow::bail!(
                "agent.temperature must be within [0, 2], got {}",
                self.agent.temperature
            );
        }
        if self.workspace.read_limit_chars == 0 {
            anyhow::bail!("workspace.readLimitChars must be greater than 0");
        }
        if self.context.cache_threshold_chars == 0 {
            anyhow::bail!("context.cacheThresholdChars must be greater than 0");
        }
        for (alias, target) in [
            ("fast", &self.models.fast),
            ("reasoning", &self.models.reasoning),
            ("thinking", &self.models.thinking),
        ] {
            if target.trim().is_empty() {
                anyhow::bail!("models.{alias} must name a concrete model");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
