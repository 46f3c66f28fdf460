//! Output drivers
//!
//! An output driver delivers the rendered report. The formats it supports
//! decide which formats the report is rendered in.

pub mod filesystem;
pub mod slack;
pub mod stdout;

use async_trait::async_trait;

use crate::plugin::{Capability, PluginError, PluginManager, Registry};
use crate::report::Content;
use crate::views::OutputFormat;

#[async_trait]
pub trait OutputDriver: Send + Sync {
    fn supported_formats(&self) -> &[OutputFormat] {
        &[OutputFormat::Md, OutputFormat::Html]
    }

    fn can_render(&self, format: OutputFormat) -> bool {
        self.supported_formats().contains(&format)
    }

    async fn render_output(&self, content: &Content) -> anyhow::Result<()>;
}

pub type OutputManager = PluginManager<dyn OutputDriver>;

impl PluginManager<dyn OutputDriver> {
    /// Deliver `content` through the output configured as `name`.
    pub async fn render_output(&self, name: &str, content: &Content) -> Result<(), PluginError> {
        self.invoke(name, |driver| async move { driver.render_output(content).await })
            .await
    }
}

/// Registry with every built-in output driver
pub fn builtin_registry() -> Registry<dyn OutputDriver> {
    Registry::new(Capability::Output)
        .with("stdout", stdout::factory)
        .with("static", filesystem::factory)
        .with("slack", slack::factory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_keys() {
        let registry = builtin_registry();
        assert_eq!(
            registry.keys().into_iter().collect::<Vec<_>>(),
            vec!["slack", "static", "stdout"]
        );
    }
}
