//! Graph engine configuration

use std::env;

use crate::error::{ModelError, ModelResult};

/// Tunables for the graph engines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    /// Maximum number of parent ids bound into one batched fetch
    pub max_batch_size: usize,
    /// Maximum depth of nested owned relationships to batch-load
    pub max_depth: usize,
    /// Timestamp column a load time window filters on
    pub partition_column: String,
    /// Re-read many-to-many fields after an update save
    pub reload_links_after_save: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 1000,
            max_depth: 10,
            partition_column: "created_at".to_string(),
            reload_links_after_save: true,
        }
    }
}

impl GraphConfig {
    /// Load configuration from `ELIF_GRAPH_*` environment variables
    pub fn from_env() -> ModelResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> ModelResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("ELIF_GRAPH_MAX_BATCH_SIZE") {
            config.max_batch_size = parse_number("max_batch_size", &value)?;
        }

        if let Some(value) = lookup("ELIF_GRAPH_MAX_DEPTH") {
            config.max_depth = parse_number("max_depth", &value)?;
        }

        if let Some(column) = lookup("ELIF_GRAPH_PARTITION_COLUMN") {
            config.partition_column = column;
        }

        if let Some(value) = lookup("ELIF_GRAPH_RELOAD_LINKS_AFTER_SAVE") {
            config.reload_links_after_save = match value.to_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(ModelError::Configuration(format!(
                        "reload_links_after_save: expected a boolean, got '{}'",
                        value
                    )))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ModelResult<()> {
        if self.max_batch_size == 0 {
            return Err(ModelError::Configuration(
                "max_batch_size must be greater than 0".to_string(),
            ));
        }

        // Postgres caps bind parameters per statement at 65535
        if self.max_batch_size > 65_000 {
            return Err(ModelError::Configuration(format!(
                "max_batch_size {} exceeds the bind parameter limit",
                self.max_batch_size
            )));
        }

        if self.max_depth == 0 {
            return Err(ModelError::Configuration(
                "max_depth must be greater than 0".to_string(),
            ));
        }

        if self.partition_column.trim().is_empty() {
            return Err(ModelError::Configuration(
                "partition_column cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_reload_links_after_save(mut self, reload: bool) -> Self {
        self.reload_links_after_save = reload;
        self
    }
}

fn parse_number(field: &str, value: &str) -> ModelResult<usize> {
    value.trim().parse().map_err(|_| {
        ModelError::Configuration(format!(
            "{}: expected a positive integer, got '{}'",
            field, value
        ))
    })
}
