#![allow(dead_code)]

use cmdpipe::config::{
    CommandConfig, ConfigFile, MetricConfig, RawConfigFile, RuntimeSection, SchedulerSection,
    SessionSection,
};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                scheduler: SchedulerSection::default(),
                runtime: RuntimeSection::default(),
                session: SessionSection {
                    id: "test".to_string(),
                    num_docs: 100,
                    memory_limit_bytes: 1 << 20,
                    metrics: Vec::new(),
                },
                commands: Vec::new(),
            },
        }
    }

    pub fn cpu_slots(mut self, slots: usize) -> Self {
        self.config.scheduler.cpu_slots = slots;
        self
    }

    pub fn num_docs(mut self, num_docs: usize) -> Self {
        self.config.session.num_docs = num_docs;
        self
    }

    pub fn memory_limit(mut self, bytes: u64) -> Self {
        self.config.session.memory_limit_bytes = bytes;
        self
    }

    pub fn with_metric(mut self, name: &str, modulus: i64, multiplier: i64) -> Self {
        self.config.session.metrics.push(MetricConfig {
            name: name.to_string(),
            modulus,
            multiplier,
            offset: 0,
        });
        self
    }

    pub fn with_command(mut self, command: CommandConfig) -> Self {
        self.config.commands.push(command);
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthands for `[[command]]` entries.
pub mod cmd {
    use cmdpipe::config::CommandConfig;

    pub fn reset(output: &str) -> CommandConfig {
        CommandConfig::ResetGroups {
            output: output.to_string(),
        }
    }

    pub fn regroup(input: &str, output: &str, metric: &str, min: i64, max: i64, interval: i64) -> CommandConfig {
        CommandConfig::MetricRegroup {
            input: input.to_string(),
            output: output.to_string(),
            metric: metric.to_string(),
            min,
            max,
            interval,
        }
    }

    pub fn copy(input: &str, output: &str) -> CommandConfig {
        CommandConfig::CopyGroups {
            input: input.to_string(),
            output: output.to_string(),
        }
    }

    pub fn stats(input: &str, metric: &str) -> CommandConfig {
        CommandConfig::GroupStats {
            input: input.to_string(),
            metric: metric.to_string(),
        }
    }

    pub fn num_groups(input: &str) -> CommandConfig {
        CommandConfig::NumGroups {
            input: input.to_string(),
        }
    }
}
