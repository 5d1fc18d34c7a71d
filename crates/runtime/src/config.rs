//! Runtime configuration
//!
//! Tunables for the scheduler, thread stacks, collector pacing, and heap
//! expansion policy. Loaded from a TOML file when present; every field
//! falls back to its default, so a partial file is fine.
//!
//! ```toml
//! quantum = 4096
//! stack-size = 4096
//!
//! [gc]
//! min-quanta = 50
//! max-quanta = 750
//!
//! [heap]
//! min-expansion = 524288
//! over-percent = 30
//! ```

use std::path::Path;

use serde::Deserialize;

use arcueid_core::Interp;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RuntimeConfig {
    /// Instructions per scheduler turn.
    pub quantum: i64,
    /// Thread value-stack size, in slots.
    pub stack_size: usize,
    pub gc: GcConfig,
    pub heap: HeapConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GcConfig {
    pub min_quanta: i64,
    pub max_quanta: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HeapConfig {
    /// Minimum chunk growth in bytes, before page rounding.
    pub min_expansion: usize,
    /// Extra percentage allocated on every heap expansion.
    pub over_percent: usize,
}

impl Default for RuntimeConfig {
    fn default() -> RuntimeConfig {
        RuntimeConfig {
            quantum: arcueid_core::interp::DEFAULT_QUANTUM,
            stack_size: arcueid_core::DEFAULT_STACK_SIZE,
            gc: GcConfig::default(),
            heap: HeapConfig::default(),
        }
    }
}

impl Default for GcConfig {
    fn default() -> GcConfig {
        GcConfig {
            min_quanta: arcueid_core::gc::GC_QUANTA,
            max_quanta: arcueid_core::gc::MAX_GC_QUANTA,
        }
    }
}

impl Default for HeapConfig {
    fn default() -> HeapConfig {
        HeapConfig {
            min_expansion: arcueid_core::heap::DEFAULT_MIN_EXPANSION,
            over_percent: arcueid_core::heap::DEFAULT_OVER_PERCENT,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "cannot read config: {}", e),
            ConfigError::Parse(e) => write!(f, "invalid config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl RuntimeConfig {
    pub fn load(path: &Path) -> Result<RuntimeConfig, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&text).map_err(ConfigError::Parse)
    }

    /// Push the settings into a (freshly created) interpreter.
    pub fn apply(&self, c: &mut Interp) {
        c.quantum = self.quantum.max(1);
        c.stksize = self.stack_size.max(64);
        c.gc.min_quanta = self.gc.min_quanta.max(1);
        c.gc.max_quanta = self.gc.max_quanta.max(c.gc.min_quanta);
        c.heap.min_expansion = self.heap.min_expansion.max(4096);
        c.heap.over_percent = self.heap.over_percent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_core_constants() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.quantum, arcueid_core::interp::DEFAULT_QUANTUM);
        assert_eq!(cfg.stack_size, arcueid_core::DEFAULT_STACK_SIZE);
        assert_eq!(cfg.gc.min_quanta, arcueid_core::gc::GC_QUANTA);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arcueid.toml");
        std::fs::write(&path, "quantum = 99\n\n[gc]\nmin-quanta = 10\n").unwrap();
        let cfg = RuntimeConfig::load(&path).unwrap();
        assert_eq!(cfg.quantum, 99);
        assert_eq!(cfg.gc.min_quanta, 10);
        assert_eq!(cfg.stack_size, arcueid_core::DEFAULT_STACK_SIZE);
        assert_eq!(cfg.heap.over_percent, arcueid_core::heap::DEFAULT_OVER_PERCENT);
    }

    #[test]
    fn apply_clamps_degenerate_settings() {
        let mut cfg = RuntimeConfig::default();
        cfg.quantum = 0;
        cfg.stack_size = 1;
        cfg.gc.max_quanta = 1;
        cfg.gc.min_quanta = 100;
        let mut c = Interp::new();
        cfg.apply(&mut c);
        assert!(c.quantum >= 1);
        assert!(c.stksize >= 64);
        assert!(c.gc.max_quanta >= c.gc.min_quanta);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "quantum = \"lots\"").unwrap();
        assert!(matches!(
            RuntimeConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
