//! Overlay configuration.
//!
//! Every field has a default, so a JSON document only needs the options it
//! changes:
//!
//! ```json
//! { "broadcast": "efficient", "doping": "prefix-removal", "stats": { "background_threads": 2 } }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::geometry::{DopingFunction, ElementKind, SemanticMapper, SEMANTIC_DIMENSIONS};
use crate::stats::StatsKind;
use crate::{Error, Result};

/// How a message that must reach every peer is disseminated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastStrategy {
    /// Anycast over the whole space with duplicate suppression.
    Flooding,
    /// Direction-pruned flooding.
    Efficient,
    /// Spanning-tree dissemination: every peer receives one copy.
    #[default]
    Optimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub kind: StatsKind,
    /// Worker tasks applying updates off the insert path. 0 = synchronous.
    pub background_threads: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { kind: StatsKind::Mean, background_threads: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub dimensions: usize,
    pub element_kinds: Vec<ElementKind>,
    pub broadcast: BroadcastStrategy,
    pub doping: DopingFunction,
    pub stats: StatsConfig,
    /// Unicast hop limit before routing gives up.
    pub max_hops: u32,
    /// Message ids remembered per peer for duplicate suppression.
    pub dedupe_capacity: usize,
    /// Failed deliveries after which a subscription is withdrawn.
    pub notification_failure_threshold: u32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            dimensions: SEMANTIC_DIMENSIONS,
            element_kinds: vec![ElementKind::String; SEMANTIC_DIMENSIONS],
            broadcast: BroadcastStrategy::default(),
            doping: DopingFunction::default(),
            stats: StatsConfig::default(),
            max_hops: 256,
            dedupe_capacity: 4096,
            notification_failure_threshold: 3,
        }
    }
}

impl OverlayConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: OverlayConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimensions != SEMANTIC_DIMENSIONS {
            return Err(Error::ConfigError(format!(
                "the semantic overlay needs {SEMANTIC_DIMENSIONS} dimensions, got {}",
                self.dimensions
            )));
        }
        if self.element_kinds.len() != self.dimensions {
            return Err(Error::ConfigError(format!(
                "{} element kinds given for {} dimensions",
                self.element_kinds.len(),
                self.dimensions
            )));
        }
        if self.max_hops == 0 {
            return Err(Error::ConfigError("max_hops must be positive".into()));
        }
        if self.dedupe_capacity == 0 {
            return Err(Error::ConfigError("dedupe_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn with_broadcast(mut self, strategy: BroadcastStrategy) -> Self {
        self.broadcast = strategy;
        self
    }

    pub fn with_stats(mut self, kind: StatsKind, background_threads: usize) -> Self {
        self.stats = StatsConfig { kind, background_threads };
        self
    }

    pub fn with_doping(mut self, doping: DopingFunction) -> Self {
        self.doping = doping;
        self
    }

    pub(crate) fn kinds(&self) -> [ElementKind; SEMANTIC_DIMENSIONS] {
        let mut kinds = [ElementKind::String; SEMANTIC_DIMENSIONS];
        for (slot, kind) in kinds.iter_mut().zip(&self.element_kinds) {
            *slot = *kind;
        }
        kinds
    }

    pub(crate) fn mapper(&self) -> SemanticMapper {
        SemanticMapper::new(self.kinds(), self.doping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = OverlayConfig::from_json(
            r#"{ "broadcast": "efficient", "doping": "prefix-removal", "stats": { "background_threads": 2 } }"#,
        )
        .unwrap();
        assert_eq!(config.broadcast, BroadcastStrategy::Efficient);
        assert_eq!(config.doping, DopingFunction::PrefixRemoval);
        assert_eq!(config.stats.background_threads, 2);
        assert_eq!(config.stats.kind, StatsKind::Mean);
        assert_eq!(config.max_hops, 256);
    }

    #[test]
    fn test_rejects_wrong_dimensions() {
        let err = OverlayConfig::from_json(r#"{ "dimensions": 3 }"#).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(OverlayConfig::from_json("{"), Err(Error::Json(_))));
    }
}
