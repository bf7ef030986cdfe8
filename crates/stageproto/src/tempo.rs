//! Where the current BPM comes from.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::query::QueryEngine;

/// Current tempo in beats per minute, or `None` when unknown.
#[async_trait]
pub trait TempoSource: Send + Sync {
    async fn get_bpm(&self) -> Option<f64>;

    /// Short label for logs and reports.
    fn name(&self) -> &'static str;
}

/// Tempo as reported by the session itself.
pub struct SessionTempo {
    engine: Arc<QueryEngine>,
}

impl SessionTempo {
    pub fn new(engine: Arc<QueryEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl TempoSource for SessionTempo {
    async fn get_bpm(&self) -> Option<f64> {
        self.engine.tempo().await.filter(|bpm| valid_bpm(*bpm))
    }

    fn name(&self) -> &'static str {
        "session"
    }
}

/// A constant tempo.
#[derive(Debug, Clone, Copy)]
pub struct FixedTempo(pub f64);

#[async_trait]
impl TempoSource for FixedTempo {
    async fn get_bpm(&self) -> Option<f64> {
        Some(self.0).filter(|bpm| valid_bpm(*bpm))
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Ask `primary`, then `secondary` if the first has no answer.
pub struct FallbackTempo {
    primary: Arc<dyn TempoSource>,
    secondary: Arc<dyn TempoSource>,
}

impl FallbackTempo {
    pub fn new(primary: Arc<dyn TempoSource>, secondary: Arc<dyn TempoSource>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl TempoSource for FallbackTempo {
    async fn get_bpm(&self) -> Option<f64> {
        if let Some(bpm) = self.primary.get_bpm().await {
            return Some(bpm);
        }
        debug!(
            primary = self.primary.name(),
            secondary = self.secondary.name(),
            "primary tempo source silent, asking secondary"
        );
        self.secondary.get_bpm().await
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}

pub(crate) fn valid_bpm(bpm: f64) -> bool {
    bpm.is_finite() && bpm > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    #[async_trait]
    impl TempoSource for Silent {
        async fn get_bpm(&self) -> Option<f64> {
            None
        }

        fn name(&self) -> &'static str {
            "silent"
        }
    }

    #[tokio::test]
    async fn fallback_uses_secondary_when_primary_is_silent() {
        let tempo = FallbackTempo::new(Arc::new(Silent), Arc::new(FixedTempo(90.0)));
        assert_eq!(tempo.get_bpm().await, Some(90.0));
    }

    #[tokio::test]
    async fn fallback_prefers_primary() {
        let tempo = FallbackTempo::new(Arc::new(FixedTempo(128.0)), Arc::new(FixedTempo(90.0)));
        assert_eq!(tempo.get_bpm().await, Some(128.0));
    }

    #[tokio::test]
    async fn nonsense_tempo_is_unknown() {
        assert_eq!(FixedTempo(0.0).get_bpm().await, None);
        assert_eq!(FixedTempo(f64::NAN).get_bpm().await, None);
    }
}
