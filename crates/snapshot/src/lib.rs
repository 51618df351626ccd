use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to serialize model: {0}")]
    Capture(#[source] serde_json::Error),
    #[error("failed to restore model from baseline: {0}")]
    Restore(#[source] serde_json::Error),
}

/// Immutable deep copy of a model's persisted-relevant state, taken at
/// load time or after a successful commit. Transient fields stay out by
/// being skipped in the model's Serialize impl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    value: Value,
}

impl Baseline {
    pub fn capture<T: Serialize>(model: &T) -> Result<Self, SnapshotError> {
        let value = serde_json::to_value(model).map_err(SnapshotError::Capture)?;
        Ok(Self { value })
    }

    /// Structural inequality against the live model. Pure; safe to call
    /// on every edit. A model that fails to serialize counts as dirty.
    pub fn is_dirty<T: Serialize>(&self, model: &T) -> bool {
        match serde_json::to_value(model) {
            Ok(value) => value != self.value,
            Err(_) => true,
        }
    }

    /// Deep copy of the baseline back into a live model. The result is
    /// indistinguishable by [`Baseline::is_dirty`] from the state right
    /// after the last capture.
    pub fn restore<T: DeserializeOwned>(&self) -> Result<T, SnapshotError> {
        serde_json::from_value(self.value.clone()).map_err(SnapshotError::Restore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Model {
        id: u32,
        entries: Vec<String>,
        #[serde(skip)]
        transient: Option<String>,
    }

    fn model() -> Model {
        Model {
            id: 1,
            entries: vec!["a".to_string(), "b".to_string()],
            transient: None,
        }
    }

    #[test]
    fn fresh_capture_is_clean() {
        let model = model();
        let baseline = Baseline::capture(&model).unwrap();
        assert!(!baseline.is_dirty(&model));
    }

    #[test]
    fn mutation_dirties_and_restore_cleans() {
        let mut model = model();
        let baseline = Baseline::capture(&model).unwrap();
        model.entries.push("c".to_string());
        assert!(baseline.is_dirty(&model));

        model = baseline.restore().unwrap();
        assert!(!baseline.is_dirty(&model));
        assert_eq!(model.entries.len(), 2);
    }

    #[test]
    fn restore_is_idempotent() {
        let mut model = model();
        let baseline = Baseline::capture(&model).unwrap();
        model.entries.clear();
        let once: Model = baseline.restore().unwrap();
        model = once.clone();
        let twice: Model = baseline.restore().unwrap();
        assert_eq!(model, twice);
    }

    #[test]
    fn transient_fields_do_not_dirty() {
        let mut model = model();
        let baseline = Baseline::capture(&model).unwrap();
        model.transient = Some("hovering".to_string());
        assert!(!baseline.is_dirty(&model));
    }

    #[test]
    fn rebase_reflects_normalized_state() {
        let mut model = model();
        let _initial = Baseline::capture(&model).unwrap();
        // server normalized the committed state; rebase from live state
        model.entries[0] = "a-normalized".to_string();
        let rebased = Baseline::capture(&model).unwrap();
        assert!(!rebased.is_dirty(&model));
    }
}
