//! Mock transformations for testing.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::core::ItemKey;
use crate::stages::{CopyTransform, Produced, Transform, TransformRequest};

fn touches(keys: &BTreeSet<ItemKey>, request: &TransformRequest<'_>) -> bool {
    request.outputs.iter().any(|key| keys.contains(key))
        || request.inputs.iter().any(|input| keys.contains(&input.key))
}

fn key_set<I, K>(keys: I) -> BTreeSet<ItemKey>
where
    I: IntoIterator<Item = K>,
    K: Into<ItemKey>,
{
    keys.into_iter().map(Into::into).collect()
}

/// A transformation that records every unit it computes, then delegates.
#[derive(Debug)]
pub struct RecordingTransform {
    inner: Arc<dyn Transform>,
    calls: Mutex<Vec<Vec<ItemKey>>>,
}

impl Default for RecordingTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransform {
    /// Records and copies the primary input.
    #[must_use]
    pub fn new() -> Self {
        Self::wrapping(Arc::new(CopyTransform))
    }

    /// Records and delegates to `inner`.
    #[must_use]
    pub fn wrapping(inner: Arc<dyn Transform>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Output keys of every call, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<Vec<ItemKey>> {
        self.calls.lock().clone()
    }

    /// Lead output key of every call, in call order.
    #[must_use]
    pub fn computed(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|outputs| outputs.first().map(ToString::to_string))
            .collect()
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Clears recorded calls.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl Transform for RecordingTransform {
    fn apply(&self, request: &TransformRequest<'_>) -> anyhow::Result<Produced> {
        self.calls.lock().push(request.outputs.to_vec());
        self.inner.apply(request)
    }
}

/// A transformation that fails for chosen items and copies the rest.
#[derive(Debug)]
pub struct FailingTransform {
    keys: Option<BTreeSet<ItemKey>>,
    message: String,
}

impl FailingTransform {
    /// Fails every unit.
    #[must_use]
    pub fn always() -> Self {
        Self {
            keys: None,
            message: "injected failure".to_string(),
        }
    }

    /// Fails units reading or producing any of `keys`.
    #[must_use]
    pub fn on<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<ItemKey>,
    {
        Self {
            keys: Some(key_set(keys)),
            ..Self::always()
        }
    }

    /// Sets the error message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl Transform for FailingTransform {
    fn apply(&self, request: &TransformRequest<'_>) -> anyhow::Result<Produced> {
        if self.keys.as_ref().map_or(true, |keys| touches(keys, request)) {
            anyhow::bail!("{}", self.message);
        }
        CopyTransform.apply(request)
    }
}

/// A transformation that blocks its worker thread before copying.
#[derive(Debug)]
pub struct SlowTransform {
    delay: Duration,
    keys: Option<BTreeSet<ItemKey>>,
}

impl SlowTransform {
    /// Delays every unit.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay, keys: None }
    }

    /// Creates a slow transform with delay in milliseconds.
    #[must_use]
    pub const fn with_delay_ms(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Delays only units touching `keys`.
    #[must_use]
    pub fn only<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<ItemKey>,
    {
        self.keys = Some(key_set(keys));
        self
    }
}

impl Transform for SlowTransform {
    fn apply(&self, request: &TransformRequest<'_>) -> anyhow::Result<Produced> {
        if self.keys.as_ref().map_or(true, |keys| touches(keys, request)) {
            std::thread::sleep(self.delay);
        }
        CopyTransform.apply(request)
    }
}

/// A transformation that panics for chosen items.
#[derive(Debug)]
pub struct PanickingTransform {
    keys: BTreeSet<ItemKey>,
}

impl PanickingTransform {
    /// Panics on units touching `keys`.
    #[must_use]
    pub fn on<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<ItemKey>,
    {
        Self { keys: key_set(keys) }
    }
}

impl Transform for PanickingTransform {
    fn apply(&self, request: &TransformRequest<'_>) -> anyhow::Result<Produced> {
        assert!(!touches(&self.keys, request), "corrupt cube header");
        CopyTransform.apply(request)
    }
}
