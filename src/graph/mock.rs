//! Recording view sink for testing.
//!
//! Keeps every published view in memory instead of handing it to a renderer.

use anyhow::Result;
use std::sync::{Arc, Mutex};

use super::engine::{DerivedView, ViewSink};

/// `ViewSink` that stores published views.
///
/// Clones share the same buffer, so a test can keep one handle while the
/// other is moved into a session.
#[derive(Clone, Default)]
pub struct RecordingSink {
    views: Arc<Mutex<Vec<DerivedView>>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every publish fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Copies of all views published so far.
    pub fn views(&self) -> Vec<DerivedView> {
        self.views.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<DerivedView> {
        self.views().pop()
    }

    pub fn len(&self) -> usize {
        self.views.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ViewSink for RecordingSink {
    fn publish(&mut self, view: &DerivedView) -> Result<()> {
        if self.fail {
            anyhow::bail!("renderer unavailable");
        }
        self.views
            .lock()
            .map_err(|_| anyhow::anyhow!("recording sink poisoned"))?
            .push(view.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::engine::ViewEngine;

    #[test]
    fn test_clones_share_buffer() {
        let sink = RecordingSink::new();
        let mut handle = sink.clone();
        handle.publish(&ViewEngine::default().view()).unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.last().unwrap().updates, 0);
    }

    #[test]
    fn test_failing_sink() {
        let mut sink = RecordingSink::failing();
        assert!(sink.publish(&ViewEngine::default().view()).is_err());
        assert_eq!(sink.len(), 0);
    }
}
