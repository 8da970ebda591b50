// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Cooperative shutdown flag for the compaction worker thread (spec §4.7).

use std::sync::{atomic::AtomicBool, Arc};

/// A cloneable flag a compactor thread polls between shifts to know when to
/// exit.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// Requests that the holder of this signal stop at its next opportunity.
    pub fn send(&self) {
        self.0.store(true, std::sync::atomic::Ordering::Release);
    }

    /// Whether `send` has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn starts_unstopped_and_latches_after_send() {
        let signal = StopSignal::default();
        assert!(!signal.is_stopped());

        let clone = signal.clone();
        clone.send();

        assert!(signal.is_stopped());
    }
}
