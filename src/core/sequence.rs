//! Append-only, time-ordered sample storage for one sampling session.

use crate::collector::types::ContinuousSample;

/// The ordered samples of a session.
///
/// Elapsed offsets are strictly increasing: a sample whose offset does not
/// move past the previous one is bumped to `previous + 1` ms on append.
#[derive(Debug, Clone, Default)]
pub struct SampleSequence {
    samples: Vec<ContinuousSample>,
}

impl SampleSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample, fixing up its index and elapsed offset.
    /// Returns a reference to the stored sample.
    pub fn push(&mut self, mut sample: ContinuousSample) -> &ContinuousSample {
        sample.index = self.samples.len() as u64;
        if let Some(last) = self.samples.last() {
            if sample.elapsed_ms <= last.elapsed_ms {
                sample.elapsed_ms = last.elapsed_ms + 1;
            }
        }
        self.samples.push(sample);
        &self.samples[self.samples.len() - 1]
    }

    pub fn as_slice(&self) -> &[ContinuousSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drop every sample. Only a session reset does this.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::Reading;
    use chrono::Utc;

    fn sample(elapsed_ms: u64) -> ContinuousSample {
        ContinuousSample {
            index: 99,
            elapsed_ms,
            captured_at: Utc::now(),
            network: Reading::unavailable("test"),
            memory: Reading::unavailable("test"),
            activity: Reading::unavailable("test"),
            battery: Reading::unavailable("test"),
        }
    }

    #[test]
    fn test_push_assigns_indices() {
        let mut seq = SampleSequence::new();
        seq.push(sample(0));
        seq.push(sample(10));
        let indices: Vec<u64> = seq.as_slice().iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_push_keeps_elapsed_strictly_increasing() {
        let mut seq = SampleSequence::new();
        seq.push(sample(100));
        seq.push(sample(100));
        seq.push(sample(50));
        let elapsed: Vec<u64> = seq.as_slice().iter().map(|s| s.elapsed_ms).collect();
        assert_eq!(elapsed, vec![100, 101, 102]);
    }

    #[test]
    fn test_clear() {
        let mut seq = SampleSequence::new();
        seq.push(sample(500));
        seq.clear();
        assert!(seq.is_empty());

        let first = seq.push(sample(0));
        assert_eq!(first.index, 0);
        assert_eq!(first.elapsed_ms, 0);
    }
}
