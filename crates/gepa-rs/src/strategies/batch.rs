use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Epoch-shuffled minibatch sampling over the training set.
///
/// Maintains a shuffled permutation of `0..trainset_size` and serves the next
/// `minibatch_size` indices per iteration. When fewer than a full batch
/// remain, the batch takes the remainder and tops up from a freshly shuffled
/// next epoch, so every example is seen once per epoch and the batch size
/// stays constant.
///
/// Calling [`next_minibatch`] twice with the same iteration returns the same
/// indices — the proposers rely on this to evaluate parent and child on
/// identical data.
///
/// [`next_minibatch`]: EpochShuffledBatchSampler::next_minibatch
#[derive(Debug)]
pub struct EpochShuffledBatchSampler {
    minibatch_size: usize,
    rng: StdRng,
    order: Vec<usize>,
    cursor: usize,
    last: Option<(usize, Vec<usize>)>,
}

impl EpochShuffledBatchSampler {
    pub fn new(minibatch_size: usize, rng: StdRng) -> Self {
        Self {
            minibatch_size: minibatch_size.max(1),
            rng,
            order: Vec::new(),
            cursor: 0,
            last: None,
        }
    }

    #[tracing::instrument(
        name = "gepa.strategies.batch_sampler",
        level = "debug",
        skip(self),
        fields(strategy = "epoch_shuffled", iteration)
    )]
    pub fn next_minibatch(&mut self, trainset_size: usize, iteration: usize) -> Vec<usize> {
        if let Some((cached_iteration, indices)) = &self.last
            && *cached_iteration == iteration
        {
            return indices.clone();
        }

        let batch_size = self.minibatch_size.min(trainset_size);
        if self.order.len() != trainset_size {
            self.reshuffle(trainset_size);
        }

        let mut indices = Vec::with_capacity(batch_size);
        while indices.len() < batch_size {
            if self.cursor >= self.order.len() {
                self.reshuffle(trainset_size);
            }
            indices.push(self.order[self.cursor]);
            self.cursor += 1;
        }

        tracing::debug!(batch = ?indices, "minibatch sampled");
        self.last = Some((iteration, indices.clone()));
        indices
    }

    fn reshuffle(&mut self, trainset_size: usize) {
        self.order = (0..trainset_size).collect();
        self.order.shuffle(&mut self.rng);
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::collections::BTreeSet;

    fn sampler(batch: usize, seed: u64) -> EpochShuffledBatchSampler {
        EpochShuffledBatchSampler::new(batch, StdRng::seed_from_u64(seed))
    }

    #[test]
    fn same_iteration_returns_same_indices() {
        let mut s = sampler(2, 7);
        let first = s.next_minibatch(5, 1);
        assert_eq!(s.next_minibatch(5, 1), first);
        assert_ne!(s.next_minibatch(5, 2), first);
    }

    #[test]
    fn epoch_covers_every_example() {
        let mut s = sampler(2, 7);
        let seen: BTreeSet<usize> = (1..=3).flat_map(|i| s.next_minibatch(6, i)).collect();
        assert_eq!(seen, (0..6).collect());
    }

    #[test]
    fn batch_is_capped_at_trainset_size() {
        let mut s = sampler(8, 7);
        let batch = s.next_minibatch(3, 1);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn identical_seeds_replay_identical_schedules() {
        let mut a = sampler(3, 42);
        let mut b = sampler(3, 42);
        for i in 1..=10 {
            assert_eq!(a.next_minibatch(7, i), b.next_minibatch(7, i));
        }
    }
}
