use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Refill-on-empty shuffled deck over a snapshot of node names taken at
/// shuffle time, grounded in `troup/node.py`'s `RandomBuffer`: a uniform
/// permutation consumed in order is a better fanout sample than independent
/// draws, since it guarantees every member is visited once per full pass.
pub struct RandomBuffer {
    buffer: Vec<String>,
    rng: SmallRng,
}

impl RandomBuffer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            rng: SmallRng::from_entropy(),
        }
    }

    /// Draws `n` names, reshuffling a fresh copy of `current_members` into
    /// the deck as many times as needed to satisfy the request.
    pub fn next(&mut self, n: usize, current_members: &[String]) -> Vec<String> {
        if current_members.is_empty() {
            return Vec::new();
        }
        while self.buffer.len() < n {
            let mut batch = current_members.to_vec();
            batch.shuffle(&mut self.rng);
            self.buffer.extend(batch);
        }
        self.buffer.drain(..n).collect()
    }
}

impl Default for RandomBuffer {
    fn default() -> Self {
        Self::new()
    }
}
