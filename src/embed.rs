//! Text embedding capability for transcript conditioning.
//!
//! Not on the feeding hot path. A real embedder is loaded once at startup
//! and shared; [`ZeroEmbedder`] is the stand-in.

use tracing::info;

/// Width of the word vectors used for transcripts.
pub const EMBEDDING_DIM: usize = 300;

pub trait TextEmbedder: Send + Sync {
    fn dim(&self) -> usize;

    /// Fixed-length vector of `dim()` values.
    fn embed(&self, text: &str) -> Vec<f32>;

    fn zeros(&self) -> Vec<f32> {
        vec![0.0; self.dim()]
    }
}

/// Embeds every text as the zero vector.
#[derive(Clone, Copy, Debug)]
pub struct ZeroEmbedder {
    dim: usize,
}

impl ZeroEmbedder {
    pub fn load(dim: usize) -> Self {
        info!("[feeder:embed] zero embedder loaded (dim={})", dim);
        Self { dim }
    }
}

impl Default for ZeroEmbedder {
    fn default() -> Self {
        Self { dim: EMBEDDING_DIM }
    }
}

impl TextEmbedder for ZeroEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, _text: &str) -> Vec<f32> {
        self.zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_embedder() {
        let embedder = ZeroEmbedder::load(8);
        let v = embedder.embed("Please call Stella.");
        assert_eq!(v.len(), 8);
        assert!(v.iter().all(|&x| x == 0.0));
        assert_eq!(ZeroEmbedder::default().dim(), EMBEDDING_DIM);
    }
}
