use std::sync::Arc;

use anyhow::Result;

use crate::ImageModel;

/// Constructs [`ImageModel`] handles by id.
///
/// This is the seam where a real diffusion backend plugs in: the cache is
/// generic over the loader, so tests and the built-in preview backend slot
/// in the same way a candle pipeline would. Loading is blocking and may be
/// arbitrarily slow; the cache runs it off the async runtime.
pub trait ModelLoader: Send + Sync + 'static {
    fn load(&self, model_id: &str) -> Result<Arc<dyn ImageModel>>;
}
