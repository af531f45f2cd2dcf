//! Built-in deterministic backend producing placeholder images.

use std::sync::Arc;

use anyhow::Result;
use image::{DynamicImage, ImageBuffer, Rgb};

use crate::{GenerationRequest, ImageModel, ModelLoader};

/// Generates seeded gradient images without any model weights. Stands in
/// for a diffusion pipeline wherever real inference is unavailable, and
/// doubles as the base for test doubles.
pub struct PreviewModel {
    model_id: String,
}

impl PreviewModel {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

impl ImageModel for PreviewModel {
    fn generate(&self, request: &GenerationRequest) -> Result<DynamicImage> {
        let width = request.width();
        let height = request.height();

        // Same (model, prompt, seed) always yields the same pixels.
        let mut state = fnv1a(self.model_id.as_bytes());
        state = fnv1a_with(state, request.prompt.as_bytes());
        if let Some(negative) = &request.negative_prompt {
            state = fnv1a_with(state, negative.as_bytes());
        }
        state = fnv1a_with(state, &request.seed.unwrap_or(0).to_le_bytes());

        let base = [
            (state >> 16) as u8,
            (state >> 32) as u8,
            (state >> 48) as u8,
        ];
        let buffer = ImageBuffer::from_fn(width, height, |x, y| {
            let fx = x as f32 / width.max(1) as f32;
            let fy = y as f32 / height.max(1) as f32;
            Rgb([
                shade(base[0], fx),
                shade(base[1], fy),
                shade(base[2], (fx + fy) / 2.0),
            ])
        });
        Ok(DynamicImage::ImageRgb8(buffer))
    }
}

/// Loader handing out [`PreviewModel`] handles.
pub struct PreviewLoader;

impl ModelLoader for PreviewLoader {
    fn load(&self, model_id: &str) -> Result<Arc<dyn ImageModel>> {
        Ok(Arc::new(PreviewModel::new(model_id)))
    }
}

fn shade(base: u8, t: f32) -> u8 {
    let range = 255.0 - f32::from(base);
    (f32::from(base) + range * t.clamp(0.0, 1.0)) as u8
}

fn fnv1a(bytes: &[u8]) -> u64 {
    fnv1a_with(0xcbf2_9ce4_8422_2325, bytes)
}

fn fnv1a_with(mut state: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        state ^= u64::from(*byte);
        state = state.wrapping_mul(0x100_0000_01b3);
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_matches_requested_dimensions() {
        let model = PreviewModel::new("preview");
        let mut request = GenerationRequest::new("a house");
        request.width = Some(64);
        request.height = Some(32);
        let image = model.generate(&request).unwrap();
        assert_eq!(image.width(), 64);
        assert_eq!(image.height(), 32);
    }

    #[test]
    fn deterministic_for_identical_requests() {
        let model = PreviewModel::new("preview");
        let mut request = GenerationRequest::new("a car");
        request.width = Some(16);
        request.height = Some(16);
        request.seed = Some(42);
        let first = model.generate(&request).unwrap();
        let second = model.generate(&request).unwrap();
        assert_eq!(first.into_rgb8().as_raw(), second.into_rgb8().as_raw());
    }

    #[test]
    fn seed_changes_the_image() {
        let model = PreviewModel::new("preview");
        let mut request = GenerationRequest::new("a tree");
        request.width = Some(16);
        request.height = Some(16);
        request.seed = Some(1);
        let first = model.generate(&request).unwrap();
        request.seed = Some(2);
        let second = model.generate(&request).unwrap();
        assert_ne!(first.into_rgb8().as_raw(), second.into_rgb8().as_raw());
    }
}
