//! The rendering seam.
//!
//! A [`Display`] receives the projection uniforms once, every new source
//! frame as a texture upload, and one render call per tick with the current
//! rotation. The GPU backend lives outside this crate.

use crate::config::ProjectionUniforms;
use crate::surface::Surface;
use serde::Serialize;
use tracing::{debug, trace};

pub trait Display {
    fn configure(&mut self, uniforms: &ProjectionUniforms);
    fn upload(&mut self, surface: &Surface);
    /// Draw one frame. `rotation` is (horizontal, vertical) in radians.
    fn render(&mut self, rotation: [f32; 2]);
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct DisplayStats {
    pub uploads: u64,
    pub renders: u64,
}

/// A display that draws nothing. Keeps the last upload and rotation so a
/// session can run without a window.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    uniforms: Option<ProjectionUniforms>,
    texture: Option<Surface>,
    rotation: [f32; 2],
    stats: DisplayStats,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uniforms(&self) -> Option<&ProjectionUniforms> {
        self.uniforms.as_ref()
    }

    pub fn texture(&self) -> Option<&Surface> {
        self.texture.as_ref()
    }

    pub fn rotation(&self) -> [f32; 2] {
        self.rotation
    }

    pub fn stats(&self) -> DisplayStats {
        self.stats
    }
}

impl Display for HeadlessDisplay {
    fn configure(&mut self, uniforms: &ProjectionUniforms) {
        debug!("headless display configured: {:?}", uniforms);
        self.uniforms = Some(*uniforms);
    }

    fn upload(&mut self, surface: &Surface) {
        match &mut self.texture {
            Some(texture) => texture.clone_from(surface),
            None => self.texture = Some(surface.clone()),
        }
        self.stats.uploads += 1;
    }

    fn render(&mut self, rotation: [f32; 2]) {
        trace!("render at {:?}", rotation);
        self.rotation = rotation;
        self.stats.renders += 1;
    }
}
