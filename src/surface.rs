use image::RgbaImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const BYTES_PER_PIXEL: usize = 4;

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("failed to load image {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("image {path} has zero size")]
    Empty { path: PathBuf },
}

/// An RGBA8 raster (straight alpha, row-major, no padding) ready to be
/// uploaded as a texture.
#[derive(Debug, PartialEq, Eq, Default)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Surface {
    /// A fully transparent surface.
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, [0, 0, 0, 0])
    }

    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * BYTES_PER_PIXEL);
        for _ in 0..count {
            pixels.extend_from_slice(&rgba);
        }
        Self { width, height, pixels }
    }

    /// Decode an image file of any format the `image` crate understands.
    pub fn load(path: &Path) -> Result<Self, SurfaceError> {
        let decoded = image::open(path).map_err(|source| SurfaceError::Load {
            path: path.to_path_buf(),
            source,
        })?;

        let surface = Self::from(decoded.into_rgba8());
        if surface.width == 0 || surface.height == 0 {
            return Err(SurfaceError::Empty { path: path.to_path_buf() });
        }
        Ok(surface)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let mut rgba = [0u8; 4];
        rgba.copy_from_slice(&self.pixels[offset..offset + BYTES_PER_PIXEL]);
        Some(rgba)
    }

    /// Textures on older GL drivers must have power-of-two sides.
    pub fn is_power_of_two(&self) -> bool {
        self.width.is_power_of_two() && self.height.is_power_of_two()
    }
}

impl Clone for Surface {
    fn clone(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            pixels: self.pixels.clone(),
        }
    }

    // Reuses the destination allocation; every per-frame copy goes through here.
    fn clone_from(&mut self, source: &Self) {
        self.width = source.width;
        self.height = source.height;
        self.pixels.clone_from(&source.pixels);
    }
}

impl From<RgbaImage> for Surface {
    fn from(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            pixels: image.into_raw(),
        }
    }
}
