use super::{MediaError, MediaSource};
use crate::config::SourceKind;
use crate::surface::Surface;
use crate::sync::{CancellationToken, DoubleBuffer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

type ImageList = Vec<Arc<Surface>>;

/// A slideshow over still images.
///
/// The first `preload` images decode before `open` returns; the rest load on
/// a background thread and become reachable as they arrive. Navigation only
/// ever wraps over the images loaded so far.
pub struct ImageSource {
    shared: Arc<DoubleBuffer<ImageList>>,
    loaded: ImageList,
    requested: usize,
    shown: Option<usize>,
    resolution: (u32, u32),
    total: usize,
    token: CancellationToken,
    loader: Option<JoinHandle<()>>,
}

impl ImageSource {
    pub fn open(paths: &[PathBuf], preload: usize) -> Result<Self, MediaError> {
        if paths.is_empty() {
            return Err(MediaError::NoInput);
        }

        let preload = preload.clamp(1, paths.len());
        let mut initial = ImageList::with_capacity(paths.len());
        for path in &paths[..preload] {
            if let Some(surface) = load(path) {
                initial.push(Arc::new(surface));
            }
        }

        let remaining = paths[preload..].to_vec();
        if initial.is_empty() && remaining.is_empty() {
            return Err(MediaError::NoImages(paths.len()));
        }

        let shared = Arc::new(DoubleBuffer::new(initial.clone()));
        let token = CancellationToken::new();

        let loader = if remaining.is_empty() {
            None
        } else {
            let shared = Arc::clone(&shared);
            let token = token.clone();
            let handle = thread::Builder::new()
                .name("image-loader".into())
                .spawn(move || load_remaining(&remaining, &shared, &token))
                .map_err(|source| MediaError::Spawn { name: "image-loader", source })?;
            Some(handle)
        };

        let mut source = Self {
            shared,
            loaded: initial,
            requested: 0,
            shown: None,
            resolution: (0, 0),
            total: paths.len(),
            token,
            loader,
        };

        // Every preload failed; block for the first background image
        if source.loaded.is_empty() {
            source.wait_for_first()?;
        }
        source.resolution = source.loaded[0].resolution();

        Ok(source)
    }

    pub fn loaded_count(&mut self) -> usize {
        self.refresh();
        self.loaded.len()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn current_index(&self) -> usize {
        self.requested
    }

    pub fn is_loading(&self) -> bool {
        self.loader.as_ref().is_some_and(|l| !l.is_finished())
    }

    fn refresh(&mut self) {
        self.shared.swap_into(&mut self.loaded);
    }

    fn wait_for_first(&mut self) -> Result<(), MediaError> {
        loop {
            self.refresh();
            if !self.loaded.is_empty() {
                return Ok(());
            }
            if !self.is_loading() {
                // One last look in case the loader finished between checks
                self.refresh();
                if self.loaded.is_empty() {
                    return Err(MediaError::NoImages(self.total));
                }
                return Ok(());
            }
            self.token.wait_timeout(std::time::Duration::from_millis(5));
        }
    }
}

impl MediaSource for ImageSource {
    fn update(&mut self) -> Option<&Surface> {
        self.refresh();
        if self.shown == Some(self.requested) {
            return None;
        }
        let surface = self.loaded.get(self.requested)?;
        self.shown = Some(self.requested);
        Some(surface.as_ref())
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn set_index(&mut self, delta: i32) {
        self.refresh();
        let count = self.loaded.len() as i64;
        if count == 0 {
            return;
        }
        self.requested = (self.requested as i64 + i64::from(delta)).rem_euclid(count) as usize;
        debug!("image {} of {} loaded", self.requested + 1, count);
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Images
    }
}

impl Drop for ImageSource {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(loader) = self.loader.take() {
            if loader.join().is_err() {
                warn!("image loader panicked");
            }
        }
    }
}

fn load(path: &Path) -> Option<Surface> {
    match Surface::load(path) {
        Ok(surface) => {
            if !surface.is_power_of_two() {
                warn!(
                    "{} is {}x{}, not a power of two; some GPUs will not display it",
                    path.display(),
                    surface.width(),
                    surface.height()
                );
            }
            Some(surface)
        }
        Err(e) => {
            warn!("skipping image: {}", e);
            None
        }
    }
}

fn load_remaining(paths: &[PathBuf], shared: &DoubleBuffer<ImageList>, token: &CancellationToken) {
    let started = Instant::now();
    let mut count = 0usize;

    for path in paths {
        if token.is_cancelled() {
            debug!("image loading cancelled after {} images", count);
            return;
        }
        if let Some(surface) = load(path) {
            let surface = Arc::new(surface);
            shared.write(|list| list.push(surface));
            count += 1;
        }
    }

    info!("loaded {} background images in {:?}", count, started.elapsed());
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    fn write_images(dir: &TempDir, shades: &[u8]) -> Vec<PathBuf> {
        shades
            .iter()
            .enumerate()
            .map(|(i, &shade)| {
                let path = dir.path().join(format!("{}.png", i));
                RgbaImage::from_pixel(4, 2, Rgba([shade, shade, shade, 255]))
                    .save(&path)
                    .unwrap();
                path
            })
            .collect()
    }

    fn shade(surface: &Surface) -> u8 {
        surface.pixel(0, 0).unwrap()[0]
    }

    #[test]
    fn test_navigation_wraps_over_loaded_images() {
        let dir = TempDir::new().unwrap();
        let paths = write_images(&dir, &[10, 20, 30]);
        let mut source = ImageSource::open(&paths, 3).unwrap();

        assert_eq!(source.update().map(shade), Some(10));
        assert!(source.update().is_none());

        let mut seen = Vec::new();
        for delta in [1, 1, -1] {
            source.set_index(delta);
            seen.push(source.current_index());
            assert!(source.update().is_some());
        }
        assert_eq!(seen, vec![1, 2, 1]);

        source.set_index(2);
        assert_eq!(source.current_index(), 0);
        source.set_index(-1);
        assert_eq!(source.update().map(shade), Some(30));
    }

    #[test]
    fn test_background_loading_extends_navigation() {
        let dir = TempDir::new().unwrap();
        let paths = write_images(&dir, &[1, 2, 3, 4]);
        let mut source = ImageSource::open(&paths, 1).unwrap();
        assert_eq!(source.resolution(), (4, 2));

        let deadline = Instant::now() + std::time::Duration::from_secs(10);
        while source.loaded_count() < 4 {
            assert!(Instant::now() < deadline, "background loading stalled");
            thread::sleep(std::time::Duration::from_millis(5));
        }

        source.set_index(-1);
        assert_eq!(source.update().map(shade), Some(4));
    }

    #[test]
    fn test_undecodable_images_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut paths = write_images(&dir, &[50]);
        let broken = dir.path().join("broken.png");
        std::fs::write(&broken, b"not an image").unwrap();
        paths.insert(0, broken);

        let mut source = ImageSource::open(&paths, 2).unwrap();
        assert_eq!(source.loaded_count(), 1);
        assert_eq!(source.update().map(shade), Some(50));
    }

    #[test]
    fn test_no_loadable_images_is_fatal() {
        let dir = TempDir::new().unwrap();
        let broken = dir.path().join("broken.png");
        std::fs::write(&broken, b"still not an image").unwrap();
        let missing = dir.path().join("missing.png");

        assert!(matches!(
            ImageSource::open(&[broken, missing], 1),
            Err(MediaError::NoImages(2))
        ));
        assert!(matches!(ImageSource::open(&[], 1), Err(MediaError::NoInput)));
    }
}
