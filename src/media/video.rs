use super::{MediaError, MediaSource};
use crate::config::SourceKind;
use crate::surface::Surface;
use crate::sync::{BackBuffer, CancellationToken, DoubleBuffer};
use image::codecs::gif::GifDecoder;
use image::imageops::{self, FilterType};
use image::AnimationDecoder;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Shortest delay honoured between animation frames.
pub const MIN_FRAME_DELAY: Duration = Duration::from_millis(20);

/// Where a decoder thread writes its frames. Each [`FrameSink::lock`] holds
/// the back buffer for exactly one frame and publishes it on drop.
#[derive(Clone)]
pub struct FrameSink {
    buffer: Arc<DoubleBuffer<Surface>>,
    resolution: (u32, u32),
}

impl FrameSink {
    pub fn new(buffer: Arc<DoubleBuffer<Surface>>, resolution: (u32, u32)) -> Self {
        Self { buffer, resolution }
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    pub fn lock(&self) -> BackBuffer<'_, Surface> {
        self.buffer.lock()
    }
}

/// Decodes one file into a [`FrameSink`] on its own thread, looping until
/// stopped.
pub trait VideoPlayer {
    fn play(&mut self, path: &Path, sink: FrameSink) -> Result<(), MediaError>;
    fn stop(&mut self);
}

/// A video playlist. The render thread copies the latest decoded frame out
/// on every update whether or not a new one arrived.
pub struct VideoSource<P: VideoPlayer> {
    player: P,
    playlist: Vec<PathBuf>,
    index: usize,
    buffer: Arc<DoubleBuffer<Surface>>,
    front: Surface,
}

impl<P: VideoPlayer> VideoSource<P> {
    pub fn open(mut player: P, playlist: &[PathBuf], resolution: (u32, u32)) -> Result<Self, MediaError> {
        if playlist.is_empty() {
            return Err(MediaError::NoInput);
        }

        let (width, height) = resolution;
        let black = Surface::filled(width, height, [0, 0, 0, 255]);
        let buffer = Arc::new(DoubleBuffer::new(black.clone()));

        player.play(&playlist[0], FrameSink::new(Arc::clone(&buffer), resolution))?;
        info!("playing {} ({} in playlist)", playlist[0].display(), playlist.len());

        Ok(Self {
            player,
            playlist: playlist.to_vec(),
            index: 0,
            buffer,
            front: black,
        })
    }

    pub fn current(&self) -> &Path {
        &self.playlist[self.index]
    }

    pub fn current_index(&self) -> usize {
        self.index
    }
}

impl<P: VideoPlayer> MediaSource for VideoSource<P> {
    fn update(&mut self) -> Option<&Surface> {
        self.buffer.copy_into(&mut self.front);
        Some(&self.front)
    }

    fn resolution(&self) -> (u32, u32) {
        self.front.resolution()
    }

    fn set_index(&mut self, delta: i32) {
        if delta == 0 {
            return;
        }
        let count = self.playlist.len() as i64;
        self.index = (self.index as i64 + i64::from(delta)).rem_euclid(count) as usize;

        self.player.stop();
        let sink = FrameSink::new(Arc::clone(&self.buffer), self.front.resolution());
        match self.player.play(&self.playlist[self.index], sink) {
            Ok(()) => info!("playing {}", self.playlist[self.index].display()),
            Err(e) => error!("{}", e),
        }
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Video
    }
}

impl<P: VideoPlayer> Drop for VideoSource<P> {
    fn drop(&mut self) {
        self.player.stop();
    }
}

/// Plays animated GIFs with the `image` crate, scaled to the sink size.
#[derive(Default)]
pub struct GifPlayer {
    token: Option<CancellationToken>,
    worker: Option<JoinHandle<()>>,
}

impl GifPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_playing(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }
}

impl VideoPlayer for GifPlayer {
    fn play(&mut self, path: &Path, sink: FrameSink) -> Result<(), MediaError> {
        self.stop();

        // Fail now rather than on the decoder thread
        File::open(path).map_err(|source| MediaError::Video {
            path: path.to_path_buf(),
            source,
        })?;

        let token = CancellationToken::new();
        let thread_token = token.clone();
        let path = path.to_path_buf();
        let worker = thread::Builder::new()
            .name("gif-player".into())
            .spawn(move || play_loop(&path, &sink, &thread_token))
            .map_err(|source| MediaError::Spawn { name: "gif-player", source })?;

        self.token = Some(token);
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("gif player panicked");
            }
        }
    }
}

impl Drop for GifPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn play_loop(path: &Path, sink: &FrameSink, token: &CancellationToken) {
    let mut passes = 0u64;

    loop {
        let decoder = match File::open(path)
            .map_err(image::ImageError::IoError)
            .and_then(|file| GifDecoder::new(BufReader::new(file)))
        {
            Ok(decoder) => decoder,
            Err(e) => {
                error!("cannot decode {}: {}", path.display(), e);
                return;
            }
        };

        let mut frames = 0u64;
        for frame in decoder.into_frames() {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("{}: {}", path.display(), e);
                    break;
                }
            };

            let (numer, denom) = frame.delay().numer_denom_ms();
            let delay = Duration::from_millis(u64::from(numer) / u64::from(denom.max(1))).max(MIN_FRAME_DELAY);

            let (width, height) = sink.resolution();
            let mut image = frame.into_buffer();
            if image.dimensions() != (width, height) {
                image = imageops::resize(&image, width, height, FilterType::Triangle);
            }

            {
                let mut back = sink.lock();
                if back.resolution() == (width, height) {
                    back.pixels_mut().copy_from_slice(image.as_raw());
                } else {
                    *back = Surface::from(image);
                }
            }
            frames += 1;

            if token.wait_timeout(delay) {
                debug!("{} stopped after {} passes", path.display(), passes);
                return;
            }
        }

        if frames == 0 {
            warn!("{} has no frames", path.display());
            return;
        }
        passes += 1;
    }
}
