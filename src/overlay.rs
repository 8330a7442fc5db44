//! Satellite trail canvas.
//!
//! Trails accumulate on a persistent pixmap seeded from the base map.
//! Markers are drawn on a scratch copy each cycle so they never smear into
//! the trail.

use crate::protocol::Visibility;
use crate::surface::Surface;
use crate::tracking::Satellite;
use thiserror::Error;
use tiny_skia::{
    ColorU8, FillRule, LineCap, Paint, PathBuilder, Pixmap, PixmapPaint, Stroke, Transform,
};

pub const TRAIL_WIDTH: f32 = 5.0;
pub const VISIBLE_COLOR: [u8; 4] = [0x00, 0xFF, 0x00, 0x66];
pub const HIDDEN_COLOR: [u8; 4] = [0xFF, 0x00, 0x00, 0x66];
const DOT_COLOR: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];
const DOT_RADIUS: f32 = 3.0;
const DEFAULT_MARKER_RADIUS: f32 = 8.0;

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("cannot create a {0}x{1} canvas")]
    Size(u32, u32),
}

pub struct TrailCanvas {
    trail: Pixmap,
    scratch: Pixmap,
    icon: Option<Pixmap>,
    marker_radius: f32,
}

impl TrailCanvas {
    pub fn new(base: &Surface, icon: Option<&Surface>) -> Result<Self, OverlayError> {
        let trail = pixmap_from_surface(base)?;
        let scratch = trail.clone();
        let icon = icon.map(pixmap_from_surface).transpose()?;
        let marker_radius = icon
            .as_ref()
            .map_or(DEFAULT_MARKER_RADIUS, |i| i.width() as f32 / 2.0);

        Ok(Self {
            trail,
            scratch,
            icon,
            marker_radius,
        })
    }

    pub fn width(&self) -> u32 {
        self.trail.width()
    }

    pub fn height(&self) -> u32 {
        self.trail.height()
    }

    /// Stroke one trail segment into the persistent canvas.
    pub fn draw_segment(&mut self, from: (i32, i32), to: (i32, i32), visibility: Visibility) {
        let mut builder = PathBuilder::new();
        builder.move_to(from.0 as f32, from.1 as f32);
        builder.line_to(to.0 as f32, to.1 as f32);
        let Some(path) = builder.finish() else {
            return;
        };

        let stroke = Stroke {
            width: TRAIL_WIDTH,
            line_cap: LineCap::Round,
            ..Stroke::default()
        };
        let paint = solid_paint(visibility_color(visibility));
        self.trail
            .stroke_path(&path, &paint, &stroke, Transform::identity(), None);
    }

    /// Refresh the scratch canvas from the trail and draw every located
    /// satellite's marker on top.
    pub fn compose(&mut self, satellites: &[Satellite]) {
        self.scratch.data_mut().copy_from_slice(self.trail.data());

        for satellite in satellites {
            let Some((x, y)) = satellite.position else {
                continue;
            };
            let (x, y) = (x as f32, y as f32);

            if satellite.visibility == Visibility::Visible {
                self.fill_circle(x, y, self.marker_radius, VISIBLE_COLOR);
            }

            match &self.icon {
                Some(icon) => {
                    let left = (x - icon.width() as f32 / 2.0).round() as i32;
                    let top = (y - icon.height() as f32 / 2.0).round() as i32;
                    self.scratch.draw_pixmap(
                        left,
                        top,
                        icon.as_ref(),
                        &PixmapPaint::default(),
                        Transform::identity(),
                        None,
                    );
                }
                None => self.fill_circle(x, y, DOT_RADIUS, DOT_COLOR),
            }
        }
    }

    /// Write the last composed canvas into `out`, resizing it if needed.
    pub fn copy_into(&self, out: &mut Surface) {
        copy_pixmap_into(&self.scratch, out);
    }

    /// The trail layer alone, without markers.
    pub fn trail_surface(&self) -> Surface {
        let mut out = Surface::new(self.width(), self.height());
        copy_pixmap_into(&self.trail, &mut out);
        out
    }

    fn fill_circle(&mut self, x: f32, y: f32, radius: f32, rgba: [u8; 4]) {
        if let Some(circle) = PathBuilder::from_circle(x, y, radius) {
            self.scratch.fill_path(
                &circle,
                &solid_paint(rgba),
                FillRule::Winding,
                Transform::identity(),
                None,
            );
        }
    }
}

fn visibility_color(visibility: Visibility) -> [u8; 4] {
    match visibility {
        Visibility::Visible => VISIBLE_COLOR,
        Visibility::Hidden => HIDDEN_COLOR,
    }
}

fn solid_paint(rgba: [u8; 4]) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(rgba[0], rgba[1], rgba[2], rgba[3]);
    paint.anti_alias = true;
    paint
}

fn pixmap_from_surface(surface: &Surface) -> Result<Pixmap, OverlayError> {
    let mut pixmap = Pixmap::new(surface.width(), surface.height())
        .ok_or(OverlayError::Size(surface.width(), surface.height()))?;

    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(surface.pixels().chunks_exact(4)) {
        *dst = ColorU8::from_rgba(src[0], src[1], src[2], src[3]).premultiply();
    }
    Ok(pixmap)
}

fn copy_pixmap_into(pixmap: &Pixmap, out: &mut Surface) {
    if out.resolution() != (pixmap.width(), pixmap.height()) {
        *out = Surface::new(pixmap.width(), pixmap.height());
    }

    for (dst, src) in out.pixels_mut().chunks_exact_mut(4).zip(pixmap.pixels()) {
        let color = src.demultiply();
        dst.copy_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
    }
}
