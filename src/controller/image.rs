//! Resized images from the public directory.
//!
//! A request for `photos/cat-200x100.jpg` is served from `photos/cat.jpg`
//! resized to fit 200x100. The name suffix is `-<mode><width>[x<height>]`,
//! where mode is `c` (crop), `s` (scale) or `sc` (scale then crop, the
//! default). A missing height equals the width. Results are written under
//! `paths.cache` and regenerated when the source is newer.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use tracing::debug;

use super::{resolve_under, split_extension, Controller, Site};
use crate::core::{Error, Request, Response, Result};
use crate::environment::mtime_secs;

const JPEG_QUALITY: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Centered region of the requested size.
    Crop,
    /// Fit inside the box, keeping the aspect ratio.
    Scale,
    /// Crop to the box's aspect ratio, then resize.
    ScaleCrop,
}

impl Mode {
    fn parse(s: &str) -> Self {
        match s {
            "c" => Mode::Crop,
            "s" => Mode::Scale,
            _ => Mode::ScaleCrop,
        }
    }
}

/// Parsed `-<mode><width>[x<height>]` file name suffix.
#[derive(Debug, PartialEq, Eq)]
pub struct Resize<'a> {
    pub stem: &'a str,
    pub mode: Mode,
    pub width: u32,
    pub height: u32,
}

/// Split `cat-sc200x100` into the source stem and resize request.
pub fn parse_resize(name: &str) -> Option<Resize<'_>> {
    let dash = name.rfind('-')?;
    let (stem, suffix) = (&name[..dash], &name[dash + 1..]);

    let letters = suffix
        .find(|c: char| !c.is_ascii_lowercase())
        .unwrap_or(suffix.len());
    let (mode, rest) = suffix.split_at(letters);
    let (width, height) = match rest.split_once('x') {
        Some((w, h)) => (w, Some(h)),
        None => (rest, None),
    };

    let width = parse_digits(width)?;
    let height = match height {
        Some(h) => parse_digits(h)?,
        None => width,
    };
    Some(Resize {
        stem,
        mode: Mode::parse(mode),
        width,
        height,
    })
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Source region and output size for a resize.
#[derive(Debug, PartialEq, Eq)]
pub struct Plan {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub target: (u32, u32),
}

/// Plan a resize of an `old`-sized image into the requested box.
///
/// Images are never enlarged: each requested side is capped at the source's.
pub fn plan(mode: Mode, requested: (u32, u32), old: (u32, u32)) -> Plan {
    let (old_w, old_h) = (old.0.max(1), old.1.max(1));
    let new_w = requested.0.min(old_w).max(1);
    let new_h = requested.1.min(old_h).max(1);
    let old_ratio = old_w as f64 / old_h as f64;
    let new_ratio = new_w as f64 / new_h as f64;

    match mode {
        Mode::Crop => Plan {
            x: (old_w - new_w) / 2,
            y: (old_h - new_h) / 2,
            width: new_w,
            height: new_h,
            target: (new_w, new_h),
        },
        Mode::Scale => {
            let target = if new_ratio > old_ratio {
                ((new_h as f64 * old_ratio) as u32, new_h)
            } else if new_ratio < old_ratio {
                (new_w, (new_w as f64 / old_ratio) as u32)
            } else {
                (new_w, new_h)
            };
            Plan {
                x: 0,
                y: 0,
                width: old_w,
                height: old_h,
                target: (target.0.max(1), target.1.max(1)),
            }
        }
        Mode::ScaleCrop => {
            let (mut x, mut y) = (0, 0);
            if new_ratio > old_ratio {
                let keep = (old_w as f64 / new_ratio) as u32;
                y = old_h.saturating_sub(keep) / 2;
            } else if new_ratio < old_ratio {
                let keep = (old_h as f64 * new_ratio) as u32;
                x = old_w.saturating_sub(keep) / 2;
            }
            Plan {
                x,
                y,
                width: old_w - 2 * x,
                height: old_h - 2 * y,
                target: (new_w, new_h),
            }
        }
    }
}

fn resize(source: &Path, target: &Path, wanted: &Resize<'_>) -> Result<()> {
    let original = image::open(source).map_err(image_error)?;
    let plan = plan(
        wanted.mode,
        (wanted.width, wanted.height),
        (original.width(), original.height()),
    );

    let mut output = original.crop_imm(plan.x, plan.y, plan.width, plan.height);
    if (output.width(), output.height()) != plan.target {
        output = output.resize_exact(plan.target.0, plan.target.1, FilterType::Triangle);
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let format = ImageFormat::from_path(target).map_err(image_error)?;
    match format {
        ImageFormat::Jpeg => {
            let mut writer = BufWriter::new(fs::File::create(target)?);
            let encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
            DynamicImage::ImageRgb8(output.to_rgb8())
                .write_with_encoder(encoder)
                .map_err(image_error)?;
            writer.flush()?;
        }
        ImageFormat::Gif => DynamicImage::ImageRgba8(output.to_rgba8())
            .save_with_format(target, format)
            .map_err(image_error)?,
        _ => output.save_with_format(target, format).map_err(image_error)?,
    }

    debug!(source = %source.display(), target = %target.display(), ?plan, "image resized");
    Ok(())
}

fn image_error(err: image::ImageError) -> Error {
    Error::Internal(format!("image: {}", err))
}

pub struct ImageController {
    site: Site,
    path: String,
}

impl ImageController {
    pub fn new(site: Site) -> Self {
        Self {
            site,
            path: String::new(),
        }
    }
}

impl Controller for ImageController {
    fn bootstrap(&mut self, _method: &str, path: &str) -> Result<()> {
        self.path = path.to_string();
        Ok(())
    }

    fn respond(&mut self, _request: &Request) -> Result<Response> {
        let env = &self.site.env;
        let public = env.dir("pub");
        let file = resolve_under(&public, &self.path)?;
        let mut response = Response::new(env);

        // An existing file always wins over a resize of its namesake.
        if file.is_file() {
            response.set_file(&file, env)?;
            return Ok(response);
        }

        let (base, extension) = split_extension(&self.path);
        let (dir, name) = match base.rfind('/') {
            Some(slash) => (&base[..=slash], &base[slash + 1..]),
            None => ("", base),
        };
        let (Some(extension), Some(wanted)) = (extension, parse_resize(name)) else {
            return Err(Error::NotFound);
        };
        if wanted.width == 0 || wanted.height == 0 {
            return Err(Error::NotFound);
        }

        let source = resolve_under(&public, &format!("{}{}.{}", dir, wanted.stem, extension))?;
        if !source.is_file() {
            return Err(Error::NotFound);
        }

        let target = resolve_under(&env.dir("cache"), &self.path)?;
        if !target.is_file() || mtime_secs(&target) < mtime_secs(&source) {
            resize(&source, &target, &wanted)?;
        }
        response.set_file(&target, env)?;
        Ok(response)
    }
}
