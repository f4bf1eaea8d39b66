//! Texture file loading and procedural textures.
//!
//! LDR formats decode to 8-bit channels; `.hdr` decodes to f32 channels with
//! the payload reinterpreted as bytes. The caller can force a channel count
//! of 1/3/4 or pass 0 to keep the source layout.

use crate::error::{AssetError, Result};
use crate::types::TextureData;
use image::DynamicImage;
use std::path::Path;

/// Recognized texture file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Png,
    Jpeg,
    Pnm,
    Hdr,
    Unknown,
}

/// Detect the texture format from the file extension.
pub fn detect_texture_format(path: &Path) -> TextureFormat {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => TextureFormat::Png,
        "jpg" | "jpeg" => TextureFormat::Jpeg,
        "pnm" | "pbm" | "pgm" | "ppm" => TextureFormat::Pnm,
        "hdr" => TextureFormat::Hdr,
        _ => TextureFormat::Unknown,
    }
}

/// Load a texture file.
pub fn load_texture(path: &Path, desired_channels: u32, flip_vertically: bool) -> Result<TextureData> {
    let format = detect_texture_format(path);
    if format == TextureFormat::Unknown {
        return Err(AssetError::UnsupportedFormat(format!(
            "texture format: {}",
            path.display()
        )));
    }

    let img = image::open(path).map_err(|e| match e {
        image::ImageError::IoError(io) => AssetError::FileSystem(io.to_string()),
        other => AssetError::InvalidData(format!("failed to decode {}: {other}", path.display())),
    })?;

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("texture")
        .to_string();

    finish_texture(img, format == TextureFormat::Hdr, desired_channels, flip_vertically, name)
}

/// Load a texture from an in-memory encoded file.
pub fn load_texture_from_memory(
    bytes: &[u8],
    desired_channels: u32,
    flip_vertically: bool,
) -> Result<TextureData> {
    let hdr = image::guess_format(bytes)
        .map(|f| f == image::ImageFormat::Hdr)
        .unwrap_or(false);

    let img = image::load_from_memory(bytes)
        .map_err(|e| AssetError::InvalidData(format!("failed to decode texture from memory: {e}")))?;

    finish_texture(img, hdr, desired_channels, flip_vertically, "memory".to_string())
}

fn finish_texture(
    img: DynamicImage,
    hdr: bool,
    desired_channels: u32,
    flip_vertically: bool,
    debug_name: String,
) -> Result<TextureData> {
    if !matches!(desired_channels, 0 | 1 | 3 | 4) {
        return Err(AssetError::InvalidData(format!(
            "desired channel count must be 0, 1, 3, or 4 (got {desired_channels})"
        )));
    }

    let img = if flip_vertically { img.flipv() } else { img };
    let width = img.width();
    let height = img.height();

    let (pixels, channels) = if hdr {
        let channels = if desired_channels == 0 { 3 } else { desired_channels };
        let pixels: Vec<u8> = match channels {
            1 => bytemuck::cast_slice(img.to_luma32f().as_raw()).to_vec(),
            3 => bytemuck::cast_slice(img.to_rgb32f().as_raw()).to_vec(),
            _ => bytemuck::cast_slice(img.to_rgba32f().as_raw()).to_vec(),
        };
        (pixels, channels)
    } else {
        let channels = if desired_channels == 0 {
            u32::from(img.color().channel_count())
        } else {
            desired_channels
        };
        let pixels: Vec<u8> = match channels {
            1 => img.to_luma8().into_raw(),
            2 => img.to_luma_alpha8().into_raw(),
            3 => img.to_rgb8().into_raw(),
            _ => img.to_rgba8().into_raw(),
        };
        (pixels, channels.min(4))
    };

    Ok(TextureData {
        debug_name,
        pixels,
        width,
        height,
        channels,
        is_hdr: hdr,
    })
}

/// Uniform RGBA texture.
pub fn solid_color(width: u32, height: u32, color: [u8; 4]) -> TextureData {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for _ in 0..width * height {
        pixels.extend_from_slice(&color);
    }

    TextureData {
        debug_name: "solid_color".to_string(),
        pixels,
        width,
        height,
        channels: 4,
        is_hdr: false,
    }
}

/// Two-color RGBA checkerboard with `square_size`-pixel squares.
pub fn checkerboard(
    width: u32,
    height: u32,
    square_size: u32,
    color_a: [u8; 4],
    color_b: [u8; 4],
) -> TextureData {
    let square_size = square_size.max(1);
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);

    for y in 0..height {
        for x in 0..width {
            let use_a = ((x / square_size) + (y / square_size)) % 2 == 0;
            pixels.extend_from_slice(if use_a { &color_a } else { &color_b });
        }
    }

    TextureData {
        debug_name: "checkerboard".to_string(),
        pixels,
        width,
        height,
        channels: 4,
        is_hdr: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn detects_formats() {
        assert_eq!(detect_texture_format(Path::new("a.png")), TextureFormat::Png);
        assert_eq!(detect_texture_format(Path::new("a.JPEG")), TextureFormat::Jpeg);
        assert_eq!(detect_texture_format(Path::new("a.ppm")), TextureFormat::Pnm);
        assert_eq!(detect_texture_format(Path::new("a.hdr")), TextureFormat::Hdr);
        assert_eq!(detect_texture_format(Path::new("a.tga")), TextureFormat::Unknown);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = load_texture(Path::new("missing.tga"), 0, false).unwrap_err();
        assert!(matches!(err, AssetError::UnsupportedFormat(_)));
    }

    #[test]
    fn solid_color_fills_every_pixel() {
        let tex = solid_color(4, 4, [255, 255, 255, 255]);
        assert_eq!(tex.width, 4);
        assert_eq!(tex.channels, 4);
        assert_eq!(tex.byte_size(), 64);
        assert!(tex.pixels.iter().all(|&b| b == 255));
        assert!(tex.is_valid());
    }

    #[test]
    fn checkerboard_alternates_squares() {
        let white = [255, 255, 255, 255];
        let black = [0, 0, 0, 255];
        let tex = checkerboard(4, 4, 2, white, black);

        let pixel = |x: u32, y: u32| {
            let i = ((y * 4 + x) * 4) as usize;
            [tex.pixels[i], tex.pixels[i + 1], tex.pixels[i + 2], tex.pixels[i + 3]]
        };
        assert_eq!(pixel(0, 0), white);
        assert_eq!(pixel(2, 0), black);
        assert_eq!(pixel(0, 2), black);
        assert_eq!(pixel(2, 2), white);
    }

    #[test]
    fn memory_roundtrip_with_channel_conversion() {
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 255]));
        let mut encoded = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut encoded), image::ImageFormat::Png)
            .unwrap();

        let tex = load_texture_from_memory(&encoded, 3, false).unwrap();
        assert_eq!(tex.width, 2);
        assert_eq!(tex.height, 2);
        assert_eq!(tex.channels, 3);
        assert!(!tex.is_hdr);
        assert_eq!(tex.byte_size(), 2 * 2 * 3);
        assert_eq!(&tex.pixels[0..3], &[10, 20, 30]);
    }

    #[test]
    fn rejects_bad_channel_request() {
        let img = image::RgbaImage::from_pixel(1, 1, image::Rgba([0, 0, 0, 255]));
        let mut encoded = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut encoded), image::ImageFormat::Png)
            .unwrap();

        assert!(load_texture_from_memory(&encoded, 2, false).is_err());
    }
}
