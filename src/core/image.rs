//! Owned pixel buffers crossing the effect call boundary.
//!
//! **Why**: the host hands out tiles in its own channel order and row stride,
//! the effect runtime expects a flat contiguous RGBA run. `ImageBuffer` is the
//! single owned representation in between.
//!
//! # Channel order
//!
//! `channel_order[i]` names the logical channel stored at byte `i` of a pixel,
//! with `0=R, 1=G, 2=B, 3=A`:
//!
//! - [`RGBA`]: `[0, 1, 2, 3]` - the effect contract
//! - [`ARGB`]: `[3, 0, 1, 2]` - the host raster's native layout
//!
//! Reordering always copies into a fresh buffer in the destination layout.
//!
//! # Ownership
//!
//! `ImageBuffer` is moved into [`crate::core::invoker::EffectInvoker::invoke`]
//! and a fresh buffer comes back in the result. Nothing keeps a second handle.

use std::fmt;

/// Logical channel indices
pub const CH_R: u8 = 0;
pub const CH_G: u8 = 1;
pub const CH_B: u8 = 2;
pub const CH_A: u8 = 3;

pub type ChannelOrder = [u8; 4];

/// Effect contract layout
pub const RGBA: ChannelOrder = [CH_R, CH_G, CH_B, CH_A];
/// Host raster layout (alpha first)
pub const ARGB: ChannelOrder = [CH_A, CH_R, CH_G, CH_B];

/// Largest buffer we agree to allocate (1 GiB).
const MAX_BYTES: u64 = 1 << 30;

/// Image construction / marshaling errors
#[derive(Debug, Clone, PartialEq)]
pub enum ImageError {
    ZeroDimension { width: u32, height: u32 },
    SizeMismatch { expected: usize, actual: usize },
    UnsupportedDepth(u8),
    StrideTooSmall { row_bytes: usize, min: usize },
    TooLarge { width: u32, height: u32 },
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::ZeroDimension { width, height } => {
                write!(f, "zero image dimension ({}x{})", width, height)
            }
            ImageError::SizeMismatch { expected, actual } => {
                write!(f, "buffer holds {} bytes, expected {}", actual, expected)
            }
            ImageError::UnsupportedDepth(bpp) => write!(f, "unsupported {} bytes per pixel", bpp),
            ImageError::StrideTooSmall { row_bytes, min } => {
                write!(f, "row stride {} smaller than packed row {}", row_bytes, min)
            }
            ImageError::TooLarge { width, height } => write!(f, "image {}x{} too large", width, height),
        }
    }
}

impl std::error::Error for ImageError {}

/// Flat, contiguous pixel buffer. `data.len() == width * height * bytes_per_pixel`.
#[derive(Clone, PartialEq)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    bytes_per_pixel: u8,
    channel_order: ChannelOrder,
    data: Vec<u8>,
}

impl fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes_per_pixel", &self.bytes_per_pixel)
            .field("channel_order", &self.channel_order)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Byte length of a packed `width x height` image, checked.
pub fn packed_len(width: u32, height: u32, bytes_per_pixel: u8) -> Result<usize, ImageError> {
    if width == 0 || height == 0 {
        return Err(ImageError::ZeroDimension { width, height });
    }
    let len = width as u64 * height as u64 * bytes_per_pixel as u64;
    if len > MAX_BYTES {
        return Err(ImageError::TooLarge { width, height });
    }
    Ok(len as usize)
}

impl ImageBuffer {
    /// Wrap an existing packed buffer, validating its length.
    pub fn new(
        width: u32,
        height: u32,
        bytes_per_pixel: u8,
        channel_order: ChannelOrder,
        data: Vec<u8>,
    ) -> Result<Self, ImageError> {
        if bytes_per_pixel != 4 {
            return Err(ImageError::UnsupportedDepth(bytes_per_pixel));
        }
        let expected = packed_len(width, height, bytes_per_pixel)?;
        if data.len() != expected {
            return Err(ImageError::SizeMismatch { expected, actual: data.len() });
        }
        Ok(Self { width, height, bytes_per_pixel, channel_order, data })
    }

    /// RGBA buffer from packed bytes.
    pub fn rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ImageError> {
        Self::new(width, height, 4, RGBA, data)
    }

    /// Solid RGBA fill.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self, ImageError> {
        let len = packed_len(width, height, 4)?;
        let mut data = vec![0u8; len];
        for px in data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        Ok(Self { width, height, bytes_per_pixel: 4, channel_order: RGBA, data })
    }

    /// Copy rows out of a strided source (host rows may carry padding).
    ///
    /// The result is packed: stride == `width * bytes_per_pixel`.
    pub fn from_strided(
        width: u32,
        height: u32,
        bytes_per_pixel: u8,
        channel_order: ChannelOrder,
        row_bytes: usize,
        src: &[u8],
    ) -> Result<Self, ImageError> {
        let len = packed_len(width, height, bytes_per_pixel)?;
        let packed_row = width as usize * bytes_per_pixel as usize;
        if row_bytes < packed_row {
            return Err(ImageError::StrideTooSmall { row_bytes, min: packed_row });
        }
        let needed = row_bytes * (height as usize - 1) + packed_row;
        if src.len() < needed {
            return Err(ImageError::SizeMismatch { expected: needed, actual: src.len() });
        }

        let mut data = Vec::with_capacity(len);
        for row in src.chunks(row_bytes).take(height as usize) {
            data.extend_from_slice(&row[..packed_row]);
        }
        Self::new(width, height, bytes_per_pixel, channel_order, data)
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

    pub fn bytes_per_pixel(&self) -> u8 {
        self.bytes_per_pixel
    }

    pub fn channel_order(&self) -> ChannelOrder {
        self.channel_order
    }

    /// Packed row length in bytes
    pub fn stride(&self) -> usize {
        self.width as usize * self.bytes_per_pixel as usize
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Pixel at (x, y) in this buffer's own channel order.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let idx = (y as usize * self.width as usize + x as usize) * self.bytes_per_pixel as usize;
        &self.data[idx..idx + self.bytes_per_pixel as usize]
    }

    /// Copy into a new buffer laid out in `order`.
    pub fn to_channel_order(&self, order: ChannelOrder) -> ImageBuffer {
        if order == self.channel_order {
            return self.clone();
        }

        // For each destination byte, which source byte holds that logical channel
        let mut src_pos = [0usize; 4];
        for (dst_i, logical) in order.iter().enumerate() {
            src_pos[dst_i] = self
                .channel_order
                .iter()
                .position(|c| c == logical)
                .unwrap_or(dst_i);
        }

        let mut data = Vec::with_capacity(self.data.len());
        for px in self.data.chunks_exact(4) {
            data.extend_from_slice(&[px[src_pos[0]], px[src_pos[1]], px[src_pos[2]], px[src_pos[3]]]);
        }

        ImageBuffer {
            width: self.width,
            height: self.height,
            bytes_per_pixel: self.bytes_per_pixel,
            channel_order: order,
            data,
        }
    }

    /// Overwrite every pixel with an RGBA color, respecting this buffer's order.
    pub fn fill_rgba(&mut self, rgba: [u8; 4]) {
        let px_value = [
            rgba[self.channel_order[0] as usize],
            rgba[self.channel_order[1] as usize],
            rgba[self.channel_order[2] as usize],
            rgba[self.channel_order[3] as usize],
        ];
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&px_value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test: Buffer length invariant
    /// Validates: Construction rejects wrong sizes and zero dimensions
    #[test]
    fn test_length_invariant() {
        assert!(ImageBuffer::rgba(2, 2, vec![0; 16]).is_ok());
        assert_eq!(
            ImageBuffer::rgba(2, 2, vec![0; 15]).unwrap_err(),
            ImageError::SizeMismatch { expected: 16, actual: 15 }
        );
        assert_eq!(
            ImageBuffer::rgba(0, 2, vec![]).unwrap_err(),
            ImageError::ZeroDimension { width: 0, height: 2 }
        );
        assert_eq!(
            ImageBuffer::new(1, 1, 3, RGBA, vec![0; 3]).unwrap_err(),
            ImageError::UnsupportedDepth(3)
        );
    }

    /// Test: ARGB -> RGBA reorder
    /// Validates: Each logical channel lands at its new offset
    #[test]
    fn test_argb_to_rgba() {
        let argb = ImageBuffer::new(1, 1, 4, ARGB, vec![255, 10, 20, 30]).unwrap();
        let rgba = argb.to_channel_order(RGBA);
        assert_eq!(rgba.data(), &[10, 20, 30, 255]);
        assert_eq!(rgba.channel_order(), RGBA);

        let back = rgba.to_channel_order(ARGB);
        assert_eq!(back.data(), argb.data());
    }

    /// Test: Strided copy drops row padding
    /// Validates: Packed stride == width * bpp
    #[test]
    fn test_from_strided_drops_padding() {
        // 2x2 pixels, 4 bytes padding per row
        let mut src = Vec::new();
        src.extend_from_slice(&[1, 1, 1, 1, 2, 2, 2, 2, 9, 9, 9, 9]);
        src.extend_from_slice(&[3, 3, 3, 3, 4, 4, 4, 4, 9, 9, 9, 9]);

        let img = ImageBuffer::from_strided(2, 2, 4, ARGB, 12, &src).unwrap();
        assert_eq!(img.stride(), 8);
        assert_eq!(img.data(), &[1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4]);
    }

    #[test]
    fn test_from_strided_rejects_short_stride() {
        let err = ImageBuffer::from_strided(2, 1, 4, RGBA, 4, &[0; 8]).unwrap_err();
        assert_eq!(err, ImageError::StrideTooSmall { row_bytes: 4, min: 8 });
    }

    #[test]
    fn test_fill_respects_order() {
        let mut img = ImageBuffer::new(1, 1, 4, ARGB, vec![0; 4]).unwrap();
        img.fill_rgba([0, 0, 255, 255]);
        assert_eq!(img.data(), &[255, 0, 0, 255]);
        assert_eq!(img.to_channel_order(RGBA).data(), &[0, 0, 255, 255]);
    }
}
