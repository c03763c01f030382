use image::DynamicImage;

use super::{AlbumColors, Color};

/// Low bits dropped from each channel when bucketing.
const QUANTIZE_BITS: u8 = 3;
const LEVELS: usize = 256 >> QUANTIZE_BITS;

/// A vivid bucket needs more hits than this to beat the grayscale fallback.
const MIN_COMMON_COUNT: u32 = 20;

/// Computes the average color and the dominant color of `image`.
///
/// Channels are premultiplied by alpha first, so transparent areas read as black.
#[must_use]
pub fn analyze(image: &DynamicImage) -> AlbumColors {
    let rgba = image.to_rgba8();
    analyze_pixels(rgba.pixels().map(|p| {
        let [r, g, b, a] = p.0;
        [premultiply(r, a), premultiply(g, a), premultiply(b, a)]
    }))
}

#[inline]
fn premultiply(channel: u8, alpha: u8) -> u8 {
    // fits: channel * alpha / 255 <= 255
    (u16::from(channel) * u16::from(alpha) / 255) as u8
}

/// Same as [`analyze`], over raw 8-bit RGB pixels.
///
/// The dominant color is the most frequent non-grayscale bucket if it was hit more than 20 times,
/// otherwise the most frequent grayscale bucket ([`Color::NEUTRAL`] if there was none).
/// Ties go to the lowest bucket. An empty image is [`AlbumColors::NEUTRAL`].
#[must_use]
pub fn analyze_pixels(pixels: impl IntoIterator<Item = [u8; 3]>) -> AlbumColors {
    let mut totals = [0u64; 3];
    let mut count = 0u64;
    let mut histogram = vec![0u32; LEVELS * LEVELS * LEVELS];

    for [r, g, b] in pixels {
        totals[0] += u64::from(r);
        totals[1] += u64::from(g);
        totals[2] += u64::from(b);
        count += 1;

        histogram[bucket_index(r, g, b)] += 1;
    }

    if count == 0 {
        return AlbumColors::NEUTRAL;
    }

    // an average of u8s is a u8
    let [r, g, b] = totals.map(|total| (total / count) as u8);
    let average_color = Color::new(r, g, b);

    let mut common = (Color::NEUTRAL, 0);
    let mut grayscale = (Color::NEUTRAL, 0);

    for (index, &hits) in histogram.iter().enumerate() {
        if hits == 0 {
            continue;
        }

        let color = bucket_color(index);
        let best = if color.is_grayscale() {
            &mut grayscale
        } else {
            &mut common
        };

        if hits > best.1 {
            *best = (color, hits);
        }
    }

    let common_color = if common.1 > MIN_COMMON_COUNT {
        common.0
    } else {
        grayscale.0
    };

    AlbumColors {
        average_color,
        common_color,
    }
}

#[inline]
fn bucket_index(r: u8, g: u8, b: u8) -> usize {
    let level = |c: u8| usize::from(c >> QUANTIZE_BITS);
    (level(r) * LEVELS + level(g)) * LEVELS + level(b)
}

#[inline]
fn bucket_color(index: usize) -> Color {
    // each level is < 32, so shifting back stays within u8
    let channel = |level: usize| ((level % LEVELS) as u8) << QUANTIZE_BITS;
    Color::new(
        channel(index / (LEVELS * LEVELS)),
        channel(index / LEVELS),
        channel(index),
    )
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    use super::*;

    fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn solid_red() {
        let colors = analyze(&solid(8, 8, [255, 0, 0]));
        assert_eq!(colors.average_color, Color::new(255, 0, 0));
        // quantized, but 255 & !7 == 248
        assert_eq!(colors.common_color, Color::new(248, 0, 0));
    }

    #[test]
    fn quantization_masks_low_bits() {
        let colors = analyze_pixels(vec![[200, 17, 39]; 30]);
        assert_eq!(colors.common_color, Color::new(200, 16, 32));
        assert_eq!(colors.average_color, Color::new(200, 17, 39));
    }

    #[test]
    fn average_uses_integer_division() {
        let colors = analyze_pixels([[0, 0, 0], [255, 255, 1]]);
        assert_eq!(colors.average_color, Color::new(127, 127, 0));
    }

    #[test]
    fn threshold_is_strict() {
        let twenty = analyze_pixels(vec![[0, 0, 248]; 20]);
        assert_eq!(twenty.average_color, Color::new(0, 0, 248));
        // no grayscale pixels at all, so the fallback is neutral
        assert_eq!(twenty.common_color, Color::NEUTRAL);

        let twenty_one = analyze_pixels(vec![[0, 0, 248]; 21]);
        assert_eq!(twenty_one.common_color, Color::new(0, 0, 248));
    }

    #[test]
    fn vivid_beats_more_frequent_gray() {
        let mut pixels = vec![[240, 240, 240]; 500];
        pixels.extend(vec![[16, 128, 64]; 25]);

        let colors = analyze_pixels(pixels);
        assert_eq!(colors.common_color, Color::new(16, 128, 64));
    }

    #[test]
    fn rare_vivid_falls_back_to_gray() {
        let mut pixels = vec![[240, 240, 240]; 500];
        pixels.extend(vec![[16, 128, 64]; 10]);
        pixels.extend(vec![[32, 32, 32]; 100]);

        let colors = analyze_pixels(pixels);
        assert_eq!(colors.common_color, Color::new(240, 240, 240));
    }

    #[test]
    fn ties_go_to_lowest_bucket() {
        let mut pixels = vec![[200, 0, 0]; 30];
        pixels.extend(vec![[0, 0, 200]; 30]);

        let colors = analyze_pixels(pixels);
        assert_eq!(colors.common_color, Color::new(0, 0, 200));
    }

    #[test]
    fn empty_image_is_neutral() {
        assert_eq!(analyze_pixels([]), AlbumColors::NEUTRAL);
        assert_eq!(analyze(&solid(0, 0, [255, 0, 0])), AlbumColors::NEUTRAL);
    }

    #[test]
    fn transparent_pixels_are_black() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 0])));
        assert_eq!(analyze(&image), AlbumColors::NEUTRAL);
    }

    #[test]
    fn buckets_round_trip() {
        for color in [[0, 0, 0], [248, 248, 248], [8, 16, 24], [255, 7, 130]] {
            let [r, g, b] = color.map(|c| c & !7);
            assert_eq!(
                bucket_color(bucket_index(color[0], color[1], color[2])),
                Color::new(r, g, b)
            );
        }
    }
}
