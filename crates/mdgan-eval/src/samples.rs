use std::path::Path;

use burn::{prelude::Backend, tensor::Tensor};
use image::RgbImage;

use crate::EvalError;

// Gap between tiles, in pixels.
const PADDING: usize = 2;

/// Tile NCHW images in [-1, 1] into one RGB grid with `per_row` images per row.
pub fn tile_images(pixels: &[f32], [n, c, h, w]: [usize; 4], per_row: usize) -> RgbImage {
    let per_row = per_row.clamp(1, n.max(1));
    let rows = n.div_ceil(per_row);
    let width = per_row * (w + PADDING) + PADDING;
    let height = rows * (h + PADDING) + PADDING;
    let mut grid = RgbImage::new(width as u32, height as u32);

    let to_u8 = |v: f32| (((v + 1.0) * 0.5).clamp(0.0, 1.0) * 255.0).round() as u8;

    for i in 0..n {
        let x0 = PADDING + (i % per_row) * (w + PADDING);
        let y0 = PADDING + (i / per_row) * (h + PADDING);
        let image = &pixels[i * c * h * w..(i + 1) * c * h * w];

        for y in 0..h {
            for x in 0..w {
                // Grayscale images repeat their single channel.
                let channel = |k: usize| to_u8(image[(k.min(c - 1) * h + y) * w + x]);
                grid.put_pixel(
                    (x0 + x) as u32,
                    (y0 + y) as u32,
                    image::Rgb([channel(0), channel(1), channel(2)]),
                );
            }
        }
    }
    grid
}

/// Save a batch of generated images as a PNG grid.
pub async fn save_sample_grid<B: Backend>(
    images: Tensor<B, 4>,
    per_row: usize,
    path: &Path,
) -> Result<(), EvalError> {
    let dims = images.dims();
    let pixels: Vec<f32> = images.into_data().convert::<f32>().iter::<f32>().collect();
    let grid = tile_images(&pixels, dims, per_row);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| EvalError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    log::info!("Saving samples to {}", path.display());
    grid.save(path).map_err(|source| EvalError::Image {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn grid_has_padding_and_layout() {
        // Three 2x2 grayscale images, two per row.
        let pixels = [vec![-1.0; 4], vec![1.0; 4], vec![0.0; 4]].concat();
        let grid = tile_images(&pixels, [3, 1, 2, 2], 2);
        assert_eq!(grid.dimensions(), (2 * 4 + 2, 2 * 4 + 2));

        // Padding is black, the second tile is white, the third mid gray.
        assert_eq!(grid.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(grid.get_pixel(2, 2).0, [0, 0, 0]);
        assert_eq!(grid.get_pixel(6, 2).0, [255, 255, 255]);
        assert_eq!(grid.get_pixel(2, 6).0, [128, 128, 128]);
    }

    #[test]
    fn colour_channels_are_kept() {
        // One 1x1 RGB image: red.
        let grid = tile_images(&[1.0, -1.0, -1.0], [1, 3, 1, 1], 8);
        assert_eq!(grid.get_pixel(2, 2).0, [255, 0, 0]);
    }

    #[tokio::test]
    async fn writes_png() {
        let device = Default::default();
        let images = Tensor::<NdArray, 4>::zeros([4, 3, 8, 8], &device);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples/grid.png");
        save_sample_grid(images, 2, &path).await.unwrap();
        assert!(path.exists());
    }
}
