use anyhow::{Context, Result, anyhow};
use base64::{Engine as _, engine::general_purpose};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage};
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::io::Cursor;
use std::path::{Path, PathBuf};

pub const FONT_FAMILY: &str = "sans-serif";

/// 测量文本尺寸，字体不可用时按字号估算
pub fn text_size(text: &str, size: u32) -> (u32, u32) {
    (FONT_FAMILY, size)
        .into_font()
        .box_size(text)
        .unwrap_or_else(|_| (text.chars().count() as u32 * size, size))
}

/// 画布
///
/// 内部使用 RGB 缓冲区，文字与几何图形交给 plotters 绘制，图片粘贴走 alpha 混合。
pub struct BuildImage {
    width: u32,
    height: u32,
    buffer: Vec<u8>,
}

impl BuildImage {
    pub fn new(width: u32, height: u32, background: RGBColor) -> Self {
        let mut buffer = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..width * height {
            buffer.extend_from_slice(&[background.0, background.1, background.2]);
        }
        Self {
            width,
            height,
            buffer,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// 绘制文字，pos 为左上角
    pub fn text(&mut self, pos: (i32, i32), text: &str, size: u32, color: RGBColor) -> Result<()> {
        let (w, h) = (self.width, self.height);
        let root = BitMapBackend::with_buffer(&mut self.buffer, (w, h)).into_drawing_area();
        let style = (FONT_FAMILY, size)
            .into_font()
            .color(&color)
            .pos(Pos::new(HPos::Left, VPos::Top));
        root.draw_text(text, &style, pos)
            .map_err(|e| anyhow!("绘制文字失败: {}", e))?;
        root.present().map_err(|e| anyhow!("{}", e))?;
        Ok(())
    }

    /// 水平居中绘制文字
    pub fn text_centered(&mut self, y: i32, text: &str, size: u32, color: RGBColor) -> Result<()> {
        let (tw, _) = text_size(text, size);
        let x = (self.width as i32 - tw as i32) / 2;
        self.text((x.max(0), y), text, size, color)
    }

    pub fn rect(
        &mut self,
        top_left: (i32, i32),
        bottom_right: (i32, i32),
        color: RGBColor,
        filled: bool,
    ) -> Result<()> {
        let (w, h) = (self.width, self.height);
        let root = BitMapBackend::with_buffer(&mut self.buffer, (w, h)).into_drawing_area();
        let style = if filled {
            color.filled()
        } else {
            color.stroke_width(1)
        };
        root.draw(&Rectangle::new([top_left, bottom_right], style))
            .map_err(|e| anyhow!("绘制矩形失败: {}", e))?;
        root.present().map_err(|e| anyhow!("{}", e))?;
        Ok(())
    }

    pub fn line(
        &mut self,
        from: (i32, i32),
        to: (i32, i32),
        color: RGBColor,
        width: u32,
    ) -> Result<()> {
        let (w, h) = (self.width, self.height);
        let root = BitMapBackend::with_buffer(&mut self.buffer, (w, h)).into_drawing_area();
        root.draw(&PathElement::new(vec![from, to], color.stroke_width(width)))
            .map_err(|e| anyhow!("绘制线条失败: {}", e))?;
        root.present().map_err(|e| anyhow!("{}", e))?;
        Ok(())
    }

    /// 粘贴图片 (按 alpha 混合)
    pub fn paste(&mut self, overlay: &RgbaImage, x: i32, y: i32) {
        let (overlay_w, overlay_h) = overlay.dimensions();
        for oy in 0..overlay_h {
            for ox in 0..overlay_w {
                let bx = x + ox as i32;
                let by = y + oy as i32;
                if bx < 0 || by < 0 || bx >= self.width as i32 || by >= self.height as i32 {
                    continue;
                }
                let fg = overlay.get_pixel(ox, oy);
                let alpha = fg[3] as f32 / 255.0;
                if alpha <= 0.0 {
                    continue;
                }
                let idx = ((by as u32 * self.width + bx as u32) * 3) as usize;
                for c in 0..3 {
                    let bg = self.buffer[idx + c] as f32;
                    self.buffer[idx + c] = ((1.0 - alpha) * bg + alpha * fg[c] as f32) as u8;
                }
            }
        }
    }

    /// 粘贴另一张画布
    pub fn paste_build(&mut self, other: &BuildImage, x: i32, y: i32) {
        self.paste(&other.to_rgba(), x, y);
    }

    pub fn to_rgba(&self) -> RgbaImage {
        let mut img = RgbaImage::new(self.width, self.height);
        for (i, pixel) in img.pixels_mut().enumerate() {
            let idx = i * 3;
            *pixel = Rgba([
                self.buffer[idx],
                self.buffer[idx + 1],
                self.buffer[idx + 2],
                255,
            ]);
        }
        img
    }

    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(self.to_rgba())
            .write_to(&mut cursor, ImageFormat::Png)
            .context("图片编码失败")?;
        Ok(cursor.into_inner())
    }

    /// 输出为 base64://… 字符串
    pub fn to_base64(&self) -> Result<String> {
        let b64 = general_purpose::STANDARD.encode(self.to_png_bytes()?);
        Ok(format!("base64://{}", b64))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_png_bytes()?)
            .with_context(|| format!("保存图片失败: {}", path.display()))
    }
}

/// 读取图片并缩放、高斯模糊，作为背景使用
pub fn load_background(path: &Path, width: u32, height: u32, blur: f32) -> Result<RgbaImage> {
    let img = image::open(path).with_context(|| format!("无法打开图片: {}", path.display()))?;
    let resized = img.resize_to_fill(width, height, FilterType::Triangle);
    Ok(image::imageops::blur(&resized.to_rgba8(), blur))
}

/// 均值哈希 (8x8)，输出 16 位十六进制字符串
pub fn average_hash(img: &DynamicImage) -> String {
    let small = img.resize_exact(8, 8, FilterType::Lanczos3).to_luma8();
    let pixels: Vec<u32> = small.pixels().map(|p| p[0] as u32).collect();
    let mean = pixels.iter().sum::<u32>() / pixels.len().max(1) as u32;

    let mut bits: u64 = 0;
    for p in &pixels {
        bits = (bits << 1) | u64::from(*p > mean);
    }
    format!("{:016x}", bits)
}

pub fn hash_bytes(bytes: &[u8]) -> Result<String> {
    let img = image::load_from_memory(bytes).context("无法识别的图片")?;
    Ok(average_hash(&img))
}

pub fn hash_file(path: &Path) -> Result<String> {
    let img = image::open(path).with_context(|| format!("无法识别的图片: {}", path.display()))?;
    Ok(average_hash(&img))
}

/// 根据文件内容判断真实格式
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

/// 将文件扩展名修正为真实图片格式，返回新路径
pub fn convert_to_origin_type(path: &Path) -> Result<PathBuf> {
    let bytes = std::fs::read(path).with_context(|| format!("读取失败: {}", path.display()))?;
    let format = detect_format(&bytes)
        .ok_or_else(|| anyhow!("无法识别的图片: {}", path.display()))?;
    let ext = format.extensions_str().first().copied().unwrap_or("jpg");

    let current = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if current.eq_ignore_ascii_case(ext) {
        return Ok(path.to_path_buf());
    }
    let target = path.with_extension(ext);
    std::fs::rename(path, &target)?;
    Ok(target)
}

/// 压缩图片：按比例缩小后写入目标路径，格式由目标扩展名决定
pub fn compress_image(src: &Path, dst: &Path, ratio: f32) -> Result<()> {
    let img = image::open(src).with_context(|| format!("无法打开图片: {}", src.display()))?;
    let (w, h) = img.dimensions();
    let nw = ((w as f32 * ratio) as u32).max(1);
    let nh = ((h as f32 * ratio) as u32).max(1);
    let resized = img.resize(nw, nh, FilterType::Triangle);

    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let format = ImageFormat::from_path(dst).unwrap_or(ImageFormat::Jpeg);
    let resized = if format == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(resized.to_rgb8())
    } else {
        resized
    };
    resized
        .save_with_format(dst, format)
        .with_context(|| format!("保存压缩图片失败: {}", dst.display()))?;
    if src != dst {
        let _ = std::fs::remove_file(src);
    }
    Ok(())
}

/// 将若干高度的卡片分配到 n 列，尽量使各列高度接近
pub fn layout_columns(heights: &[u32], columns: usize) -> Vec<Vec<usize>> {
    let columns = columns.max(1);
    let mut result = vec![Vec::new(); columns];
    let mut totals = vec![0u32; columns];

    let mut order: Vec<usize> = (0..heights.len()).collect();
    order.sort_by(|a, b| heights[*b].cmp(&heights[*a]));

    for idx in order {
        let (col, _) = totals
            .iter()
            .enumerate()
            .min_by_key(|(_, h)| **h)
            .unwrap_or((0, &0));
        totals[col] += heights[idx];
        result[col].push(idx);
    }

    // 列内保持原始顺序
    for col in result.iter_mut() {
        col.sort_unstable();
    }
    result
}

/// 目录下随机挑选一个文件
pub fn random_file(dir: &Path) -> Option<PathBuf> {
    use rand::seq::IndexedRandom;
    let files: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.choose(&mut rand::rng()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};
    use tempfile::TempDir;

    #[test]
    fn average_hash_of_half_split_image() {
        let img = ImageBuffer::from_fn(64, 64, |x, _| {
            if x < 32 { Luma([0u8]) } else { Luma([255u8]) }
        });
        let hash = average_hash(&DynamicImage::ImageLuma8(img));
        assert_eq!(hash, "0f0f0f0f0f0f0f0f");
    }

    #[test]
    fn identical_images_hash_equal() {
        let a = DynamicImage::ImageRgba8(RgbaImage::from_pixel(20, 20, Rgba([10, 20, 30, 255])));
        let b = a.resize_exact(40, 40, FilterType::Nearest);
        assert_eq!(average_hash(&a), average_hash(&b));
    }

    #[test]
    fn extension_follows_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1.jpg");
        DynamicImage::ImageRgba8(RgbaImage::new(4, 4))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();

        let fixed = convert_to_origin_type(&path).unwrap();
        assert_eq!(fixed.extension().unwrap(), "png");
        assert!(fixed.exists());
        assert!(!path.exists());
    }

    #[test]
    fn not_an_image_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1.jpg");
        std::fs::write(&path, "<html>404 Not Found</html>").unwrap();
        assert!(convert_to_origin_type(&path).is_err());
    }

    #[test]
    fn compress_halves_dimensions() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src.png");
        let dst = dir.path().join("out").join("dst.jpg");
        DynamicImage::ImageRgba8(RgbaImage::new(100, 60))
            .save_with_format(&src, ImageFormat::Png)
            .unwrap();

        compress_image(&src, &dst, 0.5).unwrap();
        let out = image::open(&dst).unwrap();
        assert_eq!(out.dimensions(), (50, 30));
        assert!(!src.exists());
    }

    #[test]
    fn columns_are_balanced() {
        let cols = layout_columns(&[300, 100, 100, 100], 2);
        assert_eq!(cols[0], vec![0]);
        assert_eq!(cols[1], vec![1, 2, 3]);
    }

    #[test]
    fn paste_blends_opaque_pixels() {
        let mut canvas = BuildImage::new(4, 4, RGBColor(255, 255, 255));
        let overlay = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]));
        canvas.paste(&overlay, 1, 1);
        let out = canvas.to_rgba();
        assert_eq!(out.get_pixel(1, 1), &Rgba([0, 0, 0, 255]));
        assert_eq!(out.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn text_draws_from_top_left_or_reports_missing_font() {
        let mut canvas = BuildImage::new(80, 40, RGBColor(255, 255, 255));
        match canvas.text((2, 2), "Ab", 24, RGBColor(0, 0, 0)) {
            Ok(()) => {
                let out = canvas.to_rgba();
                assert!(out.pixels().any(|p| p[0] < 128));
                // 顶部对齐，文字不会画到画布下半部以外
                assert!((0..80).all(|x| out.get_pixel(x, 39)[0] > 128));
            }
            Err(e) => assert!(e.to_string().contains("绘制文字失败")),
        }
    }
}
