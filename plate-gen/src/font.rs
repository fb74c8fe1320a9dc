use ab_glyph::{Font, FontVec, PxScale, ScaleFont, point};
use image::{Rgb, RgbImage};
use image_proc::rgb_image_to_mat;
use imageproc::drawing::draw_text_mut;
use opencv::core::{CV_8UC3, Mat, Point, Scalar};
use opencv::imgproc;
use opencv::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// 车牌底色（RGB）。
pub const BACKGROUND_RGB: [u8; 3] = [255, 203, 9];
/// 文字颜色（RGB）。
pub const TEXT_RGB: [u8; 3] = [0, 0, 0];

const HERSHEY_FACE: i32 = imgproc::FONT_HERSHEY_SIMPLEX;

/// 车牌文字使用的字体。
pub enum PlateFont {
    /// 从 TrueType/OpenType 文件加载的字体。
    TrueType { font: FontVec, path: PathBuf },
    /// OpenCV 内置的 Hershey Simplex 字体，字体文件不可用时的兜底。
    Hershey,
}

impl PlateFont {
    /// 加载字体；找不到或解析失败时退回内置字体并记录警告，不会返回错误。
    ///
    /// 查找顺序：按给定路径直接打开；若只给了文件名，再到系统字体目录中按文件名搜索。
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            debug!("未指定字体文件，使用内置 Hershey 字体");
            return Self::Hershey;
        };

        let Some(resolved) = locate_font(path) else {
            warn!("找不到字体 {}，改用内置 Hershey 字体", path.display());
            return Self::Hershey;
        };

        match fs::read(&resolved)
            .map_err(|err| err.to_string())
            .and_then(|bytes| FontVec::try_from_vec(bytes).map_err(|err| err.to_string()))
        {
            Ok(font) => {
                debug!("已加载字体 {}", resolved.display());
                Self::TrueType {
                    font,
                    path: resolved,
                }
            }
            Err(err) => {
                warn!(
                    "字体 {} 加载失败（{err}），改用内置 Hershey 字体",
                    resolved.display()
                );
                Self::Hershey
            }
        }
    }

    /// 是否为兜底的内置字体。
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Hershey)
    }

    /// 在 `width x height` 的底色画布上居中绘制文字，返回 BGR `Mat`。
    pub fn render_centered(
        &self,
        text: &str,
        width: u32,
        height: u32,
        text_size_px: u32,
    ) -> image_proc::Result<Mat> {
        match self {
            Self::TrueType { font, .. } => {
                render_truetype(font, text, width, height, text_size_px)
            }
            Self::Hershey => render_hershey(text, width, height, text_size_px),
        }
    }
}

impl std::fmt::Debug for PlateFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TrueType { path, .. } => f.debug_tuple("TrueType").field(path).finish(),
            Self::Hershey => f.write_str("Hershey"),
        }
    }
}

fn render_truetype(
    font: &FontVec,
    text: &str,
    width: u32,
    height: u32,
    text_size_px: u32,
) -> image_proc::Result<Mat> {
    let scale = PxScale::from(text_size_px as f32);
    let mut plate = RgbImage::from_pixel(width, height, Rgb(BACKGROUND_RGB));

    // 按实际着墨范围居中，抵消字形的上沿与左侧留白。
    if let Some(ink) = ink_bounds(font, scale, text) {
        let x = (width as i32 - ink.width()).div_euclid(2) - ink.min_x;
        let y = (height as i32 - ink.height()).div_euclid(2) - ink.min_y;
        draw_text_mut(&mut plate, Rgb(TEXT_RGB), x, y, scale, font, text);
    }
    rgb_image_to_mat(&plate)
}

/// 文字在绘制原点 `(0, 0)` 下的着墨像素范围，`max` 不含。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InkBounds {
    min_x: i32,
    min_y: i32,
    max_x: i32,
    max_y: i32,
}

impl InkBounds {
    fn width(&self) -> i32 {
        self.max_x - self.min_x
    }

    fn height(&self) -> i32 {
        self.max_y - self.min_y
    }
}

/// 以与 `draw_text_mut` 相同的方式排布字形，合并各字形的像素边界。
///
/// 没有可见字形（空串或全是空格）时返回 `None`。
fn ink_bounds(font: &FontVec, scale: PxScale, text: &str) -> Option<InkBounds> {
    let scaled = font.as_scaled(scale);
    let mut caret = 0.0f32;
    let mut previous = None;
    let mut bounds: Option<InkBounds> = None;

    for c in text.chars() {
        let id = scaled.glyph_id(c);
        let glyph = id.with_scale_and_position(scale, point(caret, scaled.ascent()));
        caret += scaled.h_advance(id);
        let Some(outlined) = scaled.outline_glyph(glyph) else {
            continue;
        };
        if let Some(previous) = previous {
            caret += scaled.kern(id, previous);
        }
        previous = Some(id);

        let px = outlined.px_bounds();
        let glyph_bounds = InkBounds {
            min_x: px.min.x as i32,
            min_y: px.min.y as i32,
            max_x: px.max.x.ceil() as i32,
            max_y: px.max.y.ceil() as i32,
        };
        bounds = Some(match bounds {
            None => glyph_bounds,
            Some(b) => InkBounds {
                min_x: b.min_x.min(glyph_bounds.min_x),
                min_y: b.min_y.min(glyph_bounds.min_y),
                max_x: b.max_x.max(glyph_bounds.max_x),
                max_y: b.max_y.max(glyph_bounds.max_y),
            },
        });
    }
    bounds
}

fn render_hershey(
    text: &str,
    width: u32,
    height: u32,
    text_size_px: u32,
) -> image_proc::Result<Mat> {
    let thickness = (text_size_px as i32 / 12).max(1);
    // 数字高度约为字号的 0.7 倍，与 TrueType 渲染大致对齐。
    let glyph_height = ((text_size_px as f64) * 0.7).round().max(1.0) as i32;
    let mut font_scale =
        imgproc::get_font_scale_from_height(HERSHEY_FACE, glyph_height, thickness)?;

    let mut baseline = 0;
    let mut size =
        imgproc::get_text_size(text, HERSHEY_FACE, font_scale, thickness, &mut baseline)?;
    // Hershey 字形偏宽，超出车牌宽度的 90% 时按比例缩小。
    let max_width = width as f64 * 0.9;
    if size.width as f64 > max_width {
        font_scale *= max_width / size.width as f64;
        size = imgproc::get_text_size(text, HERSHEY_FACE, font_scale, thickness, &mut baseline)?;
    }
    let origin = Point::new(
        (width as i32 - size.width).div_euclid(2),
        (height as i32 + size.height).div_euclid(2),
    );

    let [r, g, b] = BACKGROUND_RGB;
    let mut plate = Mat::new_rows_cols_with_default(
        height as i32,
        width as i32,
        CV_8UC3,
        Scalar::new(b as f64, g as f64, r as f64, 0.0),
    )?;
    let [r, g, b] = TEXT_RGB;
    imgproc::put_text(
        &mut plate,
        text,
        origin,
        HERSHEY_FACE,
        font_scale,
        Scalar::new(b as f64, g as f64, r as f64, 0.0),
        thickness,
        imgproc::LINE_AA,
        false,
    )?;
    Ok(plate)
}

/// 直接存在的路径原样返回；否则按文件名在系统字体目录中搜索。
fn locate_font(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    if path.components().count() != 1 {
        return None;
    }
    let file_name = path.file_name()?.to_str()?.to_ascii_lowercase();

    system_font_dirs()
        .into_iter()
        .filter(|dir| dir.is_dir())
        .flat_map(|dir| {
            WalkDir::new(dir)
                .max_depth(4)
                .into_iter()
                .filter_map(|entry| entry.ok())
        })
        .find(|entry| {
            entry.file_type().is_file()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.to_ascii_lowercase() == file_name)
        })
        .map(|entry| entry.into_path())
}

fn system_font_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(windir) = std::env::var_os("WINDIR") {
        dirs.push(PathBuf::from(windir).join("Fonts"));
    }
    if let Some(home) = std::env::var_os("HOME") {
        let home = PathBuf::from(home);
        dirs.push(home.join(".fonts"));
        dirs.push(home.join(".local/share/fonts"));
        dirs.push(home.join("Library/Fonts"));
    }
    dirs.push(PathBuf::from("/usr/share/fonts"));
    dirs.push(PathBuf::from("/usr/local/share/fonts"));
    dirs.push(PathBuf::from("/Library/Fonts"));
    dirs.push(PathBuf::from("/System/Library/Fonts"));
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::Vec3b;

    #[test]
    fn missing_font_falls_back_to_hershey() {
        let font = PlateFont::load(Some(Path::new("definitely-not-a-font-4f2a.ttf")));
        assert!(font.is_fallback());
        assert!(PlateFont::load(None).is_fallback());
    }

    #[test]
    fn corrupt_font_file_falls_back_to_hershey() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ttf");
        fs::write(&path, b"not a font").unwrap();
        assert!(PlateFont::load(Some(&path)).is_fallback());
    }

    /// 深色（文字）像素的行、列范围，闭区间。
    fn dark_extent(plate: &Mat) -> Option<((i32, i32), (i32, i32))> {
        let mut rows: Option<(i32, i32)> = None;
        let mut cols: Option<(i32, i32)> = None;
        for y in 0..plate.rows() {
            for x in 0..plate.cols() {
                if plate.at_2d::<Vec3b>(y, x).unwrap()[1] < 100 {
                    rows = Some(rows.map_or((y, y), |(a, b)| (a.min(y), b.max(y))));
                    cols = Some(cols.map_or((x, x), |(a, b)| (a.min(x), b.max(x))));
                }
            }
        }
        Some((rows?, cols?))
    }

    fn any_system_font() -> Option<PlateFont> {
        [
            "DejaVuSans.ttf",
            "LiberationSans-Regular.ttf",
            "bahnschrift.ttf",
            "arial.ttf",
            "Arial.ttf",
            "FreeSans.ttf",
        ]
        .into_iter()
        .map(|name| PlateFont::load(Some(Path::new(name))))
        .find(|font| !font.is_fallback())
    }

    #[test]
    fn hershey_render_has_plate_size_and_dark_text() {
        let plate = PlateFont::Hershey
            .render_centered("1 2 3 4 5 6", 128, 32, 25)
            .unwrap();
        assert_eq!((plate.cols(), plate.rows()), (128, 32));

        let corner = *plate.at_2d::<Vec3b>(0, 0).unwrap();
        assert_eq!((corner[0], corner[1], corner[2]), (9, 203, 255));

        let mut dark = 0;
        for y in 0..32 {
            for x in 0..128 {
                let px = plate.at_2d::<Vec3b>(y, x).unwrap();
                if px[1] < 100 {
                    dark += 1;
                }
            }
        }
        assert!(dark > 20, "未绘制出文字像素");
    }

    #[test]
    fn truetype_text_is_centered_by_ink() {
        let Some(font) = any_system_font() else {
            eprintln!("系统中没有可用的 TrueType 字体，跳过");
            return;
        };

        for (width, height, size) in [(128, 32, 25), (512, 128, 100)] {
            let plate = font
                .render_centered("1 2 3 4 5 6", width, height, size)
                .unwrap();
            assert_eq!((plate.cols(), plate.rows()), (width as i32, height as i32));

            let ((top, bottom), (left, right)) =
                dark_extent(&plate).expect("未绘制出文字像素");
            let (above, below) = (top, height as i32 - 1 - bottom);
            let (before, after) = (left, width as i32 - 1 - right);
            assert!(
                (above - below).abs() <= 2,
                "{width}x{height}：上边距 {above}，下边距 {below}"
            );
            assert!(
                (before - after).abs() <= 2,
                "{width}x{height}：左边距 {before}，右边距 {after}"
            );
        }
    }

    #[test]
    fn blank_text_leaves_plain_plate() {
        let Some(font) = any_system_font() else {
            return;
        };
        let plate = font.render_centered("   ", 128, 32, 25).unwrap();
        assert!(dark_extent(&plate).is_none());
    }
}
