use crate::config::PlateSpec;
use crate::font::PlateFont;
use image_proc::Corners;
use opencv::core::{self, BORDER_CONSTANT, Mat, Scalar};
use rand::Rng;
use std::path::Path;

/// 车牌号位数。
const PLATE_DIGITS: usize = 6;

/// 合成结果：补边后的车牌图像、车牌区域角点与车牌号。
pub struct SynthesizedPlate {
    /// BGR 图像，尺寸为 `PlateSpec::padded_size()`。
    pub image: Mat,
    /// 车牌在补边画布中的角点（顺时针，自左上起）。
    pub corners: Corners,
    pub plate_number: String,
}

/// 生成 6 位以空格分隔的数字车牌号，例如 `"3 0 9 1 7 4"`。
pub fn random_plate_number(rng: &mut impl Rng) -> String {
    let digits: Vec<String> = (0..PLATE_DIGITS)
        .map(|_| rng.gen_range(0..10u8).to_string())
        .collect();
    digits.join(" ")
}

/// 按固定尺寸与字体渲染车牌，并嵌入黑色补边画布。
#[derive(Debug)]
pub struct PlateSynthesizer {
    spec: PlateSpec,
    font: PlateFont,
}

impl PlateSynthesizer {
    pub fn new(spec: PlateSpec, font: PlateFont) -> Self {
        Self { spec, font }
    }

    /// 加载字体（失败时退回内置字体）后构造合成器。
    pub fn with_font_path(spec: PlateSpec, font_path: Option<&Path>) -> Self {
        Self::new(spec, PlateFont::load(font_path))
    }

    pub fn spec(&self) -> PlateSpec {
        self.spec
    }

    pub fn font(&self) -> &PlateFont {
        &self.font
    }

    /// 随机生成车牌号并合成一张补边车牌。
    pub fn synthesize(&self, rng: &mut impl Rng) -> image_proc::Result<SynthesizedPlate> {
        let plate_number = random_plate_number(rng);
        self.synthesize_text(plate_number)
    }

    /// 使用给定文字合成补边车牌。
    pub fn synthesize_text(&self, plate_number: String) -> image_proc::Result<SynthesizedPlate> {
        let PlateSpec {
            width,
            height,
            text_size,
        } = self.spec;
        let plate = self
            .font
            .render_centered(&plate_number, width, height, text_size)?;
        let (image, corners) = embed_centered(&plate, self.spec)?;
        Ok(SynthesizedPlate {
            image,
            corners,
            plate_number,
        })
    }
}

/// 把 `width x height` 的车牌居中放进 `(1.5·width, 2·height)` 的黑色画布。
fn embed_centered(plate: &Mat, spec: PlateSpec) -> image_proc::Result<(Mat, Corners)> {
    let (padded_w, padded_h) = spec.padded_size();
    let (w, h) = (spec.width as i32, spec.height as i32);
    let left = (padded_w as i32 - w) / 2;
    let top = (padded_h as i32 - h) / 2;
    let right = padded_w as i32 - w - left;
    let bottom = padded_h as i32 - h - top;

    let mut padded = Mat::default();
    core::copy_make_border(
        plate,
        &mut padded,
        top,
        bottom,
        left,
        right,
        BORDER_CONSTANT,
        Scalar::all(0.0),
    )?;
    Ok((padded, Corners::from_rect(left, top, w, h)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::Vec3b;
    use opencv::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn synthesizer(width: u32, height: u32, text_size: u32) -> PlateSynthesizer {
        PlateSynthesizer::new(
            PlateSpec {
                width,
                height,
                text_size,
            },
            PlateFont::Hershey,
        )
    }

    #[test]
    fn plate_number_is_six_spaced_digits() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..50 {
            let number = random_plate_number(&mut rng);
            let chars: Vec<char> = number.chars().collect();
            assert_eq!(chars.len(), 11, "{number:?}");
            for (i, c) in chars.iter().enumerate() {
                if i % 2 == 0 {
                    assert!(c.is_ascii_digit(), "{number:?}");
                } else {
                    assert_eq!(*c, ' ', "{number:?}");
                }
            }
        }
    }

    #[test]
    fn padded_canvas_and_corners_match_plate_size() {
        for (w, h, t) in [(128, 32, 25), (129, 33, 20), (256, 64, 50)] {
            let synth = synthesizer(w, h, t);
            let plate = synth.synthesize(&mut StdRng::seed_from_u64(1)).unwrap();
            let (pw, ph) = synth.spec().padded_size();
            assert_eq!((plate.image.cols(), plate.image.rows()), (pw as i32, ph as i32));

            let [tl, tr, br, bl] = *plate.corners.points();
            assert!(plate.corners.is_axis_aligned());
            assert_eq!(tr.x - tl.x, w as f32);
            assert_eq!(bl.y - tl.y, h as f32);
            assert_eq!((br.x, br.y), (tr.x, bl.y));
        }
    }

    #[test]
    fn padding_is_black_and_plate_keeps_background() {
        let synth = synthesizer(128, 32, 25);
        let plate = synth.synthesize_text("0 0 0 0 0 0".into()).unwrap();
        let [tl, ..] = *plate.corners.points();

        let pad = *plate.image.at_2d::<Vec3b>(0, 0).unwrap();
        assert_eq!((pad[0], pad[1], pad[2]), (0, 0, 0));
        let inside = *plate
            .image
            .at_2d::<Vec3b>(tl.y as i32 + 1, tl.x as i32 + 1)
            .unwrap();
        assert_eq!((inside[0], inside[1], inside[2]), (9, 203, 255));
        assert_eq!(plate.plate_number, "0 0 0 0 0 0");
    }
}
