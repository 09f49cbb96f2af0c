//! Integration test: push a synthetic scanned page through decoding,
//! binarization, mask editing and background isolation.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage};
use vellum_pipeline::{
    DistanceNorm, IsolationConfig, IsolationOutput, MaskCommand, PipelineError, Raster,
    SauvolaConfig,
};

const WIDTH: u32 = 80;
const HEIGHT: u32 = 60;

/// Two 6x6 ink blocks on slightly yellowed paper with a left-to-right
/// brightness gradient.
fn is_ink(x: u32, y: u32) -> bool {
    let block = |x0: u32, y0: u32| (x0..x0 + 6).contains(&x) && (y0..y0 + 6).contains(&y);
    block(20, 20) || block(50, 30)
}

fn page() -> RgbImage {
    RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
        if is_ink(x, y) {
            Rgb([30, 30, 35])
        } else {
            let paper = 200 + u8::try_from(x / 4).unwrap();
            Rgb([paper, paper, paper - 10])
        }
    })
}

fn encode_png(img: &RgbImage) -> Vec<u8> {
    let mut buf = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buf)
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
        .unwrap();
    buf
}

fn small_window_sauvola() -> SauvolaConfig {
    SauvolaConfig {
        window_size: 15,
        ..SauvolaConfig::default()
    }
}

#[test]
fn binarize_separates_ink_from_paper() {
    let bytes = encode_png(&page());
    let binary = vellum_pipeline::binarize_bytes(&bytes, &small_window_sauvola()).unwrap();

    assert!(binary.is_bilevel(), "binary output must only hold 0 and 255");
    let Raster::Gray(binary) = binary else {
        panic!("binary output should be single-channel");
    };
    assert_eq!(binary.dimensions(), (WIDTH, HEIGHT));
    for (x, y, p) in binary.enumerate_pixels() {
        let expected = if is_ink(x, y) { 0 } else { 255 };
        assert_eq!(p.0[0], expected, "pixel ({x},{y})");
    }
}

#[test]
fn mask_commands_edit_binarized_page() {
    let bytes = encode_png(&page());
    let mut mask = vellum_pipeline::binarize_bytes(&bytes, &small_window_sauvola())
        .unwrap()
        .into_gray();

    // Ink as foreground, then grow it by two pixels.
    let commands = [
        MaskCommand::Negate,
        MaskCommand::Outset {
            distance: 2.0,
            norm: DistanceNorm::L2,
        },
    ];
    vellum_pipeline::morphology::apply_commands(&mut mask, &commands).unwrap();

    assert_eq!(mask.get_pixel(22, 22).0[0], 255, "ink stays foreground");
    assert_eq!(mask.get_pixel(18, 22).0[0], 255, "two pixels left of ink is grown");
    assert_eq!(mask.get_pixel(10, 10).0[0], 0, "open paper stays background");
}

#[test]
fn isolation_flattens_paper_and_keeps_ink() {
    let bytes = encode_png(&page());
    let config = IsolationConfig {
        window_size: 15,
        ..IsolationConfig::default()
    };
    let result = vellum_pipeline::isolate_bytes(&bytes, config).unwrap();

    let Raster::Rgb(out) = &result.output else {
        panic!("colour input should stay colour");
    };
    assert_eq!(out.dimensions(), (WIDTH, HEIGHT));

    // alpha * paper / background is close to 0.9 * 255 everywhere on paper.
    for x in [2, 40, 77] {
        let p = out.get_pixel(x, 5).0;
        assert!(
            p.iter().all(|&c| (215..=240).contains(&c)),
            "paper at ({x},5) should be flattened, got {p:?}"
        );
    }
    let ink = out.get_pixel(22, 22).0;
    assert!(ink.iter().all(|&c| c < 80), "ink should stay dark, got {ink:?}");

    let names: Vec<_> = result
        .diagnostics
        .stages
        .iter()
        .map(|s| s.metrics.stage_name())
        .collect();
    assert_eq!(names, ["Threshold", "Refine Mask", "Inpaint", "Blur", "Compose"]);
}

#[test]
fn background_output_removes_ink() {
    let bytes = encode_png(&page());
    let config = IsolationConfig {
        window_size: 15,
        output: IsolationOutput::Background,
        ..IsolationConfig::default()
    };
    let background = vellum_pipeline::isolate_bytes(&bytes, config)
        .unwrap()
        .output
        .to_gray();

    let at_ink = background.get_pixel(22, 22).0[0];
    assert!(at_ink > 180, "ink should be inpainted away, got {at_ink}");
}

#[test]
fn grayscale_page_stays_grayscale() {
    let gray = image::DynamicImage::ImageRgb8(page()).to_luma8();
    let mut bytes = Vec::new();
    image::codecs::png::PngEncoder::new(&mut bytes)
        .write_image(gray.as_raw(), WIDTH, HEIGHT, ExtendedColorType::L8)
        .unwrap();

    let config = IsolationConfig {
        window_size: 15,
        ..IsolationConfig::default()
    };
    let result = vellum_pipeline::isolate_bytes(&bytes, config).unwrap();
    assert_eq!(result.output.channels(), 1);
    assert_eq!(result.diagnostics.summary.channels, 1);
}

#[test]
fn unreadable_input_is_reported() {
    let config = SauvolaConfig::default();
    assert!(matches!(
        vellum_pipeline::binarize_bytes(&[], &config),
        Err(PipelineError::EmptyInput)
    ));
    assert!(matches!(
        vellum_pipeline::binarize_bytes(b"not an image", &config),
        Err(PipelineError::ImageDecode(_))
    ));
}

#[test]
fn invalid_config_is_rejected_before_processing() {
    let bytes = encode_png(&page());
    let config = IsolationConfig {
        background_blur: 4,
        ..IsolationConfig::default()
    };
    assert!(matches!(
        vellum_pipeline::isolate_bytes(&bytes, config),
        Err(PipelineError::InvalidConfig(_))
    ));
}
