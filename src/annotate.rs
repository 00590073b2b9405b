//! Frame annotation
//!
//! The recorded frame gets the face box and an identity label. The streamed
//! frame additionally gets a status line and the decision timestamp. Both are
//! re-encoded as JPEG.
//!
//! Labels need a TrueType/OpenType font; without one only the box is drawn.
//! Raw frames and JPEG bytes that fail to decode pass through unchanged.

use ab_glyph::{FontVec, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect as PixelRect;
use std::path::Path;

use crate::model::{Decision, Image, ImageEncoding, Rect};
use crate::protocol::WIRE_TIME_FORMAT;
use crate::{EntryError, Result};

/// JPEG quality of annotated frames
pub const JPEG_QUALITY: u8 = 85;

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

const BOX_THICKNESS: u32 = 3;
const LABEL_HEIGHT: u32 = 35;

/// The two annotated copies of one capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedFrames {
    /// Written by the recorder
    pub recorded: Image,
    /// Sent to the gateway
    pub streamed: Image,
}

pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    /// Box-only annotation
    pub fn plain() -> Self {
        Self { font: None }
    }

    pub fn with_font(font: FontVec) -> Self {
        Self { font: Some(font) }
    }

    pub fn from_font_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let font = FontVec::try_from_vec(data)
            .map_err(|e| EntryError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(Self::with_font(font))
    }

    /// Font from `path` when given; falls back to box-only annotation.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::plain();
        };
        match Self::from_font_file(path) {
            Ok(annotator) => {
                tracing::info!(font = %path.display(), "Annotation font loaded");
                annotator
            }
            Err(e) => {
                tracing::warn!(error = %e, "Annotation font unavailable, labels disabled");
                Self::plain()
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn annotate(&self, capture: Image, decision: &Decision, face: Option<Rect>) -> AnnotatedFrames {
        if capture.encoding != ImageEncoding::Jpeg {
            return pass_through(capture);
        }
        let mut canvas = match image::load_from_memory_with_format(&capture.data, ImageFormat::Jpeg) {
            Ok(frame) => frame.to_rgb8(),
            Err(e) => {
                tracing::warn!(error = %e, "Frame did not decode, recording as captured");
                return pass_through(capture);
            }
        };

        let color = if decision.is_granted() { GREEN } else { RED };
        if let Some(face) = face {
            self.mark_face(&mut canvas, face, color, decision);
        }
        let recorded = match encode(&canvas) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "JPEG encode failed, recording as captured");
                return pass_through(capture);
            }
        };

        self.banner(&mut canvas, color, decision);
        let streamed = match encode(&canvas) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "JPEG encode failed, streaming recorded frame");
                recorded.clone()
            }
        };

        AnnotatedFrames { recorded, streamed }
    }

    fn mark_face(&self, canvas: &mut RgbImage, face: Rect, color: Rgb<u8>, decision: &Decision) {
        if face.right <= face.left || face.bottom <= face.top {
            return;
        }
        let width = face.right - face.left;
        let height = face.bottom - face.top;
        for i in 0..BOX_THICKNESS {
            if width <= 2 * i || height <= 2 * i {
                break;
            }
            let ring = PixelRect::at((face.left + i) as i32, (face.top + i) as i32)
                .of_size(width - 2 * i, height - 2 * i);
            draw_hollow_rect_mut(canvas, ring, color);
        }

        let Some(font) = &self.font else {
            return;
        };
        let label_top = face.top as i32 - LABEL_HEIGHT as i32;
        draw_filled_rect_mut(
            canvas,
            PixelRect::at(face.left as i32, label_top).of_size(width, LABEL_HEIGHT),
            color,
        );
        let label = if decision.is_granted() {
            format!("{} ({:.2})", decision.identity(), decision.confidence())
        } else {
            decision.identity().to_string()
        };
        draw_text_mut(
            canvas,
            WHITE,
            face.left as i32 + 6,
            label_top + 6,
            PxScale::from(24.0),
            font,
            &label,
        );
    }

    fn banner(&self, canvas: &mut RgbImage, color: Rgb<u8>, decision: &Decision) {
        let Some(font) = &self.font else {
            return;
        };
        let status = format!("{} - {}", decision.identity(), decision.status());
        draw_text_mut(canvas, color, 10, 8, PxScale::from(32.0), font, &status);
        let timestamp = decision.timestamp().format(WIRE_TIME_FORMAT).to_string();
        draw_text_mut(canvas, WHITE, 10, 48, PxScale::from(22.0), font, &timestamp);
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::plain()
    }
}

fn pass_through(image: Image) -> AnnotatedFrames {
    AnnotatedFrames {
        streamed: image.clone(),
        recorded: image,
    }
}

fn encode(canvas: &RgbImage) -> std::result::Result<Image, image::ImageError> {
    let mut data = Vec::new();
    JpegEncoder::new_with_quality(&mut data, JPEG_QUALITY).encode_image(canvas)?;
    Ok(Image::jpeg(canvas.width(), canvas.height(), data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn grey_jpeg(width: u32, height: u32) -> Image {
        let frame = RgbImage::from_pixel(width, height, Rgb([128, 128, 128]));
        let mut buf = std::io::Cursor::new(Vec::new());
        frame.write_to(&mut buf, ImageFormat::Jpeg).unwrap();
        Image::jpeg(width, height, buf.into_inner())
    }

    fn decode(image: &Image) -> RgbImage {
        image::load_from_memory(&image.data).unwrap().to_rgb8()
    }

    fn face() -> Rect {
        Rect {
            top: 40,
            right: 90,
            bottom: 100,
            left: 30,
        }
    }

    #[test]
    fn test_box_drawn_in_decision_color() {
        let annotator = Annotator::plain();
        let decision = Decision::granted("alice", 0.8, Local::now());
        let frames = annotator.annotate(grey_jpeg(128, 128), &decision, Some(face()));

        let recorded = decode(&frames.recorded);
        let edge = recorded.get_pixel(31, 70);
        assert!(edge[1] > 180 && edge[0] < 100, "expected green edge, got {:?}", edge);
        let inside = recorded.get_pixel(60, 70);
        assert!(inside[1] < 180, "interior should stay grey, got {:?}", inside);

        let denied = annotator.annotate(grey_jpeg(128, 128), &Decision::denied(Local::now()), Some(face()));
        let edge = decode(&denied.recorded).get_pixel(31, 70).to_owned();
        assert!(edge[0] > 180 && edge[1] < 100, "expected red edge, got {:?}", edge);
    }

    #[test]
    fn test_reencoded_as_jpeg() {
        let decision = Decision::denied(Local::now());
        let frames = Annotator::plain().annotate(grey_jpeg(64, 48), &decision, None);
        for image in [&frames.recorded, &frames.streamed] {
            assert_eq!(image.encoding, ImageEncoding::Jpeg);
            assert_eq!((image.width, image.height), (64, 48));
            assert_eq!(&image.data[..2], &[0xFF, 0xD8]);
        }
    }

    #[test]
    fn test_raw_and_undecodable_pass_through() {
        let decision = Decision::granted("bob", 0.9, Local::now());
        let raw = Image {
            width: 2,
            height: 1,
            encoding: ImageEncoding::Raw,
            data: vec![1, 2, 3, 4, 5, 6],
        };
        let frames = Annotator::plain().annotate(raw.clone(), &decision, Some(face()));
        assert_eq!(frames.recorded, raw);
        assert_eq!(frames.streamed, raw);

        let broken = Image::jpeg(4, 4, vec![0xFF, 0xD8, 0x10, 0xFF, 0xD9]);
        let frames = Annotator::plain().annotate(broken.clone(), &decision, Some(face()));
        assert_eq!(frames.recorded, broken);
        assert_eq!(frames.streamed, broken);
    }

    #[test]
    fn test_degenerate_box_ignored() {
        let decision = Decision::granted("carol", 0.7, Local::now());
        let flat = Rect {
            top: 10,
            right: 10,
            bottom: 10,
            left: 10,
        };
        let frames = Annotator::plain().annotate(grey_jpeg(32, 32), &decision, Some(flat));
        assert_eq!(frames.recorded.encoding, ImageEncoding::Jpeg);
    }

    #[test]
    fn test_missing_font_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let annotator = Annotator::load(Some(&dir.path().join("missing.ttf")));
        assert!(!annotator.has_font());
        assert!(!Annotator::load(None).has_font());

        let bogus = dir.path().join("bogus.ttf");
        std::fs::write(&bogus, b"not a font").unwrap();
        assert!(matches!(Annotator::from_font_file(&bogus), Err(EntryError::Config(_))));
    }
}
