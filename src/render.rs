//! Writes laid-out pages as a PDF.

use crate::layout::{DocumentPage, DrawOp, PAGE_HEIGHT, PAGE_WIDTH};
use anyhow::{anyhow, Context};
use base64::Engine;
use pdf_writer::{Content, Filter, Name, Pdf, Rect, Ref, Str};
use std::collections::HashMap;

const PT_PER_MM: f32 = 72.0 / 25.4;
const FONT_REGULAR: &[u8] = b"F1";
const FONT_BOLD: &[u8] = b"F2";

fn pt(mm: f64) -> f32 {
    mm as f32 * PT_PER_MM
}

/// Page y (mm from the top) to PDF user space (pt from the bottom).
fn flip(y_mm: f64) -> f32 {
    pt(PAGE_HEIGHT - y_mm)
}

/// Lossy WinAnsi: ASCII and Latin-1 pass through, the rest become `?`.
fn to_winansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            code @ 0x20..=0x7E => code as u8,
            code @ 0xA0..=0xFF => code as u8,
            _ => b'?',
        })
        .collect()
}

struct DecodedImage {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
    alpha: Option<Vec<u8>>,
}

fn decode_data_url(src: &str) -> anyhow::Result<DecodedImage> {
    let payload = match src.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| anyhow!("data URL has no payload"))?,
        None => src,
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .context("signature is not valid base64")?;
    let rgba = image::load_from_memory_with_format(&bytes, image::ImageFormat::Png)
        .context("signature is not a PNG image")?
        .to_rgba8();
    let (width, height) = rgba.dimensions();
    let has_alpha = rgba.pixels().any(|p| p.0[3] < 255);
    let rgb = rgba
        .pixels()
        .flat_map(|p| [p.0[0], p.0[1], p.0[2]])
        .collect();
    let alpha = has_alpha.then(|| rgba.pixels().map(|p| p.0[3]).collect());
    Ok(DecodedImage {
        width,
        height,
        rgb,
        alpha,
    })
}

struct RefAlloc(i32);

impl RefAlloc {
    fn next(&mut self) -> Ref {
        self.0 += 1;
        Ref::new(self.0)
    }
}

fn draw(content: &mut Content, op: &DrawOp, images: &HashMap<&str, String>) {
    match op {
        DrawOp::Text {
            x,
            y,
            size,
            bold,
            text,
        } => {
            let font = if *bold { FONT_BOLD } else { FONT_REGULAR };
            let bytes = to_winansi(text);
            content
                .begin_text()
                .set_font(Name(font), *size as f32)
                .next_line(pt(*x), flip(*y))
                .show(Str(&bytes))
                .end_text();
        }
        DrawOp::Line {
            x1,
            y1,
            x2,
            y2,
            width,
        } => {
            content
                .set_line_width(pt(*width))
                .move_to(pt(*x1), flip(*y1))
                .line_to(pt(*x2), flip(*y2))
                .stroke();
        }
        DrawOp::Rect {
            x,
            y,
            w,
            h,
            fill,
            stroke,
        } => {
            let (rx, ry, rw, rh) = (pt(*x), flip(*y + *h), pt(*w), pt(*h));
            if let Some(gray) = fill {
                content
                    .set_fill_gray(*gray as f32)
                    .rect(rx, ry, rw, rh)
                    .fill_nonzero()
                    .set_fill_gray(0.0);
            }
            if *stroke {
                content.set_line_width(pt(0.1)).rect(rx, ry, rw, rh).stroke();
            }
        }
        DrawOp::Image { x, y, w, h, src } => {
            let Some(name) = images.get(src.as_str()) else {
                return;
            };
            content.save_state();
            content.transform([pt(*w), 0.0, 0.0, pt(*h), pt(*x), flip(*y + *h)]);
            content.x_object(Name(name.as_bytes()));
            content.restore_state();
        }
    }
}

/// Renders pages to PDF bytes. An image that cannot be decoded is left out
/// of the document with a warning.
pub fn render_pdf(pages: &[DocumentPage]) -> anyhow::Result<Vec<u8>> {
    if pages.is_empty() {
        return Err(anyhow!("a report needs at least one page"));
    }
    let mut alloc = RefAlloc(0);
    let catalog_id = alloc.next();
    let pages_id = alloc.next();
    let regular_id = alloc.next();
    let bold_id = alloc.next();

    let mut pdf = Pdf::new();
    pdf.type1_font(regular_id)
        .base_font(Name(b"Helvetica"))
        .encoding_predefined(Name(b"WinAnsiEncoding"));
    pdf.type1_font(bold_id)
        .base_font(Name(b"Helvetica-Bold"))
        .encoding_predefined(Name(b"WinAnsiEncoding"));

    let mut images: HashMap<&str, String> = HashMap::new();
    let mut image_refs: Vec<(String, Ref)> = Vec::new();
    let sources = pages
        .iter()
        .flat_map(|p| p.blocks.iter())
        .flat_map(|b| b.ops.iter())
        .filter_map(|op| match op {
            DrawOp::Image { src, .. } => Some(src.as_str()),
            _ => None,
        });
    for src in sources {
        if images.contains_key(src) {
            continue;
        }
        let decoded = match decode_data_url(src) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("skipping signature image: {:#}", e);
                continue;
            }
        };
        let xobj_id = alloc.next();
        let mask_id = match &decoded.alpha {
            Some(alpha) => {
                let mask_id = alloc.next();
                let compressed = miniz_oxide::deflate::compress_to_vec_zlib(alpha, 6);
                let mut mask = pdf.image_xobject(mask_id, &compressed);
                mask.filter(Filter::FlateDecode);
                mask.width(decoded.width as i32);
                mask.height(decoded.height as i32);
                mask.color_space().device_gray();
                mask.bits_per_component(8);
                Some(mask_id)
            }
            None => None,
        };
        let compressed = miniz_oxide::deflate::compress_to_vec_zlib(&decoded.rgb, 6);
        let mut xobj = pdf.image_xobject(xobj_id, &compressed);
        xobj.filter(Filter::FlateDecode);
        xobj.width(decoded.width as i32);
        xobj.height(decoded.height as i32);
        xobj.color_space().device_rgb();
        xobj.bits_per_component(8);
        if let Some(mask_id) = mask_id {
            xobj.s_mask(mask_id);
        }
        drop(xobj);

        let name = format!("Im{}", image_refs.len() + 1);
        image_refs.push((name.clone(), xobj_id));
        images.insert(src, name);
    }

    let mut page_ids = Vec::with_capacity(pages.len());
    for page in pages {
        let page_id = alloc.next();
        let content_id = alloc.next();
        page_ids.push(page_id);

        let mut content = Content::new();
        for op in page.blocks.iter().flat_map(|b| b.ops.iter()) {
            draw(&mut content, op, &images);
        }
        let compressed = miniz_oxide::deflate::compress_to_vec_zlib(content.finish().as_slice(), 6);
        pdf.stream(content_id, &compressed).filter(Filter::FlateDecode);

        let mut pdf_page = pdf.page(page_id);
        pdf_page
            .media_box(Rect::new(0.0, 0.0, pt(PAGE_WIDTH), pt(PAGE_HEIGHT)))
            .parent(pages_id)
            .contents(content_id);
        let mut resources = pdf_page.resources();
        resources
            .fonts()
            .pair(Name(FONT_REGULAR), regular_id)
            .pair(Name(FONT_BOLD), bold_id);
        if !image_refs.is_empty() {
            let mut xobjects = resources.x_objects();
            for (name, id) in &image_refs {
                xobjects.pair(Name(name.as_bytes()), *id);
            }
        }
    }

    pdf.catalog(catalog_id).pages(pages_id);
    pdf.pages(pages_id)
        .kids(page_ids.iter().copied())
        .count(page_ids.len() as i32);
    Ok(pdf.finish())
}
