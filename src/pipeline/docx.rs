//! Document assembly: chunks → a WordprocessingML (`.docx`) package.
//!
//! ## Layout
//!
//! ```text
//! Audit Report for {url}     ← bold, 16 pt
//! (empty spacer paragraph)
//! [chunk 0]                  ← display_width wide, height scaled
//! [chunk 1]
//! …
//! ```
//!
//! Every image is scaled by the same factor, `display_width / source_width`.
//! The source width is the page capture's width, never an individual
//! chunk's, so stacked chunks line up edge to edge.
//!
//! ## Package
//!
//! A `.docx` is a ZIP of XML parts (ECMA-376, Office Open XML). Only the
//! parts Word needs to open the file are written:
//!
//! | Part | Content |
//! |------|---------|
//! | `[Content_Types].xml` | MIME type per extension / part |
//! | `_rels/.rels` | points at the main document and core properties |
//! | `docProps/core.xml` | title and creator |
//! | `word/document.xml` | the paragraphs |
//! | `word/_rels/document.xml.rels` | one image relationship per chunk |
//! | `word/media/imageN.{jpeg,png}` | the chunk bytes, stored uncompressed |
//!
//! The output is deterministic: the same chunks always produce the same bytes.

use crate::error::AuditError;
use crate::pipeline::chunk::{check_cancelled, ImageChunk};
use crate::pipeline::encode;
use image::ImageFormat;
use quick_xml::escape::escape;
use std::fmt::Write as _;
use std::io::{Cursor, Write};
use std::sync::atomic::AtomicBool;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// English Metric Units per CSS pixel (914 400 EMU per inch, 96 px per inch).
pub const EMU_PER_PX: f64 = 9525.0;

/// Default title size in half-points (16 pt).
pub const DEFAULT_TITLE_SIZE: u32 = 32;

/// A4 portrait in twentieths of a point, with 1" margins.
const PAGE_WIDTH_TWIPS: u32 = 11906;
const PAGE_HEIGHT_TWIPS: u32 = 16838;
const PAGE_MARGIN_TWIPS: u32 = 1440;

/// One image block: a chunk plus its on-page size.
#[derive(Debug, Clone)]
pub struct DisplayBlock {
    pub chunk: ImageChunk,
    /// Width on the page in CSS pixels; identical for every block.
    pub display_width: f64,
    /// `chunk.height × display_width / source_width`.
    pub display_height: f64,
}

impl DisplayBlock {
    fn extent_emu(&self) -> (u64, u64) {
        (to_emu(self.display_width), to_emu(self.display_height))
    }
}

/// The report: a title followed by image blocks in chunk order.
///
/// Constructed once, validated on construction, and consumed by
/// [`to_docx`](Self::to_docx).
#[derive(Debug, Clone)]
pub struct AuditDocument {
    title: String,
    blocks: Vec<DisplayBlock>,
    title_size: u32,
}

impl AuditDocument {
    /// Lay out `chunks` for the page at `source_url`.
    ///
    /// # Errors
    /// * [`AuditError::EmptyInput`] — no chunks.
    /// * [`AuditError::InvalidImage`] — zero source width or a zero-height chunk.
    /// * [`AuditError::InvalidConfig`] — non-positive display width.
    /// * [`AuditError::Assembly`] — chunks out of order, duplicated or with gaps.
    pub fn new(
        source_url: &str,
        chunks: Vec<ImageChunk>,
        source_width: u32,
        display_width: f64,
    ) -> Result<Self, AuditError> {
        if chunks.is_empty() {
            return Err(AuditError::EmptyInput);
        }
        if source_width == 0 {
            return Err(AuditError::InvalidImage("source width is zero".into()));
        }
        if !(display_width.is_finite() && display_width > 0.0) {
            return Err(AuditError::InvalidConfig(format!(
                "Display width must be a positive number, got {display_width}"
            )));
        }

        let scale = display_width / f64::from(source_width);
        let mut expected_y = 0u32;
        let mut blocks = Vec::with_capacity(chunks.len());
        for (position, chunk) in chunks.into_iter().enumerate() {
            if chunk.index != position {
                return Err(AuditError::Assembly(format!(
                    "chunk at position {position} has index {}; chunks must be ordered with no gaps or duplicates",
                    chunk.index
                )));
            }
            if chunk.offset_y != expected_y {
                return Err(AuditError::Assembly(format!(
                    "chunk {position} starts at y={} but the previous chunk ended at y={expected_y}",
                    chunk.offset_y
                )));
            }
            if chunk.height == 0 {
                return Err(AuditError::InvalidImage(format!("chunk {position} has zero height")));
            }
            expected_y += chunk.height;

            let display_height = f64::from(chunk.height) * scale;
            blocks.push(DisplayBlock {
                chunk,
                display_width,
                display_height,
            });
        }

        Ok(Self {
            title: format!("Audit Report for {source_url}"),
            blocks,
            title_size: DEFAULT_TITLE_SIZE,
        })
    }

    /// Override the title size (half-points).
    pub fn with_title_size(mut self, half_points: u32) -> Self {
        self.title_size = half_points.max(2);
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn blocks(&self) -> &[DisplayBlock] {
        &self.blocks
    }

    /// Serialise to `.docx` bytes.
    pub fn to_docx(self) -> Result<Vec<u8>, AuditError> {
        self.to_docx_cancellable(&AtomicBool::new(false))
    }

    /// Like [`to_docx`](Self::to_docx), but gives up with
    /// [`AuditError::Cancelled`] once `cancel` is set. Checked before each
    /// image is prepared and before each media part is written.
    pub fn to_docx_cancellable(self, cancel: &AtomicBool) -> Result<Vec<u8>, AuditError> {
        let mut media = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            check_cancelled(cancel, "assembly")?;
            media.push(embeddable(&block.chunk)?);
        }

        let xml_options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        // JPEG/PNG are already compressed.
        let media_options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        put_part(&mut zip, "[Content_Types].xml", xml_options, content_types_xml().as_bytes())?;
        put_part(&mut zip, "_rels/.rels", xml_options, ROOT_RELS_XML.as_bytes())?;
        put_part(&mut zip, "docProps/core.xml", xml_options, self.core_xml().as_bytes())?;
        put_part(&mut zip, "word/document.xml", xml_options, self.document_xml(&media).as_bytes())?;
        put_part(
            &mut zip,
            "word/_rels/document.xml.rels",
            xml_options,
            document_rels_xml(&media).as_bytes(),
        )?;
        for (n, item) in media.iter().enumerate() {
            check_cancelled(cancel, "assembly")?;
            put_part(&mut zip, &item.part_name(n), media_options, &item.bytes)?;
        }

        let bytes = zip
            .finish()
            .map_err(|e| AuditError::Assembly(format!("zip finish: {e}")))?
            .into_inner();
        debug!("Serialised document: {} blocks, {} bytes", self.blocks.len(), bytes.len());
        Ok(bytes)
    }

    fn core_xml(&self) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
                r#"<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" "#,
                r#"xmlns:dc="http://purl.org/dc/elements/1.1/" "#,
                r#"xmlns:dcterms="http://purl.org/dc/terms/" "#,
                r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#,
                "<dc:title>{}</dc:title>",
                "<dc:creator>webpage-audit</dc:creator>",
                "</cp:coreProperties>"
            ),
            escape(self.title.as_str())
        )
    }

    fn document_xml(&self, media: &[Media]) -> String {
        let mut xml = String::with_capacity(1024 + self.blocks.len() * 1200);
        xml.push_str(concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" "#,
            r#"xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" "#,
            r#"xmlns:wp="http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing" "#,
            r#"xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" "#,
            r#"xmlns:pic="http://schemas.openxmlformats.org/drawingml/2006/picture">"#,
            "<w:body>"
        ));

        // Title, then an empty spacer paragraph.
        let _ = write!(
            xml,
            concat!(
                "<w:p><w:r><w:rPr><w:b/><w:bCs/>",
                r#"<w:sz w:val="{size}"/><w:szCs w:val="{size}"/></w:rPr>"#,
                r#"<w:t xml:space="preserve">{title}</w:t></w:r></w:p>"#,
                "<w:p/>"
            ),
            size = self.title_size,
            title = escape(self.title.as_str()),
        );

        for (n, (block, item)) in self.blocks.iter().zip(media).enumerate() {
            let (cx, cy) = block.extent_emu();
            let id = n + 1;
            let _ = write!(
                xml,
                concat!(
                    "<w:p><w:r><w:drawing>",
                    r#"<wp:inline distT="0" distB="0" distL="0" distR="0">"#,
                    r#"<wp:extent cx="{cx}" cy="{cy}"/>"#,
                    r#"<wp:effectExtent l="0" t="0" r="0" b="0"/>"#,
                    r#"<wp:docPr id="{id}" name="Chunk {id}"/>"#,
                    r#"<wp:cNvGraphicFramePr><a:graphicFrameLocks noChangeAspect="1"/></wp:cNvGraphicFramePr>"#,
                    "<a:graphic>",
                    r#"<a:graphicData uri="http://schemas.openxmlformats.org/drawingml/2006/picture">"#,
                    "<pic:pic>",
                    r#"<pic:nvPicPr><pic:cNvPr id="{id}" name="{file}"/><pic:cNvPicPr/></pic:nvPicPr>"#,
                    r#"<pic:blipFill><a:blip r:embed="{rel}"/><a:stretch><a:fillRect/></a:stretch></pic:blipFill>"#,
                    r#"<pic:spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm>"#,
                    r#"<a:prstGeom prst="rect"><a:avLst/></a:prstGeom></pic:spPr>"#,
                    "</pic:pic></a:graphicData></a:graphic>",
                    "</wp:inline></w:drawing></w:r></w:p>"
                ),
                cx = cx,
                cy = cy,
                id = id,
                file = item.file_name(n),
                rel = relationship_id(n),
            );
        }

        let _ = write!(
            xml,
            concat!(
                r#"<w:sectPr><w:pgSz w:w="{w}" w:h="{h}"/>"#,
                r#"<w:pgMar w:top="{m}" w:right="{m}" w:bottom="{m}" w:left="{m}" "#,
                r#"w:header="708" w:footer="708" w:gutter="0"/></w:sectPr>"#,
                "</w:body></w:document>"
            ),
            w = PAGE_WIDTH_TWIPS,
            h = PAGE_HEIGHT_TWIPS,
            m = PAGE_MARGIN_TWIPS,
        );
        xml
    }
}

fn put_part(
    zip: &mut ZipWriter<Cursor<Vec<u8>>>,
    name: &str,
    options: SimpleFileOptions,
    bytes: &[u8],
) -> Result<(), AuditError> {
    zip.start_file(name, options)
        .map_err(|e| AuditError::Assembly(format!("zip entry '{name}': {e}")))?;
    zip.write_all(bytes)
        .map_err(|e| AuditError::Assembly(format!("zip write '{name}': {e}")))
}

/// Lay out and serialise in one step.
pub fn assemble(
    source_url: &str,
    chunks: Vec<ImageChunk>,
    source_width: u32,
    display_width: f64,
) -> Result<Vec<u8>, AuditError> {
    AuditDocument::new(source_url, chunks, source_width, display_width)?.to_docx()
}

// ── Media ────────────────────────────────────────────────────────────────

struct Media {
    extension: &'static str,
    bytes: Vec<u8>,
}

impl Media {
    fn file_name(&self, n: usize) -> String {
        format!("image{}.{}", n + 1, self.extension)
    }

    fn part_name(&self, n: usize) -> String {
        format!("word/media/{}", self.file_name(n))
    }
}

/// JPEG and PNG are embedded as-is; anything else is re-encoded as JPEG.
fn embeddable(chunk: &ImageChunk) -> Result<Media, AuditError> {
    match image::guess_format(&chunk.pixels) {
        Ok(ImageFormat::Jpeg) => Ok(Media {
            extension: "jpeg",
            bytes: chunk.pixels.clone(),
        }),
        Ok(ImageFormat::Png) => Ok(Media {
            extension: "png",
            bytes: chunk.pixels.clone(),
        }),
        _ => {
            let decoded = encode::decode(&chunk.pixels).map_err(|e| {
                AuditError::InvalidImage(format!("chunk {} is not an embeddable image: {e}", chunk.index))
            })?;
            let bytes = encode::encode_jpeg(&decoded, 90)
                .map_err(|e| AuditError::InvalidImage(format!("chunk {}: {e}", chunk.index)))?;
            Ok(Media {
                extension: "jpeg",
                bytes,
            })
        }
    }
}

fn relationship_id(n: usize) -> String {
    format!("rIdImage{}", n + 1)
}

fn to_emu(px: f64) -> u64 {
    (px * EMU_PER_PX).round().max(1.0) as u64
}

// ── Package parts ────────────────────────────────────────────────────────

const ROOT_RELS_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>"#,
    r#"<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/>"#,
    "</Relationships>"
);

fn content_types_xml() -> String {
    concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
        r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
        r#"<Default Extension="xml" ContentType="application/xml"/>"#,
        r#"<Default Extension="jpeg" ContentType="image/jpeg"/>"#,
        r#"<Default Extension="png" ContentType="image/png"/>"#,
        r#"<Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>"#,
        r#"<Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/>"#,
        "</Types>"
    )
    .to_string()
}

fn document_rels_xml(media: &[Media]) -> String {
    let mut xml = String::from(concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#
    ));
    for (n, item) in media.iter().enumerate() {
        let _ = write!(
            xml,
            r#"<Relationship Id="{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="media/{}"/>"#,
            relationship_id(n),
            item.file_name(n)
        );
    }
    xml.push_str("</Relationships>");
    xml
}
