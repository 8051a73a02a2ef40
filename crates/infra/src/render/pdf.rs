//! PDF template engine built on `lopdf`.

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat, dictionary};

use super::metrics;
use super::{RenderError, RenderOptions, TemplateEngine, TemplateError, TemplateKind};

/// Resource name of the overlay font on the rendered page.
const FONT_KEY: &[u8] = b"FCertdrop";

/// Page attributes that a page may inherit from its ancestors.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Bound on page-tree depth when walking `Parent` links.
const MAX_TREE_DEPTH: usize = 32;

/// A decoded single-page template.
#[derive(Debug, Clone)]
pub struct PdfTemplate {
    document: Document,
    page_id: ObjectId,
    origin: (f32, f32),
    size: (f32, f32),
}

impl PdfTemplate {
    fn from_document(document: Document) -> Result<Self, TemplateError> {
        let page_id = *document
            .get_pages()
            .values()
            .next()
            .ok_or(TemplateError::NoPages)?;

        let media_box = inherited(&document, page_id, b"MediaBox")
            .ok_or_else(|| TemplateError::Malformed("page has no MediaBox".into()))?;
        let [llx, lly, urx, ury] = rect(&document, media_box)
            .ok_or_else(|| TemplateError::Malformed("MediaBox is not a rectangle".into()))?;

        Ok(Self {
            document,
            page_id,
            origin: (llx.min(urx), lly.min(ury)),
            size: ((urx - llx).abs(), (ury - lly).abs()),
        })
    }

    pub fn width(&self) -> f32 {
        self.size.0
    }

    pub fn height(&self) -> f32 {
        self.size.1
    }

    /// Position that centers a text box of the given size on the page.
    fn centered(&self, text_width: f32, text_height: f32) -> (f32, f32) {
        (
            self.origin.0 + self.size.0 / 2.0 - text_width / 2.0,
            self.origin.1 + self.size.1 / 2.0 - text_height / 2.0,
        )
    }
}

/// Renders names onto PDF or image templates in Helvetica.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfTemplateEngine;

impl PdfTemplateEngine {
    pub fn new() -> Self {
        Self
    }
}

impl TemplateEngine for PdfTemplateEngine {
    type Template = PdfTemplate;

    fn decode(&self, bytes: &[u8], kind: TemplateKind) -> Result<PdfTemplate, TemplateError> {
        let document = match kind {
            TemplateKind::Document => keep_first_page(Document::load_mem(bytes)?)?,
            TemplateKind::Image => image_document(bytes)?,
        };
        PdfTemplate::from_document(document)
    }

    fn render(
        &self,
        template: &PdfTemplate,
        display_name: &str,
        options: &RenderOptions,
    ) -> Result<Vec<u8>, RenderError> {
        let encoded = metrics::encode_win_ansi(display_name).map_err(RenderError::Unencodable)?;
        let size = options.effective_font_size();
        let (auto_x, auto_y) = template.centered(
            metrics::text_width(&encoded, size),
            metrics::text_height(size),
        );
        let x = options.x.unwrap_or(auto_x);
        let y = options.y.unwrap_or(auto_y);

        let mut doc = template.document.clone();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });

        // The page's own content runs inside q/Q so its graphics state cannot
        // leak into the overlay.
        let overlay = Content {
            operations: vec![
                Operation::new("Q", vec![]),
                Operation::new("q", vec![]),
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec![Object::Name(FONT_KEY.to_vec()), Object::Real(size)]),
                Operation::new(
                    "rg",
                    vec![Object::Integer(0), Object::Integer(0), Object::Integer(0)],
                ),
                Operation::new("Td", vec![Object::Real(x), Object::Real(y)]),
                Operation::new("Tj", vec![Object::String(encoded, StringFormat::Literal)]),
                Operation::new("ET", vec![]),
                Operation::new("Q", vec![]),
            ],
        };
        let mut overlay_bytes = b"\n".to_vec();
        overlay_bytes.extend(overlay.encode()?);
        let open_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
        let overlay_id = doc.add_object(Stream::new(Dictionary::new(), overlay_bytes));

        attach_overlay(&mut doc, template.page_id, open_id, overlay_id, font_id)?;

        let mut out = Vec::new();
        doc.save_to(&mut out).map_err(lopdf::Error::from)?;
        Ok(out)
    }
}

/// Drop every page but the first, moving inherited attributes onto it.
fn keep_first_page(mut doc: Document) -> Result<Document, TemplateError> {
    let page_id = *doc.get_pages().get(&1).ok_or(TemplateError::NoPages)?;
    let root_pages = doc
        .get_dictionary(doc.trailer.get(b"Root")?.as_reference()?)?
        .get(b"Pages")?
        .as_reference()?;

    let carried: Vec<(&[u8], Object)> = INHERITABLE
        .iter()
        .filter_map(|key| inherited(&doc, page_id, key).map(|v| (*key, resolve(&doc, v).clone())))
        .collect();

    let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
    for (key, value) in carried {
        page.set(key, value);
    }
    page.set("Parent", Object::Reference(root_pages));

    let pages = doc.get_object_mut(root_pages)?.as_dict_mut()?;
    pages.set("Kids", vec![Object::Reference(page_id)]);
    pages.set("Count", Object::Integer(1));

    doc.prune_objects();
    Ok(doc)
}

/// Single-page document showing the image at its pixel size.
fn image_document(bytes: &[u8]) -> Result<Document, TemplateError> {
    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return Err(TemplateError::Malformed("image has no pixels".into()));
    }
    let (w, h) = (i64::from(width), i64::from(height));

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut image_stream = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => w,
            "Height" => h,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => Object::Integer(8),
        },
        rgb.into_raw(),
    );
    image_stream.compress()?;
    let image_id = doc.add_object(image_stream);

    let draw = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Integer(w),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(h),
                    Object::Integer(0),
                    Object::Integer(0),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(Dictionary::new(), draw.encode()?));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(w),
            Object::Integer(h),
        ],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => Object::Integer(1),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    Ok(doc)
}

/// Wire the overlay streams and font into the page.
fn attach_overlay(
    doc: &mut Document,
    page_id: ObjectId,
    open_id: ObjectId,
    overlay_id: ObjectId,
    font_id: ObjectId,
) -> Result<(), RenderError> {
    let (resources, contents) = {
        let view: &Document = doc;

        let mut resources = match inherited(view, page_id, b"Resources").map(|o| resolve(view, o)) {
            Some(Object::Dictionary(dict)) => dict.clone(),
            _ => Dictionary::new(),
        };
        let mut fonts = match resources.get(b"Font").ok().map(|o| resolve(view, o)) {
            Some(Object::Dictionary(dict)) => dict.clone(),
            _ => Dictionary::new(),
        };
        fonts.set(FONT_KEY, Object::Reference(font_id));
        resources.set("Font", Object::Dictionary(fonts));

        let mut contents = vec![Object::Reference(open_id)];
        match view.get_dictionary(page_id)?.get(b"Contents").ok() {
            Some(Object::Array(items)) => contents.extend(items.iter().cloned()),
            Some(Object::Reference(id)) => match view.get_object(*id) {
                Ok(Object::Array(items)) => contents.extend(items.iter().cloned()),
                _ => contents.push(Object::Reference(*id)),
            },
            Some(_) => {
                return Err(RenderError::Malformed(
                    "page contents are neither stream nor array".into(),
                ));
            }
            None => {}
        }
        contents.push(Object::Reference(overlay_id));
        (resources, contents)
    };

    let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
    page.set("Contents", Object::Array(contents));
    page.set("Resources", Object::Dictionary(resources));
    Ok(())
}

fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = current.get(key) {
            return Some(value);
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(object),
        other => other,
    }
}

fn rect(doc: &Document, object: &Object) -> Option<[f32; 4]> {
    let items = resolve(doc, object).as_array().ok()?;
    if items.len() != 4 {
        return None;
    }
    let mut out = [0.0; 4];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = number(resolve(doc, item))?;
    }
    Some(out)
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}
