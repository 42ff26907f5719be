//! In-process reference host.
//!
//! [`HeadlessHost`] implements the slice of the canvas, 2D and WebGL surface
//! the engine drives. GL state is tracked faithfully (bindings, parameters,
//! errors, object contents), and pixels are produced for clears, rectangle
//! fills and image copies. Path and geometry draws are only counted.
//!
//! ```text
//! HeadlessHost
//!  ├── Canvas ──► Context2D | GlContext
//!  ├── Image / Video / ImageData
//!  └── Gl objects (buffers, textures, ...) owned by their context
//! ```

mod canvas2d;
mod webgl;

pub use webgl::TextureLevel;

use canvas_inspector_shared::{
    HostObject, ObjectClass, ObjectId, StackTrace, TypedArray, TypedArrayKind, Value,
};
use hashbrown::HashMap;
use image::{Rgba, RgbaImage};

use crate::capture::encode_data_url;
use crate::host::{Host, HostError};

// ============================================================================
// Elements
// ============================================================================

pub(crate) struct CanvasElement {
    bitmap: RgbaImage,
    context: Option<HostObject>,
}

pub(crate) struct ImageElement {
    src: String,
    bitmap: RgbaImage,
}

pub(crate) struct ImageDataObject {
    width: u32,
    height: u32,
    data: TypedArray,
}

impl ImageDataObject {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: TypedArray::zeroed(TypedArrayKind::Uint8Clamped, (width * height * 4) as usize),
        }
    }

    fn to_image(&self) -> RgbaImage {
        let bytes = self.data.to_vec().into_iter().map(|v| v as u8).collect();
        RgbaImage::from_raw(self.width, self.height, bytes)
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }
}

pub(crate) enum Node {
    Canvas(CanvasElement),
    Image(ImageElement),
    /// Video element holding its current frame.
    Video(RgbaImage),
    ImageData(ImageDataObject),
    Context2D(canvas2d::Context2D),
    Gradient(canvas2d::Gradient),
    Pattern(RgbaImage),
    WebGL(Box<webgl::GlContext>),
    Gl(webgl::GlObject),
    ActiveInfo(webgl::ActiveInfo),
    ContextAttributes(webgl::ContextAttributes),
    Extension(String),
}

// ============================================================================
// Host
// ============================================================================

/// Reference [`Host`] with software canvases and a state-tracking WebGL.
pub struct HeadlessHost {
    next_id: ObjectId,
    nodes: HashMap<ObjectId, Node>,
    stack_trace: Option<StackTrace>,
}

impl Default for HeadlessHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessHost {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            nodes: HashMap::new(),
            stack_trace: None,
        }
    }

    fn alloc(&mut self, class: ObjectClass, node: Node) -> HostObject {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, node);
        HostObject::new(id, class)
    }

    fn node(&self, object: &HostObject) -> Result<&Node, HostError> {
        self.nodes
            .get(&object.id)
            .ok_or(HostError::UnknownObject(object.id))
    }

    fn canvas_mut(&mut self, id: ObjectId) -> Option<&mut CanvasElement> {
        match self.nodes.get_mut(&id) {
            Some(Node::Canvas(canvas)) => Some(canvas),
            _ => None,
        }
    }

    fn canvas(&self, id: ObjectId) -> Option<&CanvasElement> {
        match self.nodes.get(&id) {
            Some(Node::Canvas(canvas)) => Some(canvas),
            _ => None,
        }
    }

    /// Creates a canvas with a WebGL context and returns the context.
    pub fn create_webgl_context(&mut self, width: u32, height: u32) -> HostObject {
        let canvas = self.new_canvas(width, height);
        self.attach_webgl(canvas.id, webgl::ContextAttributes::default())
    }

    /// Creates a canvas with a 2D context and returns the context.
    pub fn create_canvas2d_context(&mut self, width: u32, height: u32) -> HostObject {
        let canvas = self.new_canvas(width, height);
        self.attach_2d(canvas.id)
    }

    /// A loaded image filled with one color.
    pub fn create_image(&mut self, src: &str, width: u32, height: u32, color: [u8; 4]) -> HostObject {
        let image = ImageElement {
            src: src.to_string(),
            bitmap: RgbaImage::from_pixel(width, height, Rgba(color)),
        };
        self.alloc(ObjectClass::Image, Node::Image(image))
    }

    /// A video element showing a single-color frame.
    pub fn create_video(&mut self, width: u32, height: u32, color: [u8; 4]) -> HostObject {
        let frame = RgbaImage::from_pixel(width, height, Rgba(color));
        self.alloc(ObjectClass::Video, Node::Video(frame))
    }

    pub fn create_image_data(&mut self, width: u32, height: u32) -> HostObject {
        self.alloc(ObjectClass::ImageData, Node::ImageData(ImageDataObject::new(width, height)))
    }

    /// Stack reported for every call until changed.
    pub fn set_stack_trace(&mut self, stack_trace: Option<StackTrace>) {
        self.stack_trace = stack_trace;
    }

    /// Pixel of a canvas, image or video, top-left origin.
    pub fn pixel(&self, object: &HostObject, x: u32, y: u32) -> Option<[u8; 4]> {
        let bitmap = match self.nodes.get(&object.id)? {
            Node::Canvas(canvas) => &canvas.bitmap,
            Node::Image(image) => &image.bitmap,
            Node::Video(frame) => frame,
            _ => return None,
        };
        bitmap.get_pixel_checked(x, y).map(|p| p.0)
    }

    /// Contents of a WebGL buffer.
    pub fn buffer_data(&self, buffer: &HostObject) -> Option<&[u8]> {
        match self.nodes.get(&buffer.id)? {
            Node::Gl(object) => object.buffer_data(),
            _ => None,
        }
    }

    /// One image of a WebGL texture.
    pub fn texture_level(&self, texture: &HostObject, target: u32, level: i32) -> Option<&TextureLevel> {
        match self.nodes.get(&texture.id)? {
            Node::Gl(object) => object.texture_level(target, level),
            _ => None,
        }
    }

    /// Draw calls executed by a 2D or WebGL context.
    pub fn draw_count(&self, context: &HostObject) -> Option<usize> {
        match self.nodes.get(&context.id)? {
            Node::Context2D(context) => Some(context.draw_count()),
            Node::WebGL(context) => Some(context.draw_count()),
            _ => None,
        }
    }

    fn new_canvas(&mut self, width: u32, height: u32) -> HostObject {
        let canvas = CanvasElement {
            bitmap: RgbaImage::new(width, height),
            context: None,
        };
        self.alloc(ObjectClass::Canvas, Node::Canvas(canvas))
    }

    fn attach_2d(&mut self, canvas: ObjectId) -> HostObject {
        let context = self.alloc(
            ObjectClass::CanvasRenderingContext2D,
            Node::Context2D(canvas2d::Context2D::new(canvas)),
        );
        if let Some(element) = self.canvas_mut(canvas) {
            element.context = Some(context);
        }
        context
    }

    fn attach_webgl(&mut self, canvas: ObjectId, attributes: webgl::ContextAttributes) -> HostObject {
        let (width, height) = self
            .canvas(canvas)
            .map_or((0, 0), |c| c.bitmap.dimensions());
        let context = self.alloc(
            ObjectClass::WebGLRenderingContext,
            Node::WebGL(Box::new(webgl::GlContext::new(canvas, width, height, attributes))),
        );
        if let Some(element) = self.canvas_mut(canvas) {
            element.context = Some(context);
        }
        context
    }

    /// Pixels of anything `drawImage` or `texImage2D` accepts.
    fn source_image(&self, source: &Value, method: &str) -> Result<RgbaImage, HostError> {
        let invalid = |reason: &str| HostError::InvalidArgument {
            method: method.to_string(),
            reason: reason.to_string(),
        };
        let object = source.as_object().ok_or_else(|| invalid("image source is not an object"))?;
        match self.node(&object)? {
            Node::Canvas(canvas) => Ok(canvas.bitmap.clone()),
            Node::Image(image) => Ok(image.bitmap.clone()),
            Node::Video(frame) => Ok(frame.clone()),
            Node::ImageData(data) => Ok(data.to_image()),
            _ => Err(invalid("unsupported image source")),
        }
    }

    fn invoke_canvas(
        &mut self,
        target: &HostObject,
        method: &str,
        args: &[Value],
    ) -> Result<Value, HostError> {
        match method {
            "getContext" => {
                let existing = self
                    .canvas(target.id)
                    .ok_or(HostError::UnknownObject(target.id))?
                    .context;
                let context_id = args.first().and_then(Value::as_str).unwrap_or_default();
                let wants = match context_id {
                    "2d" => ObjectClass::CanvasRenderingContext2D,
                    "webgl" | "experimental-webgl" => ObjectClass::WebGLRenderingContext,
                    _ => return Ok(Value::Null),
                };
                if let Some(context) = existing {
                    return Ok(if context.class == wants { context.into() } else { Value::Null });
                }
                let context = if wants == ObjectClass::CanvasRenderingContext2D {
                    self.attach_2d(target.id)
                } else {
                    let attributes = webgl::ContextAttributes::from_value(self, args.get(1));
                    self.attach_webgl(target.id, attributes)
                };
                Ok(context.into())
            }
            "toDataURL" => self.to_data_url(target).map(Value::from),
            _ => Err(HostError::UnknownMethod {
                class: target.class,
                method: method.to_string(),
            }),
        }
    }
}

fn unknown_property(target: &HostObject, name: &str) -> HostError {
    HostError::UnknownProperty {
        class: target.class,
        property: name.to_string(),
    }
}

impl Host for HeadlessHost {
    fn invoke(&mut self, target: &HostObject, method: &str, args: &[Value]) -> Result<Value, HostError> {
        match target.class {
            ObjectClass::Canvas => self.invoke_canvas(target, method, args),
            ObjectClass::CanvasRenderingContext2D => canvas2d::invoke(self, target, method, args),
            ObjectClass::CanvasGradient => canvas2d::invoke_gradient(self, target, method, args),
            ObjectClass::WebGLRenderingContext => webgl::invoke(self, target, method, args),
            _ => Err(HostError::UnknownMethod {
                class: target.class,
                method: method.to_string(),
            }),
        }
    }

    fn get_property(&self, target: &HostObject, name: &str) -> Result<Value, HostError> {
        let value = match (self.node(target)?, name) {
            (Node::Canvas(canvas), "width") => canvas.bitmap.width().into(),
            (Node::Canvas(canvas), "height") => canvas.bitmap.height().into(),
            (Node::Image(image), "src") => image.src.as_str().into(),
            (Node::Image(image), "width" | "naturalWidth") => image.bitmap.width().into(),
            (Node::Image(image), "height" | "naturalHeight") => image.bitmap.height().into(),
            (Node::Image(_), "complete") => true.into(),
            (Node::Video(frame), "width" | "videoWidth") => frame.width().into(),
            (Node::Video(frame), "height" | "videoHeight") => frame.height().into(),
            (Node::ImageData(data), "width") => data.width.into(),
            (Node::ImageData(data), "height") => data.height.into(),
            (Node::ImageData(data), "data") => Value::Typed(data.data.clone()),
            (Node::Context2D(context), name) => return context.get_property(target, name),
            (Node::WebGL(context), name) => return context.get_property(target, name),
            (Node::ActiveInfo(info), name) => return info.get_property(target, name),
            (Node::ContextAttributes(attributes), name) => {
                return attributes
                    .get(name)
                    .map(Value::Bool)
                    .ok_or_else(|| unknown_property(target, name));
            }
            (Node::Extension(extension), "name") => extension.as_str().into(),
            _ => return Err(unknown_property(target, name)),
        };
        Ok(value)
    }

    fn set_property(&mut self, target: &HostObject, name: &str, value: Value) -> Result<(), HostError> {
        let node = self
            .nodes
            .get_mut(&target.id)
            .ok_or(HostError::UnknownObject(target.id))?;
        match (node, name) {
            (Node::Canvas(canvas), "width" | "height") => {
                let size = value.as_u32().unwrap_or(0);
                let (width, height) = canvas.bitmap.dimensions();
                canvas.bitmap = if name == "width" {
                    RgbaImage::new(size, height)
                } else {
                    RgbaImage::new(width, size)
                };
                Ok(())
            }
            (Node::Image(image), "src") => {
                image.src = value.to_string();
                Ok(())
            }
            (Node::Context2D(context), name) => context.set_property(target, name, value),
            (Node::ContextAttributes(attributes), name) => {
                if attributes.set(name, value.is_truthy()) {
                    Ok(())
                } else {
                    Err(unknown_property(target, name))
                }
            }
            _ => Err(unknown_property(target, name)),
        }
    }

    fn create_canvas(&mut self, width: u32, height: u32) -> Result<HostObject, HostError> {
        Ok(self.new_canvas(width, height))
    }

    fn clone_node(&mut self, node: &HostObject) -> Result<HostObject, HostError> {
        let copy = match self.node(node)? {
            Node::Canvas(canvas) => {
                let (width, height) = canvas.bitmap.dimensions();
                return Ok(self.new_canvas(width, height));
            }
            Node::Image(image) => Node::Image(ImageElement {
                src: image.src.clone(),
                bitmap: image.bitmap.clone(),
            }),
            Node::Video(frame) => Node::Video(frame.clone()),
            _ => {
                return Err(HostError::InvalidArgument {
                    method: "cloneNode".to_string(),
                    reason: format!("{} is not a node", node.class.name()),
                });
            }
        };
        Ok(self.alloc(node.class, copy))
    }

    fn to_data_url(&mut self, canvas: &HostObject) -> Result<String, HostError> {
        let Some(element) = self.canvas(canvas.id) else {
            return Err(HostError::InvalidArgument {
                method: "toDataURL".to_string(),
                reason: "not a canvas".to_string(),
            });
        };
        let (width, height) = element.bitmap.dimensions();
        encode_data_url(element.bitmap.as_raw(), width, height)
    }

    fn capture_stack_trace(&mut self, limit: usize) -> Option<StackTrace> {
        self.stack_trace.as_ref().map(|stack| {
            StackTrace::new(stack.frames().iter().take(limit).cloned().collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_context_is_sticky_per_canvas() {
        let mut host = HeadlessHost::new();
        let canvas = host.create_canvas(2, 2).unwrap();
        let first = host.invoke(&canvas, "getContext", &["2d".into()]).unwrap();
        let second = host.invoke(&canvas, "getContext", &["2d".into()]).unwrap();
        assert_eq!(first, second);
        assert_eq!(host.invoke(&canvas, "getContext", &["webgl".into()]).unwrap(), Value::Null);
        assert_eq!(host.invoke(&canvas, "getContext", &["bitmaprenderer".into()]).unwrap(), Value::Null);
    }

    #[test]
    fn test_clone_node_gives_blank_canvas() {
        let mut host = HeadlessHost::new();
        let context = host.create_canvas2d_context(3, 2);
        let canvas = host.get_property(&context, "canvas").unwrap().as_object().unwrap();
        host.set_property(&context, "fillStyle", "#ff0000".into()).unwrap();
        host.invoke(&context, "fillRect", &[0.into(), 0.into(), 3.into(), 2.into()]).unwrap();
        assert_eq!(host.pixel(&canvas, 1, 1), Some([255, 0, 0, 255]));

        let copy = host.clone_node(&canvas).unwrap();
        assert_eq!(host.get_property(&copy, "width").unwrap(), Value::Number(3.0));
        assert_eq!(host.pixel(&copy, 1, 1), Some([0, 0, 0, 0]));
    }

    #[test]
    fn test_resizing_canvas_clears_it() {
        let mut host = HeadlessHost::new();
        let context = host.create_canvas2d_context(2, 2);
        let canvas = host.get_property(&context, "canvas").unwrap().as_object().unwrap();
        host.invoke(&context, "fillRect", &[0.into(), 0.into(), 2.into(), 2.into()]).unwrap();

        host.set_property(&canvas, "width", 4.into()).unwrap();
        assert_eq!(host.get_property(&canvas, "width").unwrap(), Value::Number(4.0));
        assert_eq!(host.pixel(&canvas, 0, 0), Some([0, 0, 0, 0]));
    }

    #[test]
    fn test_to_data_url_is_png() {
        let mut host = HeadlessHost::new();
        let canvas = host.create_canvas(1, 1).unwrap();
        let url = host.to_data_url(&canvas).unwrap();
        assert!(url.starts_with("data:image/png;base64,"));

        let image = host.create_image("a.png", 1, 1, [0; 4]);
        assert!(host.to_data_url(&image).is_err());
    }

    #[test]
    fn test_stack_trace_is_truncated() {
        use canvas_inspector_shared::CallFrame;

        let mut host = HeadlessHost::new();
        assert!(host.capture_stack_trace(5).is_none());
        host.set_stack_trace(Some(StackTrace::new(vec![
            CallFrame::new("app.js", 10, 2),
            CallFrame::new("lib.js", 3, 1),
        ])));
        let stack = host.capture_stack_trace(1).unwrap();
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.call_frame(0).unwrap().source_url, "app.js");
    }
}
