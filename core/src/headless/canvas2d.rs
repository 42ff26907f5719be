//! Software 2D context.

use std::collections::BTreeMap;

use canvas_inspector_shared::{HostObject, ObjectClass, ObjectId, Value};
use glam::{DAffine2, DVec2, dvec2};
use image::{Pixel, Rgba, RgbaImage};

use super::{HeadlessHost, ImageDataObject, Node, unknown_property};
use crate::host::HostError;

const COLOR_ATTRIBUTES: [&str; 3] = ["fillStyle", "strokeStyle", "shadowColor"];

fn default_attributes() -> BTreeMap<String, Value> {
    [
        ("strokeStyle", Value::from("#000000")),
        ("fillStyle", "#000000".into()),
        ("globalAlpha", 1.0.into()),
        ("lineWidth", 1.0.into()),
        ("lineCap", "butt".into()),
        ("lineJoin", "miter".into()),
        ("miterLimit", 10.0.into()),
        ("shadowOffsetX", 0.0.into()),
        ("shadowOffsetY", 0.0.into()),
        ("shadowBlur", 0.0.into()),
        ("shadowColor", "rgba(0, 0, 0, 0)".into()),
        ("globalCompositeOperation", "source-over".into()),
        ("font", "10px sans-serif".into()),
        ("textAlign", "start".into()),
        ("textBaseline", "alphabetic".into()),
        ("lineDashOffset", 0.0.into()),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect()
}

/// State pushed by `save` and popped by `restore`.
#[derive(Debug, Clone)]
struct DrawingState {
    attributes: BTreeMap<String, Value>,
    line_dash: Vec<f64>,
    transform: DAffine2,
}

impl Default for DrawingState {
    fn default() -> Self {
        Self {
            attributes: default_attributes(),
            line_dash: Vec::new(),
            transform: DAffine2::IDENTITY,
        }
    }
}

pub(crate) struct Context2D {
    canvas: ObjectId,
    state: DrawingState,
    stack: Vec<DrawingState>,
    path_len: usize,
    draws: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Gradient {
    stops: Vec<(f64, Rgba<u8>)>,
}

fn number(args: &[Value], index: usize) -> f64 {
    args.get(index).and_then(Value::as_number).unwrap_or(f64::NAN)
}

fn invalid(method: &str, reason: impl Into<String>) -> HostError {
    HostError::InvalidArgument {
        method: method.to_string(),
        reason: reason.into(),
    }
}

/// Axis-aligned rectangle in user space, normalized to positive extent.
#[derive(Debug, Clone, Copy)]
struct Rect {
    min: DVec2,
    max: DVec2,
}

impl Rect {
    fn new(x: f64, y: f64, width: f64, height: f64) -> Option<Self> {
        let (a, b) = (dvec2(x, y), dvec2(x + width, y + height));
        let rect = Self {
            min: a.min(b),
            max: a.max(b),
        };
        (rect.min.is_finite() && rect.max.is_finite()).then_some(rect)
    }

    fn from_args(args: &[Value], first: usize) -> Option<Self> {
        Self::new(
            number(args, first),
            number(args, first + 1),
            number(args, first + 2),
            number(args, first + 3),
        )
    }

    fn contains(&self, point: DVec2) -> bool {
        point.cmpge(self.min).all() && point.cmplt(self.max).all()
    }
}

/// Calls `paint` for every device pixel whose center the transformed
/// `rect` covers, with that center in user space.
fn for_each_covered(
    bitmap: &mut RgbaImage,
    transform: DAffine2,
    rect: Rect,
    mut paint: impl FnMut(&mut Rgba<u8>, DVec2),
) {
    let inverse = transform.inverse();
    if !inverse.is_finite() {
        return;
    }
    let corners = [
        rect.min,
        dvec2(rect.max.x, rect.min.y),
        rect.max,
        dvec2(rect.min.x, rect.max.y),
    ]
    .map(|corner| transform.transform_point2(corner));
    let low = corners.iter().fold(DVec2::INFINITY, |acc, c| acc.min(*c));
    let high = corners.iter().fold(DVec2::NEG_INFINITY, |acc, c| acc.max(*c));

    let (width, height) = bitmap.dimensions();
    let x0 = low.x.floor().clamp(0.0, width as f64) as u32;
    let y0 = low.y.floor().clamp(0.0, height as f64) as u32;
    let x1 = high.x.ceil().clamp(0.0, width as f64) as u32;
    let y1 = high.y.ceil().clamp(0.0, height as f64) as u32;
    for y in y0..y1 {
        for x in x0..x1 {
            let local = inverse.transform_point2(dvec2(x as f64 + 0.5, y as f64 + 0.5));
            if rect.contains(local) {
                paint(bitmap.get_pixel_mut(x, y), local);
            }
        }
    }
}

fn with_alpha(mut color: Rgba<u8>, alpha: f64) -> Rgba<u8> {
    color.0[3] = (color.0[3] as f64 * alpha).round().clamp(0.0, 255.0) as u8;
    color
}

impl Context2D {
    pub(crate) fn new(canvas: ObjectId) -> Self {
        Self {
            canvas,
            state: DrawingState::default(),
            stack: Vec::new(),
            path_len: 0,
            draws: 0,
        }
    }

    pub(crate) fn draw_count(&self) -> usize {
        self.draws
    }

    pub(crate) fn get_property(&self, target: &HostObject, name: &str) -> Result<Value, HostError> {
        if name == "canvas" {
            return Ok(HostObject::new(self.canvas, ObjectClass::Canvas).into());
        }
        self.state
            .attributes
            .get(name)
            .cloned()
            .ok_or_else(|| unknown_property(target, name))
    }

    /// Invalid values are ignored, as assignments to canvas attributes are.
    pub(crate) fn set_property(
        &mut self,
        target: &HostObject,
        name: &str,
        value: Value,
    ) -> Result<(), HostError> {
        let Some(slot) = self.state.attributes.get_mut(name) else {
            return Err(unknown_property(target, name));
        };
        if COLOR_ATTRIBUTES.contains(&name) {
            match &value {
                Value::String(text) => {
                    if let Some(color) = parse_color(text) {
                        *slot = serialize_color(color).into();
                    }
                }
                Value::Object(object)
                    if name != "shadowColor"
                        && matches!(object.class, ObjectClass::CanvasGradient | ObjectClass::CanvasPattern) =>
                {
                    *slot = value.clone();
                }
                _ => {}
            }
            return Ok(());
        }
        if let Value::Number(_) = slot {
            let Some(n) = value.as_number().filter(|n| n.is_finite()) else {
                return Ok(());
            };
            let valid = match name {
                "globalAlpha" => (0.0..=1.0).contains(&n),
                "lineWidth" | "miterLimit" => n > 0.0,
                "shadowBlur" => n >= 0.0,
                _ => true,
            };
            if valid {
                *slot = n.into();
            }
            return Ok(());
        }
        *slot = value.to_string().into();
        Ok(())
    }

    fn global_alpha(&self) -> f64 {
        self.state
            .attributes
            .get("globalAlpha")
            .and_then(Value::as_number)
            .unwrap_or(1.0)
    }

    fn multiply(&mut self, matrix: DAffine2) {
        let transform = self.state.transform * matrix;
        if transform.is_finite() {
            self.state.transform = transform;
        }
    }

    fn fill_color(&self, host: &HeadlessHost) -> Rgba<u8> {
        let style = self.state.attributes.get("fillStyle").cloned().unwrap_or_default();
        let color = match &style {
            Value::String(text) => parse_color(text),
            Value::Object(object) => match host.nodes.get(&object.id) {
                Some(Node::Gradient(gradient)) => gradient.stops.first().map(|(_, c)| *c),
                Some(Node::Pattern(image)) => image.get_pixel_checked(0, 0).copied(),
                _ => None,
            },
            _ => None,
        };
        with_alpha(color.unwrap_or(Rgba([0, 0, 0, 255])), self.global_alpha())
    }

    fn invoke(
        &mut self,
        host: &mut HeadlessHost,
        target: &HostObject,
        method: &str,
        args: &[Value],
    ) -> Result<Value, HostError> {
        let n = |i| number(args, i);
        match method {
            "save" => self.stack.push(self.state.clone()),
            "restore" => {
                if let Some(state) = self.stack.pop() {
                    self.state = state;
                }
            }
            "scale" => self.multiply(DAffine2::from_scale(dvec2(n(0), n(1)))),
            "rotate" => self.multiply(DAffine2::from_angle(n(0))),
            "translate" => self.multiply(DAffine2::from_translation(dvec2(n(0), n(1)))),
            "transform" => self.multiply(DAffine2::from_cols_array(&[n(0), n(1), n(2), n(3), n(4), n(5)])),
            "setTransform" => {
                let matrix = DAffine2::from_cols_array(&[n(0), n(1), n(2), n(3), n(4), n(5)]);
                if matrix.is_finite() {
                    self.state.transform = matrix;
                }
            }
            "resetTransform" => self.state.transform = DAffine2::IDENTITY,
            "beginPath" => self.path_len = 0,
            "moveTo" | "lineTo" | "closePath" | "quadraticCurveTo" | "bezierCurveTo" | "arcTo"
            | "arc" | "ellipse" | "rect" => self.path_len += 1,
            "clip" => {}
            "fill" | "stroke" => {
                if self.path_len > 0 {
                    self.draws += 1;
                }
            }
            "fillText" | "strokeText" | "strokeRect" => self.draws += 1,
            "fillRect" => {
                self.draws += 1;
                let color = self.fill_color(host);
                if let (Some(rect), Some(canvas)) = (Rect::from_args(args, 0), host.canvas_mut(self.canvas)) {
                    for_each_covered(&mut canvas.bitmap, self.state.transform, rect, |pixel, _| {
                        pixel.blend(&color);
                    });
                }
            }
            "clearRect" => {
                self.draws += 1;
                if let (Some(rect), Some(canvas)) = (Rect::from_args(args, 0), host.canvas_mut(self.canvas)) {
                    for_each_covered(&mut canvas.bitmap, self.state.transform, rect, |pixel, _| {
                        *pixel = Rgba([0, 0, 0, 0]);
                    });
                }
            }
            "drawImage" => {
                self.draws += 1;
                self.draw_image(host, args)?;
            }
            "putImageData" => {
                self.draws += 1;
                self.put_image_data(host, args)?;
            }
            "getImageData" => return self.get_image_data(host, args),
            "createImageData" => return create_image_data(host, args),
            "createLinearGradient" | "createRadialGradient" => {
                let gradient = host.alloc(ObjectClass::CanvasGradient, Node::Gradient(Gradient::default()));
                return Ok(gradient.into());
            }
            "createPattern" => {
                let image = host.source_image(&args.first().cloned().unwrap_or_default(), method)?;
                return Ok(host.alloc(ObjectClass::CanvasPattern, Node::Pattern(image)).into());
            }
            "setLineDash" => self.set_line_dash(args)?,
            "getLineDash" => {
                return Ok(Value::array(self.state.line_dash.iter().map(|d| Value::Number(*d))));
            }
            "isPointInPath" | "isPointInStroke" => return Ok(false.into()),
            _ => {
                return Err(HostError::UnknownMethod {
                    class: target.class,
                    method: method.to_string(),
                });
            }
        }
        Ok(Value::Undefined)
    }

    fn set_line_dash(&mut self, args: &[Value]) -> Result<(), HostError> {
        let Some(segments) = args.first().and_then(Value::numbers) else {
            return Err(invalid("setLineDash", "segments must be an array"));
        };
        if segments.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Ok(());
        }
        self.state.line_dash = if segments.len() % 2 == 1 {
            segments.repeat(2)
        } else {
            segments
        };
        Ok(())
    }

    fn draw_image(&mut self, host: &mut HeadlessHost, args: &[Value]) -> Result<(), HostError> {
        let source = host.source_image(&args.first().cloned().unwrap_or_default(), "drawImage")?;
        let (width, height) = (source.width() as f64, source.height() as f64);
        let n = |i| number(args, i);
        let (src, dst) = match args.len() {
            3 => (Rect::new(0.0, 0.0, width, height), Rect::new(n(1), n(2), width, height)),
            5 => (Rect::new(0.0, 0.0, width, height), Rect::new(n(1), n(2), n(3), n(4))),
            9 => (Rect::from_args(args, 1), Rect::from_args(args, 5)),
            count => return Err(invalid("drawImage", format!("expected 3, 5 or 9 arguments, got {count}"))),
        };
        let (Some(src), Some(dst)) = (src, dst) else {
            return Ok(());
        };
        let alpha = self.global_alpha();
        let Some(canvas) = host.canvas_mut(self.canvas) else {
            return Ok(());
        };
        let scale = (src.max - src.min) / (dst.max - dst.min);
        for_each_covered(&mut canvas.bitmap, self.state.transform, dst, |pixel, local| {
            let at = src.min + (local - dst.min) * scale;
            if at.x < 0.0 || at.y < 0.0 {
                return;
            }
            if let Some(color) = source.get_pixel_checked(at.x as u32, at.y as u32) {
                pixel.blend(&with_alpha(*color, alpha));
            }
        });
        Ok(())
    }

    fn put_image_data(&mut self, host: &mut HeadlessHost, args: &[Value]) -> Result<(), HostError> {
        let image = match args.first().and_then(Value::as_object).map(|o| host.nodes.get(&o.id)) {
            Some(Some(Node::ImageData(data))) => data.to_image(),
            _ => return Err(invalid("putImageData", "first argument is not an ImageData")),
        };
        let (dx, dy) = (number(args, 1), number(args, 2));
        if !dx.is_finite() || !dy.is_finite() {
            return Ok(());
        }
        let dirty = if args.len() >= 7 {
            Rect::from_args(args, 3)
        } else {
            Rect::new(0.0, 0.0, image.width() as f64, image.height() as f64)
        };
        let (Some(dirty), Some(canvas)) = (dirty, host.canvas_mut(self.canvas)) else {
            return Ok(());
        };
        for (x, y, color) in image.enumerate_pixels() {
            let at = dvec2(x as f64 + 0.5, y as f64 + 0.5);
            if !dirty.contains(at) {
                continue;
            }
            let (cx, cy) = (dx as i64 + x as i64, dy as i64 + y as i64);
            if cx < 0 || cy < 0 {
                continue;
            }
            if let Some(pixel) = canvas.bitmap.get_pixel_mut_checked(cx as u32, cy as u32) {
                *pixel = *color;
            }
        }
        Ok(())
    }

    fn get_image_data(&self, host: &mut HeadlessHost, args: &[Value]) -> Result<Value, HostError> {
        let Some(rect) = Rect::from_args(args, 0) else {
            return Err(invalid("getImageData", "non-finite rectangle"));
        };
        let size = rect.max - rect.min;
        if size.x < 1.0 || size.y < 1.0 {
            return Err(invalid("getImageData", "source width and height must be non-zero"));
        }
        let data = ImageDataObject::new(size.x as u32, size.y as u32);
        if let Some(canvas) = host.canvas(self.canvas) {
            let origin = (rect.min.x as i64, rect.min.y as i64);
            for y in 0..data.height {
                for x in 0..data.width {
                    let (cx, cy) = (origin.0 + x as i64, origin.1 + y as i64);
                    if cx < 0 || cy < 0 {
                        continue;
                    }
                    let Some(color) = canvas.bitmap.get_pixel_checked(cx as u32, cy as u32) else {
                        continue;
                    };
                    let base = ((y * data.width + x) * 4) as usize;
                    for (i, channel) in color.0.iter().enumerate() {
                        data.data.set(base + i, *channel as f64);
                    }
                }
            }
        }
        Ok(host.alloc(ObjectClass::ImageData, Node::ImageData(data)).into())
    }
}

fn create_image_data(host: &mut HeadlessHost, args: &[Value]) -> Result<Value, HostError> {
    let (width, height) = match args.first() {
        Some(Value::Object(object)) => match host.nodes.get(&object.id) {
            Some(Node::ImageData(data)) => (data.width, data.height),
            _ => return Err(invalid("createImageData", "argument is not an ImageData")),
        },
        _ => {
            let (width, height) = (number(args, 0).abs(), number(args, 1).abs());
            if width.is_finite() && height.is_finite() {
                (width as u32, height as u32)
            } else {
                (0, 0)
            }
        }
    };
    if width == 0 || height == 0 {
        return Err(invalid("createImageData", "width and height must be non-zero"));
    }
    let data = ImageDataObject::new(width, height);
    Ok(host.alloc(ObjectClass::ImageData, Node::ImageData(data)).into())
}

pub(super) fn invoke(
    host: &mut HeadlessHost,
    target: &HostObject,
    method: &str,
    args: &[Value],
) -> Result<Value, HostError> {
    let mut context = match host.nodes.remove(&target.id) {
        Some(Node::Context2D(context)) => context,
        other => {
            if let Some(node) = other {
                host.nodes.insert(target.id, node);
            }
            return Err(HostError::UnknownObject(target.id));
        }
    };
    let result = context.invoke(host, target, method, args);
    host.nodes.insert(target.id, Node::Context2D(context));
    result
}

pub(super) fn invoke_gradient(
    host: &mut HeadlessHost,
    target: &HostObject,
    method: &str,
    args: &[Value],
) -> Result<Value, HostError> {
    let Some(Node::Gradient(gradient)) = host.nodes.get_mut(&target.id) else {
        return Err(HostError::UnknownObject(target.id));
    };
    if method != "addColorStop" {
        return Err(HostError::UnknownMethod {
            class: target.class,
            method: method.to_string(),
        });
    }
    let offset = number(args, 0);
    if !(0.0..=1.0).contains(&offset) {
        return Err(invalid(method, "offset is outside [0, 1]"));
    }
    let color = args
        .get(1)
        .and_then(Value::as_str)
        .and_then(parse_color)
        .ok_or_else(|| invalid(method, "unparseable color"))?;
    let at = gradient.stops.partition_point(|(o, _)| *o <= offset);
    gradient.stops.insert(at, (offset, color));
    Ok(Value::Undefined)
}

// ============================================================================
// Colors
// ============================================================================

/// Parses the CSS color forms canvases accept most often: hex, `rgb()`,
/// `rgba()` and a handful of names.
pub(super) fn parse_color(text: &str) -> Option<Rgba<u8>> {
    let text = text.trim().to_ascii_lowercase();
    if let Some(hex) = text.strip_prefix('#') {
        let digits: Vec<u8> = hex
            .chars()
            .map(|c| c.to_digit(16).map(|d| d as u8))
            .collect::<Option<_>>()?;
        return match digits[..] {
            [r, g, b] => Some(Rgba([r * 17, g * 17, b * 17, 255])),
            [r1, r2, g1, g2, b1, b2] => Some(Rgba([r1 * 16 + r2, g1 * 16 + g2, b1 * 16 + b2, 255])),
            [r1, r2, g1, g2, b1, b2, a1, a2] => Some(Rgba([
                r1 * 16 + r2,
                g1 * 16 + g2,
                b1 * 16 + b2,
                a1 * 16 + a2,
            ])),
            _ => None,
        };
    }
    let functional = text
        .strip_prefix("rgba(")
        .or_else(|| text.strip_prefix("rgb("))
        .and_then(|body| body.strip_suffix(')'));
    if let Some(body) = functional {
        let parts: Vec<f64> = body
            .split(',')
            .map(|part| part.trim().parse::<f64>().ok())
            .collect::<Option<_>>()?;
        let channel = |v: f64| v.clamp(0.0, 255.0).round() as u8;
        return match parts[..] {
            [r, g, b] => Some(Rgba([channel(r), channel(g), channel(b), 255])),
            [r, g, b, a] => Some(Rgba([
                channel(r),
                channel(g),
                channel(b),
                (a.clamp(0.0, 1.0) * 255.0).round() as u8,
            ])),
            _ => None,
        };
    }
    let named = match text.as_str() {
        "black" => [0, 0, 0, 255],
        "white" => [255, 255, 255, 255],
        "red" => [255, 0, 0, 255],
        "green" => [0, 128, 0, 255],
        "lime" => [0, 255, 0, 255],
        "blue" => [0, 0, 255, 255],
        "yellow" => [255, 255, 0, 255],
        "transparent" => [0, 0, 0, 0],
        _ => return None,
    };
    Some(Rgba(named))
}

/// Serializes a color the way canvas attributes read back.
fn serialize_color(color: Rgba<u8>) -> String {
    let [r, g, b, a] = color.0;
    if a == 255 {
        format!("#{r:02x}{g:02x}{b:02x}")
    } else {
        let alpha = (a as f64 / 255.0 * 1000.0).round() / 1000.0;
        format!("rgba({r}, {g}, {b}, {})", Value::Number(alpha))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Host;

    fn context(width: u32, height: u32) -> (HeadlessHost, HostObject, HostObject) {
        let mut host = HeadlessHost::new();
        let context = host.create_canvas2d_context(width, height);
        let canvas = host.get_property(&context, "canvas").unwrap().as_object().unwrap();
        (host, context, canvas)
    }

    #[test]
    fn test_parse_color_forms() {
        assert_eq!(parse_color("#f00"), Some(Rgba([255, 0, 0, 255])));
        assert_eq!(parse_color("#00FF0080"), Some(Rgba([0, 255, 0, 128])));
        assert_eq!(parse_color("rgb(1, 2, 3)"), Some(Rgba([1, 2, 3, 255])));
        assert_eq!(parse_color("rgba(0, 0, 0, 0.5)"), Some(Rgba([0, 0, 0, 128])));
        assert_eq!(parse_color("Blue"), Some(Rgba([0, 0, 255, 255])));
        assert_eq!(parse_color("#12"), None);
        assert_eq!(parse_color("hsl(0, 0%, 0%)"), None);
    }

    #[test]
    fn test_color_attributes_normalize_and_ignore_garbage() {
        let (mut host, context, _) = context(1, 1);
        host.set_property(&context, "fillStyle", "red".into()).unwrap();
        assert_eq!(host.get_property(&context, "fillStyle").unwrap(), Value::from("#ff0000"));

        host.set_property(&context, "fillStyle", "not a color".into()).unwrap();
        assert_eq!(host.get_property(&context, "fillStyle").unwrap(), Value::from("#ff0000"));

        host.set_property(&context, "globalAlpha", 2.0.into()).unwrap();
        assert_eq!(host.get_property(&context, "globalAlpha").unwrap(), Value::Number(1.0));

        let err = host.set_property(&context, "webkitLineDash", Value::Null).unwrap_err();
        assert!(matches!(err, HostError::UnknownProperty { .. }));
    }

    #[test]
    fn test_save_restore_round_trips_state() {
        let (mut host, context, _) = context(1, 1);
        host.invoke(&context, "save", &[]).unwrap();
        host.set_property(&context, "lineWidth", 5.into()).unwrap();
        host.invoke(&context, "setLineDash", &[Value::array([1.into(), 2.into(), 3.into()])]).unwrap();
        assert_eq!(
            host.invoke(&context, "getLineDash", &[]).unwrap().numbers(),
            Some(vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0])
        );

        host.invoke(&context, "restore", &[]).unwrap();
        assert_eq!(host.get_property(&context, "lineWidth").unwrap(), Value::Number(1.0));
        assert_eq!(host.invoke(&context, "getLineDash", &[]).unwrap().numbers(), Some(vec![]));
    }

    #[test]
    fn test_fill_rect_honours_transform() {
        let (mut host, context, canvas) = context(4, 4);
        host.set_property(&context, "fillStyle", "#0000ff".into()).unwrap();
        host.invoke(&context, "translate", &[2.into(), 0.into()]).unwrap();
        host.invoke(&context, "fillRect", &[0.into(), 0.into(), 1.into(), 4.into()]).unwrap();

        assert_eq!(host.pixel(&canvas, 2, 3), Some([0, 0, 255, 255]));
        assert_eq!(host.pixel(&canvas, 0, 0), Some([0, 0, 0, 0]));
        assert_eq!(host.pixel(&canvas, 3, 0), Some([0, 0, 0, 0]));
        assert_eq!(host.draw_count(&context), Some(1));
    }

    #[test]
    fn test_draw_image_scales_source() {
        let (mut host, context, canvas) = context(4, 4);
        let image = host.create_image("tile.png", 1, 1, [10, 20, 30, 255]);
        host.invoke(&context, "drawImage", &[image.into(), 0.into(), 0.into(), 2.into(), 2.into()])
            .unwrap();

        assert_eq!(host.pixel(&canvas, 1, 1), Some([10, 20, 30, 255]));
        assert_eq!(host.pixel(&canvas, 2, 2), Some([0, 0, 0, 0]));
        let err = host.invoke(&context, "drawImage", &[image.into(), 0.into()]).unwrap_err();
        assert!(matches!(err, HostError::InvalidArgument { .. }));
    }

    #[test]
    fn test_image_data_round_trip_through_canvas() {
        let (mut host, context, canvas) = context(2, 2);
        let data = host.invoke(&context, "createImageData", &[2.into(), 1.into()]).unwrap();
        let Value::Typed(pixels) = host.get_property(&data.as_object().unwrap(), "data").unwrap() else {
            panic!("ImageData exposes typed pixels");
        };
        for (i, channel) in [9.0, 8.0, 7.0, 255.0].into_iter().enumerate() {
            pixels.set(i, channel);
        }

        host.invoke(&context, "putImageData", &[data, 0.into(), 1.into()]).unwrap();
        assert_eq!(host.pixel(&canvas, 0, 1), Some([9, 8, 7, 255]));

        let read = host
            .invoke(&context, "getImageData", &[0.into(), 1.into(), 1.into(), 1.into()])
            .unwrap();
        let Value::Typed(read) = host.get_property(&read.as_object().unwrap(), "data").unwrap() else {
            panic!("ImageData exposes typed pixels");
        };
        assert_eq!(read.to_vec(), vec![9.0, 8.0, 7.0, 255.0]);
    }

    #[test]
    fn test_gradient_fill_uses_first_stop() {
        let (mut host, context, canvas) = context(1, 1);
        let gradient = host
            .invoke(&context, "createLinearGradient", &[0.into(), 0.into(), 1.into(), 0.into()])
            .unwrap();
        let object = gradient.as_object().unwrap();
        host.invoke(&object, "addColorStop", &[1.into(), "blue".into()]).unwrap();
        host.invoke(&object, "addColorStop", &[0.into(), "lime".into()]).unwrap();
        assert!(host.invoke(&object, "addColorStop", &[2.into(), "red".into()]).is_err());

        host.set_property(&context, "fillStyle", gradient.clone()).unwrap();
        assert_eq!(host.get_property(&context, "fillStyle").unwrap(), gradient);
        host.invoke(&context, "fillRect", &[0.into(), 0.into(), 1.into(), 1.into()]).unwrap();
        assert_eq!(host.pixel(&canvas, 0, 0), Some([0, 255, 0, 255]));
    }
}
