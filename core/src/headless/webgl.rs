//! State-tracking WebGL context.
//!
//! Nothing is rasterized except clears. Draw calls validate their inputs and
//! are counted. Everything readable through `getParameter` and the object
//! getters reflects the calls made so far, and invalid calls raise the GL
//! error a conforming implementation would.

use std::collections::{BTreeMap, BTreeSet};

use canvas_inspector_shared::constants::{self as gl, gl_constant, is_constant_name};
use canvas_inspector_shared::{HostObject, ObjectClass, ObjectId, TypedArray, TypedArrayKind, Value};
use image::RgbaImage;

use super::{HeadlessHost, Node, unknown_property};
use crate::host::HostError;

const MAX_VERTEX_ATTRIBS: usize = 8;
const MAX_TEXTURE_UNITS: usize = 8;
const MAX_TEXTURE_SIZE: u32 = 4096;

const SUPPORTED_EXTENSIONS: [&str; 3] = [
    "OES_element_index_uint",
    "OES_standard_derivatives",
    "OES_texture_float",
];

const CAPABILITIES: [u32; 9] = [
    gl::BLEND,
    gl::CULL_FACE,
    gl::DEPTH_TEST,
    gl::DITHER,
    gl::POLYGON_OFFSET_FILL,
    gl::SAMPLE_ALPHA_TO_COVERAGE,
    gl::SAMPLE_COVERAGE,
    gl::SCISSOR_TEST,
    gl::STENCIL_TEST,
];

const STENCIL_OPS: [u32; 8] = [
    gl::KEEP,
    gl::ZERO,
    gl::REPLACE,
    gl::INCR,
    gl::DECR,
    gl::INVERT,
    gl::INCR_WRAP,
    gl::DECR_WRAP,
];

const ATTACHMENT_POINTS: [u32; 4] = [
    gl::COLOR_ATTACHMENT0,
    gl::DEPTH_ATTACHMENT,
    gl::STENCIL_ATTACHMENT,
    gl::DEPTH_STENCIL_ATTACHMENT,
];

// ============================================================================
// Auxiliary objects
// ============================================================================

/// Creation attributes of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ContextAttributes {
    alpha: bool,
    depth: bool,
    stencil: bool,
    antialias: bool,
    premultiplied_alpha: bool,
    preserve_drawing_buffer: bool,
}

impl Default for ContextAttributes {
    fn default() -> Self {
        Self {
            alpha: true,
            depth: true,
            stencil: false,
            antialias: true,
            premultiplied_alpha: true,
            preserve_drawing_buffer: false,
        }
    }
}

impl ContextAttributes {
    fn slot(&mut self, name: &str) -> Option<&mut bool> {
        match name {
            "alpha" => Some(&mut self.alpha),
            "depth" => Some(&mut self.depth),
            "stencil" => Some(&mut self.stencil),
            "antialias" => Some(&mut self.antialias),
            "premultipliedAlpha" => Some(&mut self.premultiplied_alpha),
            "preserveDrawingBuffer" => Some(&mut self.preserve_drawing_buffer),
            _ => None,
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<bool> {
        let mut copy = *self;
        copy.slot(name).map(|flag| *flag)
    }

    /// Returns whether `name` is an attribute.
    pub(crate) fn set(&mut self, name: &str, value: bool) -> bool {
        self.slot(name).map(|flag| *flag = value).is_some()
    }

    /// Attributes passed to `getContext`, defaults when absent.
    pub(crate) fn from_value(host: &HeadlessHost, value: Option<&Value>) -> Self {
        match value.and_then(Value::as_object).and_then(|o| host.nodes.get(&o.id)) {
            Some(Node::ContextAttributes(attributes)) => *attributes,
            _ => Self::default(),
        }
    }
}

/// Result of `getActiveUniform`.
#[derive(Debug, Clone)]
pub(crate) struct ActiveInfo {
    name: String,
    ty: u32,
    size: u32,
}

impl ActiveInfo {
    pub(crate) fn get_property(&self, target: &HostObject, name: &str) -> Result<Value, HostError> {
        match name {
            "name" => Ok(self.name.as_str().into()),
            "type" => Ok(self.ty.into()),
            "size" => Ok(self.size.into()),
            _ => Err(unknown_property(target, name)),
        }
    }
}

// ============================================================================
// GL objects
// ============================================================================

/// One image of a texture. Rows are stored in upload order, so row 0 is
/// the bottom row in GL coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureLevel {
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub ty: u32,
    pub data: Vec<u8>,
}

impl TextureLevel {
    /// Byte offset of an RGBA8 texel.
    fn rgba_offset(&self, x: i64, y: i64) -> Option<usize> {
        let in_bounds = x >= 0 && y >= 0 && x < self.width as i64 && y < self.height as i64;
        (in_bounds && self.format == gl::RGBA && self.ty == gl::UNSIGNED_BYTE)
            .then(|| ((y * self.width as i64 + x) * 4) as usize)
    }
}

#[derive(Debug, Default)]
struct Texture {
    target: Option<u32>,
    levels: BTreeMap<(u32, i32), TextureLevel>,
    parameters: BTreeMap<u32, u32>,
    mipmapped: bool,
}

#[derive(Debug)]
struct Buffer {
    data: Vec<u8>,
    usage: u32,
}

#[derive(Debug, Clone, Copy)]
struct Attachment {
    object: HostObject,
    face: u32,
    level: i32,
}

#[derive(Debug, Default)]
struct Renderbuffer {
    format: u32,
    width: u32,
    height: u32,
}

#[derive(Debug)]
struct Shader {
    ty: u32,
    source: String,
    compiled: bool,
}

#[derive(Debug, Clone)]
struct Uniform {
    name: String,
    ty: u32,
    size: u32,
    value: Vec<f64>,
}

#[derive(Debug, Default)]
struct Program {
    shaders: Vec<HostObject>,
    linked: bool,
    uniforms: Vec<Uniform>,
    attributes: BTreeMap<String, u32>,
    attribute_bindings: BTreeMap<String, u32>,
}

#[derive(Debug)]
enum GlObjectKind {
    Buffer(Buffer),
    Texture(Texture),
    Framebuffer(BTreeMap<u32, Attachment>),
    Renderbuffer(Renderbuffer),
    Shader(Shader),
    Program(Program),
    UniformLocation { program: ObjectId, index: usize },
}

/// A GL object handle and the state behind it.
#[derive(Debug)]
pub(crate) struct GlObject {
    context: ObjectId,
    deleted: bool,
    kind: GlObjectKind,
}

impl GlObject {
    pub(crate) fn buffer_data(&self) -> Option<&[u8]> {
        match &self.kind {
            GlObjectKind::Buffer(buffer) => Some(&buffer.data),
            _ => None,
        }
    }

    pub(crate) fn texture_level(&self, target: u32, level: i32) -> Option<&TextureLevel> {
        match &self.kind {
            GlObjectKind::Texture(texture) => texture.levels.get(&(target, level)),
            _ => None,
        }
    }
}

impl HeadlessHost {
    fn gl_object(&self, id: ObjectId) -> Option<&GlObject> {
        match self.nodes.get(&id) {
            Some(Node::Gl(object)) => Some(object),
            _ => None,
        }
    }

    fn gl_object_mut(&mut self, id: ObjectId) -> Option<&mut GlObject> {
        match self.nodes.get_mut(&id) {
            Some(Node::Gl(object)) => Some(object),
            _ => None,
        }
    }

    fn texture_mut(&mut self, id: ObjectId) -> Option<&mut Texture> {
        match self.gl_object_mut(id).map(|o| &mut o.kind) {
            Some(GlObjectKind::Texture(texture)) => Some(texture),
            _ => None,
        }
    }

    fn program(&self, id: ObjectId) -> Option<&Program> {
        match self.gl_object(id).map(|o| &o.kind) {
            Some(GlObjectKind::Program(program)) => Some(program),
            _ => None,
        }
    }

    fn program_mut(&mut self, id: ObjectId) -> Option<&mut Program> {
        match self.gl_object_mut(id).map(|o| &mut o.kind) {
            Some(GlObjectKind::Program(program)) => Some(program),
            _ => None,
        }
    }

    fn shader_mut(&mut self, id: ObjectId) -> Option<&mut Shader> {
        match self.gl_object_mut(id).map(|o| &mut o.kind) {
            Some(GlObjectKind::Shader(shader)) => Some(shader),
            _ => None,
        }
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

/// Why a call did not complete: a GL error to record, or a host failure
/// (a script-level exception) to report.
enum Failure {
    Gl(u32),
    Host(HostError),
}

impl From<HostError> for Failure {
    fn from(e: HostError) -> Self {
        Failure::Host(e)
    }
}

type GlResult<T> = Result<T, Failure>;

fn number(args: &[Value], index: usize) -> f64 {
    args.get(index).and_then(Value::as_number).unwrap_or(f64::NAN)
}

fn uint(args: &[Value], index: usize) -> u32 {
    args.get(index).and_then(Value::as_u32).unwrap_or(0)
}

fn int(args: &[Value], index: usize) -> i64 {
    let n = number(args, index);
    if n.is_finite() { n as i64 } else { 0 }
}

fn flag(args: &[Value], index: usize) -> bool {
    args.get(index).is_some_and(Value::is_truthy)
}

fn type_error(method: &str, reason: &str) -> Failure {
    Failure::Host(HostError::InvalidArgument {
        method: method.to_string(),
        reason: reason.to_string(),
    })
}

fn ensure(condition: bool, error: u32) -> GlResult<()> {
    if condition { Ok(()) } else { Err(Failure::Gl(error)) }
}

/// Dimensions and byte length of a `width` by `height` region. Sizes past
/// `MAX_TEXTURE_SIZE` raise `INVALID_VALUE`.
fn region_size(width: i64, height: i64, bytes_per_pixel: u32) -> GlResult<(u32, u32, usize)> {
    let limit = 0..=i64::from(MAX_TEXTURE_SIZE);
    ensure(limit.contains(&width) && limit.contains(&height), gl::INVALID_VALUE)?;
    let (width, height) = (width as u32, height as u32);
    let size = (width as usize)
        .checked_mul(height as usize)
        .and_then(|texels| texels.checked_mul(bytes_per_pixel as usize))
        .ok_or(Failure::Gl(gl::INVALID_VALUE))?;
    Ok((width, height, size))
}

fn clamp01(n: f64) -> f64 {
    if n.is_nan() { 0.0 } else { n.clamp(0.0, 1.0) }
}

fn floats(values: impl IntoIterator<Item = f64>) -> Value {
    Value::typed(TypedArrayKind::Float32, values)
}

fn ints(values: impl IntoIterator<Item = f64>) -> Value {
    Value::typed(TypedArrayKind::Int32, values)
}

/// A copy the caller cannot use to mutate context state.
fn fresh(value: &Value) -> Value {
    match value {
        Value::Typed(array) => Value::Typed(array.copy()),
        Value::Array(items) => Value::array(items.borrow().iter().cloned()),
        other => other.clone(),
    }
}

/// Native-endian bytes of a typed array.
fn typed_bytes(array: &TypedArray) -> Vec<u8> {
    fn cast<T: bytemuck::Pod>(values: impl Iterator<Item = T>) -> Vec<u8> {
        let items: Vec<T> = values.collect();
        bytemuck::cast_slice(&items).to_vec()
    }
    let values = array.to_vec();
    let values = values.iter().copied();
    match array.kind() {
        TypedArrayKind::Int8 => cast(values.map(|v| v as i8)),
        TypedArrayKind::Uint8 | TypedArrayKind::Uint8Clamped => values.map(|v| v as u8).collect(),
        TypedArrayKind::Int16 => cast(values.map(|v| v as i16)),
        TypedArrayKind::Uint16 => cast(values.map(|v| v as u16)),
        TypedArrayKind::Int32 => cast(values.map(|v| v as i32)),
        TypedArrayKind::Uint32 => cast(values.map(|v| v as u32)),
        TypedArrayKind::Float32 => cast(values.map(|v| v as f32)),
        TypedArrayKind::Float64 => cast(values),
    }
}

fn channels(format: u32) -> Option<u32> {
    match format {
        gl::ALPHA | gl::LUMINANCE => Some(1),
        gl::LUMINANCE_ALPHA => Some(2),
        gl::RGB => Some(3),
        gl::RGBA => Some(4),
        _ => None,
    }
}

/// Keeps the channels of `format` from one RGBA texel.
fn select_channels(rgba: [u8; 4], format: u32, out: &mut Vec<u8>) {
    let [r, g, b, a] = rgba;
    match format {
        gl::ALPHA => out.push(a),
        gl::LUMINANCE => out.push(r),
        gl::LUMINANCE_ALPHA => out.extend([r, a]),
        gl::RGB => out.extend([r, g, b]),
        _ => out.extend(rgba),
    }
}

fn flip_rows(data: Vec<u8>, row_bytes: usize) -> Vec<u8> {
    if row_bytes == 0 {
        return data;
    }
    data.chunks_exact(row_bytes).rev().flatten().copied().collect()
}

// ============================================================================
// Shader declarations
// ============================================================================

fn glsl_type(name: &str) -> Option<(u32, usize)> {
    let ty = match name {
        "float" => (gl::FLOAT, 1),
        "vec2" => (gl::FLOAT_VEC2, 2),
        "vec3" => (gl::FLOAT_VEC3, 3),
        "vec4" => (gl::FLOAT_VEC4, 4),
        "int" => (gl::INT, 1),
        "ivec2" => (gl::INT_VEC2, 2),
        "ivec3" => (gl::INT_VEC3, 3),
        "ivec4" => (gl::INT_VEC4, 4),
        "bool" => (gl::BOOL, 1),
        "bvec2" => (gl::BOOL_VEC2, 2),
        "bvec3" => (gl::BOOL_VEC3, 3),
        "bvec4" => (gl::BOOL_VEC4, 4),
        "mat2" => (gl::FLOAT_MAT2, 4),
        "mat3" => (gl::FLOAT_MAT3, 9),
        "mat4" => (gl::FLOAT_MAT4, 16),
        "sampler2D" => (gl::SAMPLER_2D, 1),
        "samplerCube" => (gl::SAMPLER_CUBE, 1),
        _ => return None,
    };
    Some(ty)
}

fn components(ty: u32) -> usize {
    match ty {
        gl::FLOAT_VEC2 | gl::INT_VEC2 | gl::BOOL_VEC2 => 2,
        gl::FLOAT_VEC3 | gl::INT_VEC3 | gl::BOOL_VEC3 => 3,
        gl::FLOAT_VEC4 | gl::INT_VEC4 | gl::BOOL_VEC4 | gl::FLOAT_MAT2 => 4,
        gl::FLOAT_MAT3 => 9,
        gl::FLOAT_MAT4 => 16,
        _ => 1,
    }
}

/// `(type, name, array size)` of every `qualifier` declaration in `source`.
fn declarations(source: &str, qualifier: &str) -> Vec<(u32, String, u32)> {
    let code: String = source
        .lines()
        .map(|line| line.split("//").next().unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n");
    let mut found = Vec::new();
    for statement in code.split(';') {
        let mut tokens = statement.split_whitespace().peekable();
        if tokens.next() != Some(qualifier) {
            continue;
        }
        while tokens.next_if(|t| matches!(*t, "lowp" | "mediump" | "highp")).is_some() {}
        let Some((ty, _)) = tokens.next().and_then(glsl_type) else {
            continue;
        };
        let names: String = tokens.collect();
        for declarator in names.split(',').filter(|d| !d.is_empty()) {
            let (name, size) = match declarator.split_once('[') {
                Some((name, rest)) => (
                    name,
                    rest.trim_end_matches(']').parse().unwrap_or(1),
                ),
                None => (declarator, 1),
            };
            found.push((ty, name.to_string(), size));
        }
    }
    found
}

/// Parsed `uniform{1-4}{f,i}[v]` or `uniformMatrix{2-4}fv` method name.
#[derive(Debug, Clone, Copy, PartialEq)]
struct UniformSetter {
    count: usize,
    matrix: bool,
    vector: bool,
    integer: bool,
}

fn uniform_setter(method: &str) -> Option<UniformSetter> {
    if let Some(rest) = method.strip_prefix("uniformMatrix") {
        let n = match rest {
            "2fv" => 2,
            "3fv" => 3,
            "4fv" => 4,
            _ => return None,
        };
        return Some(UniformSetter {
            count: n * n,
            matrix: true,
            vector: true,
            integer: false,
        });
    }
    let rest = method.strip_prefix("uniform")?;
    let count = rest.get(..1)?.parse().ok().filter(|n| (1..=4).contains(n))?;
    let (integer, vector) = match rest.get(1..)? {
        "f" => (false, false),
        "fv" => (false, true),
        "i" => (true, false),
        "iv" => (true, true),
        _ => return None,
    };
    Some(UniformSetter {
        count,
        matrix: false,
        vector,
        integer,
    })
}

fn setter_accepts(setter: UniformSetter, ty: u32) -> bool {
    if components(ty) != setter.count {
        return false;
    }
    let is_matrix = matches!(ty, gl::FLOAT_MAT2 | gl::FLOAT_MAT3 | gl::FLOAT_MAT4);
    if setter.matrix || is_matrix {
        return setter.matrix && is_matrix;
    }
    match ty {
        gl::BOOL | gl::BOOL_VEC2 | gl::BOOL_VEC3 | gl::BOOL_VEC4 => true,
        gl::INT | gl::INT_VEC2 | gl::INT_VEC3 | gl::INT_VEC4 | gl::SAMPLER_2D | gl::SAMPLER_CUBE => {
            setter.integer
        }
        _ => !setter.integer,
    }
}

// ============================================================================
// Context
// ============================================================================

#[derive(Debug, Clone)]
struct VertexAttrib {
    enabled: bool,
    size: u32,
    ty: u32,
    normalized: bool,
    stride: u32,
    offset: u32,
    buffer: Option<HostObject>,
    current: [f64; 4],
}

impl Default for VertexAttrib {
    fn default() -> Self {
        Self {
            enabled: false,
            size: 4,
            ty: gl::FLOAT,
            normalized: false,
            stride: 0,
            offset: 0,
            buffer: None,
            current: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Where color reads and writes go.
enum ColorBuffer {
    Canvas(ObjectId),
    Texture { texture: ObjectId, face: u32, level: i32 },
    Incomplete,
}

fn default_parameters(width: u32, height: u32) -> BTreeMap<u32, Value> {
    let (w, h) = (width as f64, height as f64);
    [
        (gl::BLEND_COLOR, floats([0.0; 4])),
        (gl::BLEND_DST_ALPHA, gl::ZERO.into()),
        (gl::BLEND_DST_RGB, gl::ZERO.into()),
        (gl::BLEND_EQUATION_ALPHA, gl::FUNC_ADD.into()),
        (gl::BLEND_EQUATION_RGB, gl::FUNC_ADD.into()),
        (gl::BLEND_SRC_ALPHA, gl::ONE.into()),
        (gl::BLEND_SRC_RGB, gl::ONE.into()),
        (gl::COLOR_CLEAR_VALUE, floats([0.0; 4])),
        (gl::COLOR_WRITEMASK, Value::array([true.into(), true.into(), true.into(), true.into()])),
        (gl::CULL_FACE_MODE, gl::BACK.into()),
        (gl::DEPTH_CLEAR_VALUE, 1.0.into()),
        (gl::DEPTH_FUNC, gl::LESS.into()),
        (gl::DEPTH_RANGE, floats([0.0, 1.0])),
        (gl::DEPTH_WRITEMASK, true.into()),
        (gl::FRONT_FACE, gl::CCW.into()),
        (gl::GENERATE_MIPMAP_HINT, gl::DONT_CARE.into()),
        (gl::LINE_WIDTH, 1.0.into()),
        (gl::PACK_ALIGNMENT, 4.into()),
        (gl::POLYGON_OFFSET_FACTOR, 0.0.into()),
        (gl::POLYGON_OFFSET_UNITS, 0.0.into()),
        (gl::SAMPLE_COVERAGE_INVERT, false.into()),
        (gl::SAMPLE_COVERAGE_VALUE, 1.0.into()),
        (gl::SCISSOR_BOX, ints([0.0, 0.0, w, h])),
        (gl::STENCIL_BACK_FAIL, gl::KEEP.into()),
        (gl::STENCIL_BACK_FUNC, gl::ALWAYS.into()),
        (gl::STENCIL_BACK_PASS_DEPTH_FAIL, gl::KEEP.into()),
        (gl::STENCIL_BACK_PASS_DEPTH_PASS, gl::KEEP.into()),
        (gl::STENCIL_BACK_REF, 0.into()),
        (gl::STENCIL_BACK_VALUE_MASK, u32::MAX.into()),
        (gl::STENCIL_BACK_WRITEMASK, u32::MAX.into()),
        (gl::STENCIL_CLEAR_VALUE, 0.into()),
        (gl::STENCIL_FAIL, gl::KEEP.into()),
        (gl::STENCIL_FUNC, gl::ALWAYS.into()),
        (gl::STENCIL_PASS_DEPTH_FAIL, gl::KEEP.into()),
        (gl::STENCIL_PASS_DEPTH_PASS, gl::KEEP.into()),
        (gl::STENCIL_REF, 0.into()),
        (gl::STENCIL_VALUE_MASK, u32::MAX.into()),
        (gl::STENCIL_WRITEMASK, u32::MAX.into()),
        (gl::UNPACK_ALIGNMENT, 4.into()),
        (gl::UNPACK_COLORSPACE_CONVERSION_WEBGL, gl::BROWSER_DEFAULT_WEBGL.into()),
        (gl::UNPACK_FLIP_Y_WEBGL, false.into()),
        (gl::UNPACK_PREMULTIPLY_ALPHA_WEBGL, false.into()),
        (gl::VIEWPORT, ints([0.0, 0.0, w, h])),
        // Implementation limits.
        (gl::MAX_VERTEX_ATTRIBS, (MAX_VERTEX_ATTRIBS as u32).into()),
        (gl::MAX_TEXTURE_IMAGE_UNITS, (MAX_TEXTURE_UNITS as u32).into()),
        (gl::MAX_COMBINED_TEXTURE_IMAGE_UNITS, (MAX_TEXTURE_UNITS as u32).into()),
        (gl::MAX_TEXTURE_SIZE, MAX_TEXTURE_SIZE.into()),
        (gl::MAX_CUBE_MAP_TEXTURE_SIZE, MAX_TEXTURE_SIZE.into()),
        (gl::MAX_VIEWPORT_DIMS, ints([4096.0, 4096.0])),
        (gl::ALIASED_LINE_WIDTH_RANGE, floats([1.0, 1.0])),
        (gl::ALIASED_POINT_SIZE_RANGE, floats([1.0, 64.0])),
        (gl::SUBPIXEL_BITS, 4.into()),
        (gl::SAMPLE_BUFFERS, 0.into()),
        (gl::SAMPLES, 0.into()),
        (gl::VENDOR, "canvas-inspector".into()),
        (gl::RENDERER, "headless".into()),
        (gl::VERSION, "WebGL 1.0".into()),
        (gl::SHADING_LANGUAGE_VERSION, "WebGL GLSL ES 1.0".into()),
    ]
    .into_iter()
    .collect()
}

pub(crate) struct GlContext {
    canvas: ObjectId,
    width: u32,
    height: u32,
    attributes: ContextAttributes,
    capabilities: BTreeSet<u32>,
    parameters: BTreeMap<u32, Value>,
    array_buffer: Option<HostObject>,
    element_array_buffer: Option<HostObject>,
    framebuffer: Option<HostObject>,
    renderbuffer: Option<HostObject>,
    program: Option<HostObject>,
    active_unit: usize,
    /// `[TEXTURE_2D, TEXTURE_CUBE_MAP]` binding per unit.
    units: [[Option<HostObject>; 2]; MAX_TEXTURE_UNITS],
    attribs: [VertexAttrib; MAX_VERTEX_ATTRIBS],
    errors: Vec<u32>,
    extensions: BTreeMap<String, HostObject>,
    draws: usize,
}

impl GlContext {
    pub(crate) fn new(canvas: ObjectId, width: u32, height: u32, attributes: ContextAttributes) -> Self {
        Self {
            canvas,
            width,
            height,
            attributes,
            capabilities: BTreeSet::from([gl::DITHER]),
            parameters: default_parameters(width, height),
            array_buffer: None,
            element_array_buffer: None,
            framebuffer: None,
            renderbuffer: None,
            program: None,
            active_unit: 0,
            units: [[None; 2]; MAX_TEXTURE_UNITS],
            attribs: std::array::from_fn(|_| VertexAttrib::default()),
            errors: Vec::new(),
            extensions: BTreeMap::new(),
            draws: 0,
        }
    }

    pub(crate) fn draw_count(&self) -> usize {
        self.draws
    }

    pub(crate) fn get_property(&self, target: &HostObject, name: &str) -> Result<Value, HostError> {
        match name {
            "canvas" => Ok(HostObject::new(self.canvas, ObjectClass::Canvas).into()),
            "drawingBufferWidth" => Ok(self.width.into()),
            "drawingBufferHeight" => Ok(self.height.into()),
            name if is_constant_name(name) => gl_constant(name)
                .map(Value::from)
                .ok_or_else(|| unknown_property(target, name)),
            _ => Err(unknown_property(target, name)),
        }
    }

    fn record_error(&mut self, error: u32) {
        if !self.errors.contains(&error) {
            self.errors.push(error);
        }
    }

    fn set(&mut self, pname: u32, value: impl Into<Value>) {
        self.parameters.insert(pname, value.into());
    }

    fn get_parameter(&self, pname: u32) -> GlResult<Value> {
        let value = match pname {
            gl::ARRAY_BUFFER_BINDING => self.array_buffer.into(),
            gl::ELEMENT_ARRAY_BUFFER_BINDING => self.element_array_buffer.into(),
            gl::FRAMEBUFFER_BINDING => self.framebuffer.into(),
            gl::RENDERBUFFER_BINDING => self.renderbuffer.into(),
            gl::CURRENT_PROGRAM => self.program.into(),
            gl::TEXTURE_BINDING_2D => self.units[self.active_unit][0].into(),
            gl::TEXTURE_BINDING_CUBE_MAP => self.units[self.active_unit][1].into(),
            gl::ACTIVE_TEXTURE => (gl::TEXTURE0 + self.active_unit as u32).into(),
            _ => self
                .parameters
                .get(&pname)
                .map(fresh)
                .ok_or(Failure::Gl(gl::INVALID_ENUM))?,
        };
        Ok(value)
    }

    /// Resolves a nullable object argument owned by this context.
    fn object_arg(
        &self,
        host: &HeadlessHost,
        this: ObjectId,
        method: &str,
        value: Option<&Value>,
        class: ObjectClass,
    ) -> GlResult<Option<HostObject>> {
        let value = value.cloned().unwrap_or_default();
        if value.is_nullish() {
            return Ok(None);
        }
        let object = value
            .as_object()
            .filter(|o| o.class == class)
            .ok_or_else(|| type_error(method, &format!("expected {}", class.name())))?;
        match host.gl_object(object.id) {
            Some(gl_object) if gl_object.context == this && !gl_object.deleted => Ok(Some(object)),
            _ => Err(Failure::Gl(gl::INVALID_OPERATION)),
        }
    }

    fn required_object(
        &self,
        host: &HeadlessHost,
        this: ObjectId,
        method: &str,
        value: Option<&Value>,
        class: ObjectClass,
    ) -> GlResult<HostObject> {
        self.object_arg(host, this, method, value, class)?
            .ok_or_else(|| type_error(method, &format!("{} must not be null", class.name())))
    }

    fn create(&mut self, host: &mut HeadlessHost, this: ObjectId, class: ObjectClass, kind: GlObjectKind) -> Value {
        let object = GlObject {
            context: this,
            deleted: false,
            kind,
        };
        host.alloc(class, Node::Gl(object)).into()
    }

    fn delete(&mut self, host: &mut HeadlessHost, this: ObjectId, method: &str, args: &[Value], class: ObjectClass) -> GlResult<()> {
        let Some(object) = self.object_arg(host, this, method, args.first(), class)? else {
            return Ok(());
        };
        if let Some(gl_object) = host.gl_object_mut(object.id) {
            gl_object.deleted = true;
        }
        let unbind = |slot: &mut Option<HostObject>| {
            if *slot == Some(object) {
                *slot = None;
            }
        };
        unbind(&mut self.array_buffer);
        unbind(&mut self.element_array_buffer);
        unbind(&mut self.framebuffer);
        unbind(&mut self.renderbuffer);
        for unit in &mut self.units {
            unit.iter_mut().for_each(unbind);
        }
        Ok(())
    }

    fn is_object(&self, host: &HeadlessHost, this: ObjectId, args: &[Value], class: ObjectClass) -> bool {
        args.first()
            .and_then(Value::as_object)
            .filter(|o| o.class == class)
            .and_then(|o| host.gl_object(o.id))
            .is_some_and(|o| o.context == this && !o.deleted)
    }

    // ------------------------------------------------------------------------
    // Fixed-function state
    // ------------------------------------------------------------------------

    fn set_capability(&mut self, capability: u32, enabled: bool) -> GlResult<()> {
        ensure(CAPABILITIES.contains(&capability), gl::INVALID_ENUM)?;
        if enabled {
            self.capabilities.insert(capability);
        } else {
            self.capabilities.remove(&capability);
        }
        Ok(())
    }

    fn blend_equation(&mut self, rgb: u32, alpha: u32) -> GlResult<()> {
        let valid = |mode| matches!(mode, gl::FUNC_ADD | gl::FUNC_SUBTRACT | gl::FUNC_REVERSE_SUBTRACT);
        ensure(valid(rgb) && valid(alpha), gl::INVALID_ENUM)?;
        self.set(gl::BLEND_EQUATION_RGB, rgb);
        self.set(gl::BLEND_EQUATION_ALPHA, alpha);
        Ok(())
    }

    fn blend_func(&mut self, src_rgb: u32, dst_rgb: u32, src_alpha: u32, dst_alpha: u32) {
        self.set(gl::BLEND_SRC_RGB, src_rgb);
        self.set(gl::BLEND_DST_RGB, dst_rgb);
        self.set(gl::BLEND_SRC_ALPHA, src_alpha);
        self.set(gl::BLEND_DST_ALPHA, dst_alpha);
    }

    fn stencil_faces(face: u32) -> GlResult<(bool, bool)> {
        match face {
            gl::FRONT => Ok((true, false)),
            gl::BACK => Ok((false, true)),
            gl::FRONT_AND_BACK => Ok((true, true)),
            _ => Err(Failure::Gl(gl::INVALID_ENUM)),
        }
    }

    fn stencil_func(&mut self, face: u32, func: u32, reference: i64, mask: u32) -> GlResult<()> {
        ensure((gl::NEVER..=gl::ALWAYS).contains(&func), gl::INVALID_ENUM)?;
        let (front, back) = Self::stencil_faces(face)?;
        let reference = Value::Number(reference as f64);
        if front {
            self.set(gl::STENCIL_FUNC, func);
            self.set(gl::STENCIL_REF, reference.clone());
            self.set(gl::STENCIL_VALUE_MASK, mask);
        }
        if back {
            self.set(gl::STENCIL_BACK_FUNC, func);
            self.set(gl::STENCIL_BACK_REF, reference);
            self.set(gl::STENCIL_BACK_VALUE_MASK, mask);
        }
        Ok(())
    }

    fn stencil_op(&mut self, face: u32, fail: u32, zfail: u32, zpass: u32) -> GlResult<()> {
        ensure([fail, zfail, zpass].iter().all(|op| STENCIL_OPS.contains(op)), gl::INVALID_ENUM)?;
        let (front, back) = Self::stencil_faces(face)?;
        if front {
            self.set(gl::STENCIL_FAIL, fail);
            self.set(gl::STENCIL_PASS_DEPTH_FAIL, zfail);
            self.set(gl::STENCIL_PASS_DEPTH_PASS, zpass);
        }
        if back {
            self.set(gl::STENCIL_BACK_FAIL, fail);
            self.set(gl::STENCIL_BACK_PASS_DEPTH_FAIL, zfail);
            self.set(gl::STENCIL_BACK_PASS_DEPTH_PASS, zpass);
        }
        Ok(())
    }

    fn stencil_mask(&mut self, face: u32, mask: u32) -> GlResult<()> {
        let (front, back) = Self::stencil_faces(face)?;
        if front {
            self.set(gl::STENCIL_WRITEMASK, mask);
        }
        if back {
            self.set(gl::STENCIL_BACK_WRITEMASK, mask);
        }
        Ok(())
    }

    fn rectangle(&mut self, pname: u32, args: &[Value]) -> GlResult<()> {
        let (width, height) = (int(args, 2), int(args, 3));
        ensure(width >= 0 && height >= 0, gl::INVALID_VALUE)?;
        self.set(pname, ints([int(args, 0) as f64, int(args, 1) as f64, width as f64, height as f64]));
        Ok(())
    }

    fn pixel_store(&mut self, pname: u32, param: &Value) -> GlResult<()> {
        let value = match pname {
            gl::PACK_ALIGNMENT | gl::UNPACK_ALIGNMENT => {
                let alignment = param.as_u32().unwrap_or(0);
                ensure(matches!(alignment, 1 | 2 | 4 | 8), gl::INVALID_VALUE)?;
                Value::from(alignment)
            }
            gl::UNPACK_FLIP_Y_WEBGL | gl::UNPACK_PREMULTIPLY_ALPHA_WEBGL => param.is_truthy().into(),
            gl::UNPACK_COLORSPACE_CONVERSION_WEBGL => {
                let conversion = param.as_u32().unwrap_or(u32::MAX);
                ensure(
                    matches!(conversion, gl::BROWSER_DEFAULT_WEBGL | gl::NONE),
                    gl::INVALID_ENUM,
                )?;
                conversion.into()
            }
            _ => return Err(Failure::Gl(gl::INVALID_ENUM)),
        };
        self.set(pname, value);
        Ok(())
    }

    fn unpack_flag(&self, pname: u32) -> bool {
        self.parameters.get(&pname).is_some_and(Value::is_truthy)
    }

    // ------------------------------------------------------------------------
    // Bindings
    // ------------------------------------------------------------------------

    fn buffer_slot(&mut self, target: u32) -> GlResult<&mut Option<HostObject>> {
        match target {
            gl::ARRAY_BUFFER => Ok(&mut self.array_buffer),
            gl::ELEMENT_ARRAY_BUFFER => Ok(&mut self.element_array_buffer),
            _ => Err(Failure::Gl(gl::INVALID_ENUM)),
        }
    }

    fn bound_buffer(&mut self, target: u32) -> GlResult<HostObject> {
        self.buffer_slot(target)?.ok_or(Failure::Gl(gl::INVALID_OPERATION))
    }

    /// Unit slot of a bind target.
    fn texture_slot(target: u32) -> GlResult<usize> {
        match target {
            gl::TEXTURE_2D => Ok(0),
            gl::TEXTURE_CUBE_MAP => Ok(1),
            _ => Err(Failure::Gl(gl::INVALID_ENUM)),
        }
    }

    /// Unit slot and image face of an image target.
    fn image_target(target: u32) -> GlResult<(usize, u32)> {
        match target {
            gl::TEXTURE_2D => Ok((0, target)),
            gl::TEXTURE_CUBE_MAP_POSITIVE_X..=gl::TEXTURE_CUBE_MAP_NEGATIVE_Z => Ok((1, target)),
            _ => Err(Failure::Gl(gl::INVALID_ENUM)),
        }
    }

    fn bound_texture(&self, slot: usize) -> GlResult<HostObject> {
        self.units[self.active_unit][slot].ok_or(Failure::Gl(gl::INVALID_OPERATION))
    }

    fn bind_texture(&mut self, host: &mut HeadlessHost, target: u32, texture: Option<HostObject>) -> GlResult<()> {
        let slot = Self::texture_slot(target)?;
        if let Some(texture) = texture {
            let Some(state) = host.texture_mut(texture.id) else {
                return Err(Failure::Gl(gl::INVALID_OPERATION));
            };
            ensure(state.target.is_none_or(|t| t == target), gl::INVALID_OPERATION)?;
            state.target = Some(target);
        }
        self.units[self.active_unit][slot] = texture;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Buffers
    // ------------------------------------------------------------------------

    fn buffer_data(&mut self, host: &mut HeadlessHost, method: &str, args: &[Value]) -> GlResult<()> {
        let usage = uint(args, 2);
        ensure(
            matches!(usage, gl::STREAM_DRAW | gl::STATIC_DRAW | gl::DYNAMIC_DRAW),
            gl::INVALID_ENUM,
        )?;
        let buffer = self.bound_buffer(uint(args, 0))?;
        let data = match args.get(1) {
            Some(Value::Number(size)) => {
                ensure(*size >= 0.0, gl::INVALID_VALUE)?;
                vec![0; *size as usize]
            }
            Some(Value::ArrayBuffer(bytes)) => bytes.borrow().clone(),
            Some(Value::Typed(array)) => typed_bytes(array),
            Some(Value::Null) | None => return Err(Failure::Gl(gl::INVALID_VALUE)),
            Some(_) => return Err(type_error(method, "data must be a size or buffer")),
        };
        if let Some(GlObjectKind::Buffer(state)) = host.gl_object_mut(buffer.id).map(|o| &mut o.kind) {
            state.data = data;
            state.usage = usage;
        }
        Ok(())
    }

    fn buffer_sub_data(&mut self, host: &mut HeadlessHost, method: &str, args: &[Value]) -> GlResult<()> {
        let buffer = self.bound_buffer(uint(args, 0))?;
        let offset = int(args, 1);
        ensure(offset >= 0, gl::INVALID_VALUE)?;
        let data = match args.get(2) {
            Some(Value::ArrayBuffer(bytes)) => bytes.borrow().clone(),
            Some(Value::Typed(array)) => typed_bytes(array),
            _ => return Err(type_error(method, "data must be a buffer")),
        };
        let Some(GlObjectKind::Buffer(state)) = host.gl_object_mut(buffer.id).map(|o| &mut o.kind) else {
            return Err(Failure::Gl(gl::INVALID_OPERATION));
        };
        let start = offset as usize;
        ensure(start + data.len() <= state.data.len(), gl::INVALID_VALUE)?;
        state.data[start..start + data.len()].copy_from_slice(&data);
        Ok(())
    }

    fn buffer_parameter(&mut self, host: &HeadlessHost, args: &[Value]) -> GlResult<Value> {
        let buffer = self.bound_buffer(uint(args, 0))?;
        let Some(GlObjectKind::Buffer(state)) = host.gl_object(buffer.id).map(|o| &o.kind) else {
            return Err(Failure::Gl(gl::INVALID_OPERATION));
        };
        match uint(args, 1) {
            gl::BUFFER_SIZE => Ok((state.data.len() as u32).into()),
            gl::BUFFER_USAGE => Ok(state.usage.into()),
            _ => Err(Failure::Gl(gl::INVALID_ENUM)),
        }
    }

    // ------------------------------------------------------------------------
    // Textures
    // ------------------------------------------------------------------------

    fn bytes_per_pixel(&self, format: u32, ty: u32) -> GlResult<u32> {
        let channels = channels(format).ok_or(Failure::Gl(gl::INVALID_ENUM))?;
        match ty {
            gl::UNSIGNED_BYTE => Ok(channels),
            gl::FLOAT if self.extensions.contains_key("OES_texture_float") => Ok(channels * 4),
            _ => Err(Failure::Gl(gl::INVALID_ENUM)),
        }
    }

    /// Texels of a `(width, height, format, type, pixels)` upload.
    fn unpack_pixels(
        &self,
        method: &str,
        width: i64,
        height: i64,
        format: u32,
        ty: u32,
        pixels: Option<&Value>,
    ) -> GlResult<TextureLevel> {
        ensure(width >= 0 && height >= 0, gl::INVALID_VALUE)?;
        let bpp = self.bytes_per_pixel(format, ty)?;
        let (width, height, size) = region_size(width, height, bpp)?;
        let mut data = match pixels {
            None | Some(Value::Null) | Some(Value::Undefined) => vec![0; size],
            Some(Value::Typed(array)) => typed_bytes(array),
            Some(Value::ArrayBuffer(bytes)) => bytes.borrow().clone(),
            Some(_) => return Err(type_error(method, "pixels must be an ArrayBufferView")),
        };
        ensure(data.len() >= size, gl::INVALID_OPERATION)?;
        data.truncate(size);
        if self.unpack_flag(gl::UNPACK_FLIP_Y_WEBGL) {
            data = flip_rows(data, width as usize * bpp as usize);
        }
        Ok(TextureLevel {
            width,
            height,
            format,
            ty,
            data,
        })
    }

    /// Texels of an image, canvas, video or ImageData upload.
    fn unpack_source(
        &self,
        host: &HeadlessHost,
        method: &str,
        format: u32,
        ty: u32,
        source: Option<&Value>,
    ) -> GlResult<TextureLevel> {
        ensure(channels(format).is_some(), gl::INVALID_ENUM)?;
        ensure(ty == gl::UNSIGNED_BYTE, gl::INVALID_OPERATION)?;
        let image: RgbaImage = host.source_image(&source.cloned().unwrap_or_default(), method)?;
        let premultiply = self.unpack_flag(gl::UNPACK_PREMULTIPLY_ALPHA_WEBGL);
        let mut data = Vec::new();
        for pixel in image.pixels() {
            let mut rgba = pixel.0;
            if premultiply {
                let alpha = rgba[3] as u32;
                for channel in &mut rgba[..3] {
                    *channel = (*channel as u32 * alpha / 255) as u8;
                }
            }
            select_channels(rgba, format, &mut data);
        }
        let row_bytes = (image.width() * channels(format).unwrap_or(4)) as usize;
        if self.unpack_flag(gl::UNPACK_FLIP_Y_WEBGL) {
            data = flip_rows(data, row_bytes);
        }
        Ok(TextureLevel {
            width: image.width(),
            height: image.height(),
            format,
            ty,
            data,
        })
    }

    fn tex_image_2d(&mut self, host: &mut HeadlessHost, method: &str, args: &[Value]) -> GlResult<()> {
        let (slot, face) = Self::image_target(uint(args, 0))?;
        let texture = self.bound_texture(slot)?;
        let level = int(args, 1);
        ensure(level >= 0, gl::INVALID_VALUE)?;
        let internal_format = uint(args, 2);
        let upload = match args.len() {
            9.. => {
                ensure(int(args, 5) == 0, gl::INVALID_VALUE)?;
                let format = uint(args, 6);
                ensure(format == internal_format, gl::INVALID_OPERATION)?;
                self.unpack_pixels(method, int(args, 3), int(args, 4), format, uint(args, 7), args.get(8))?
            }
            6 => {
                let format = uint(args, 3);
                ensure(format == internal_format, gl::INVALID_OPERATION)?;
                self.unpack_source(host, method, format, uint(args, 4), args.get(5))?
            }
            _ => return Err(type_error(method, "expected 6 or 9 arguments")),
        };
        if let Some(state) = host.texture_mut(texture.id) {
            state.levels.insert((face, level as i32), upload);
        }
        Ok(())
    }

    fn tex_sub_image_2d(&mut self, host: &mut HeadlessHost, method: &str, args: &[Value]) -> GlResult<()> {
        let (slot, face) = Self::image_target(uint(args, 0))?;
        let texture = self.bound_texture(slot)?;
        let level = int(args, 1) as i32;
        let (x, y) = (int(args, 2), int(args, 3));
        let upload = match args.len() {
            9.. => self.unpack_pixels(method, int(args, 4), int(args, 5), uint(args, 6), uint(args, 7), args.get(8))?,
            7 => self.unpack_source(host, method, uint(args, 4), uint(args, 5), args.get(6))?,
            _ => return Err(type_error(method, "expected 7 or 9 arguments")),
        };
        let bpp = self.bytes_per_pixel(upload.format, upload.ty)? as usize;
        let row = upload.width as usize * bpp;
        let Some(target) = host
            .texture_mut(texture.id)
            .and_then(|state| state.levels.get_mut(&(face, level)))
        else {
            return Err(Failure::Gl(gl::INVALID_OPERATION));
        };
        ensure(
            target.format == upload.format && target.ty == upload.ty,
            gl::INVALID_OPERATION,
        )?;
        ensure(
            x >= 0
                && y >= 0
                && x + upload.width as i64 <= target.width as i64
                && y + upload.height as i64 <= target.height as i64,
            gl::INVALID_VALUE,
        )?;
        if row == 0 {
            return Ok(());
        }
        for (i, chunk) in upload.data.chunks_exact(row).enumerate() {
            let start = ((y as usize + i) * target.width as usize + x as usize) * bpp;
            target.data[start..start + chunk.len()].copy_from_slice(chunk);
        }
        Ok(())
    }

    fn compressed_tex_image_2d(&mut self, host: &mut HeadlessHost, method: &str, args: &[Value]) -> GlResult<()> {
        let (slot, face) = Self::image_target(uint(args, 0))?;
        let texture = self.bound_texture(slot)?;
        let level = int(args, 1);
        ensure(level >= 0 && int(args, 5) == 0, gl::INVALID_VALUE)?;
        let data = match args.get(6) {
            Some(Value::Typed(array)) => typed_bytes(array),
            _ => return Err(type_error(method, "data must be an ArrayBufferView")),
        };
        let upload = TextureLevel {
            width: int(args, 3).max(0) as u32,
            height: int(args, 4).max(0) as u32,
            format: uint(args, 2),
            ty: gl::NONE,
            data,
        };
        if let Some(state) = host.texture_mut(texture.id) {
            state.levels.insert((face, level as i32), upload);
        }
        Ok(())
    }

    fn compressed_tex_sub_image_2d(&mut self, host: &mut HeadlessHost, args: &[Value]) -> GlResult<()> {
        let (slot, face) = Self::image_target(uint(args, 0))?;
        let texture = self.bound_texture(slot)?;
        let level = int(args, 1) as i32;
        let exists = host
            .texture_mut(texture.id)
            .is_some_and(|state| state.levels.contains_key(&(face, level)));
        ensure(exists, gl::INVALID_OPERATION)
    }

    fn copy_tex_image_2d(&mut self, host: &mut HeadlessHost, args: &[Value]) -> GlResult<()> {
        let (slot, face) = Self::image_target(uint(args, 0))?;
        let texture = self.bound_texture(slot)?;
        let level = int(args, 1);
        let format = uint(args, 2);
        let (x, y, width, height) = (int(args, 3), int(args, 4), int(args, 5), int(args, 6));
        ensure(level >= 0 && width >= 0 && height >= 0 && int(args, 7) == 0, gl::INVALID_VALUE)?;
        ensure(channels(format).is_some(), gl::INVALID_ENUM)?;
        let rgba = self.read_region(host, x, y, width, height)?;
        let mut data = Vec::new();
        for texel in rgba.chunks_exact(4) {
            select_channels([texel[0], texel[1], texel[2], texel[3]], format, &mut data);
        }
        let upload = TextureLevel {
            width: width as u32,
            height: height as u32,
            format,
            ty: gl::UNSIGNED_BYTE,
            data,
        };
        if let Some(state) = host.texture_mut(texture.id) {
            state.levels.insert((face, level as i32), upload);
        }
        Ok(())
    }

    fn copy_tex_sub_image_2d(&mut self, host: &mut HeadlessHost, args: &[Value]) -> GlResult<()> {
        let (slot, face) = Self::image_target(uint(args, 0))?;
        let texture = self.bound_texture(slot)?;
        let level = int(args, 1) as i32;
        let (xoffset, yoffset) = (int(args, 2), int(args, 3));
        let (x, y, width, height) = (int(args, 4), int(args, 5), int(args, 6), int(args, 7));
        ensure(width >= 0 && height >= 0, gl::INVALID_VALUE)?;
        let rgba = self.read_region(host, x, y, width, height)?;
        let Some(target) = host
            .texture_mut(texture.id)
            .and_then(|state| state.levels.get_mut(&(face, level)))
        else {
            return Err(Failure::Gl(gl::INVALID_OPERATION));
        };
        ensure(
            xoffset >= 0
                && yoffset >= 0
                && xoffset + width <= target.width as i64
                && yoffset + height <= target.height as i64,
            gl::INVALID_VALUE,
        )?;
        for (i, texel) in rgba.chunks_exact(4).enumerate() {
            let (dx, dy) = (i as i64 % width.max(1), i as i64 / width.max(1));
            if let Some(offset) = target.rgba_offset(xoffset + dx, yoffset + dy) {
                target.data[offset..offset + 4].copy_from_slice(texel);
            }
        }
        Ok(())
    }

    fn generate_mipmap(&mut self, host: &mut HeadlessHost, target: u32) -> GlResult<()> {
        let texture = self.bound_texture(Self::texture_slot(target)?)?;
        let Some(state) = host.texture_mut(texture.id) else {
            return Err(Failure::Gl(gl::INVALID_OPERATION));
        };
        ensure(state.levels.keys().any(|(_, level)| *level == 0), gl::INVALID_OPERATION)?;
        state.mipmapped = true;
        Ok(())
    }

    fn tex_parameter(&mut self, host: &mut HeadlessHost, args: &[Value]) -> GlResult<()> {
        let texture = self.bound_texture(Self::texture_slot(uint(args, 0))?)?;
        let pname = uint(args, 1);
        ensure(
            matches!(
                pname,
                gl::TEXTURE_MIN_FILTER | gl::TEXTURE_MAG_FILTER | gl::TEXTURE_WRAP_S | gl::TEXTURE_WRAP_T
            ),
            gl::INVALID_ENUM,
        )?;
        if let Some(state) = host.texture_mut(texture.id) {
            state.parameters.insert(pname, uint(args, 2));
        }
        Ok(())
    }

    fn get_tex_parameter(&mut self, host: &mut HeadlessHost, args: &[Value]) -> GlResult<Value> {
        let texture = self.bound_texture(Self::texture_slot(uint(args, 0))?)?;
        let pname = uint(args, 1);
        let default = match pname {
            gl::TEXTURE_MIN_FILTER => gl::NEAREST_MIPMAP_LINEAR,
            gl::TEXTURE_MAG_FILTER => gl::LINEAR,
            gl::TEXTURE_WRAP_S | gl::TEXTURE_WRAP_T => gl::REPEAT,
            _ => return Err(Failure::Gl(gl::INVALID_ENUM)),
        };
        let value = host
            .texture_mut(texture.id)
            .and_then(|state| state.parameters.get(&pname).copied())
            .unwrap_or(default);
        Ok(value.into())
    }

    // ------------------------------------------------------------------------
    // Framebuffers and renderbuffers
    // ------------------------------------------------------------------------

    fn bound_framebuffer(&self, target: u32) -> GlResult<HostObject> {
        ensure(target == gl::FRAMEBUFFER, gl::INVALID_ENUM)?;
        self.framebuffer.ok_or(Failure::Gl(gl::INVALID_OPERATION))
    }

    fn attach(&mut self, host: &mut HeadlessHost, target: u32, point: u32, attachment: Option<Attachment>) -> GlResult<()> {
        let framebuffer = self.bound_framebuffer(target)?;
        ensure(ATTACHMENT_POINTS.contains(&point), gl::INVALID_ENUM)?;
        if let Some(GlObjectKind::Framebuffer(attachments)) = host.gl_object_mut(framebuffer.id).map(|o| &mut o.kind) {
            match attachment {
                Some(attachment) => attachments.insert(point, attachment),
                None => attachments.remove(&point),
            };
        }
        Ok(())
    }

    fn attachment_parameter(&self, host: &HeadlessHost, args: &[Value]) -> GlResult<Value> {
        let framebuffer = self.bound_framebuffer(uint(args, 0))?;
        ensure(uint(args, 2) == gl::FRAMEBUFFER_ATTACHMENT_OBJECT_NAME, gl::INVALID_ENUM)?;
        let attached = match host.gl_object(framebuffer.id).map(|o| &o.kind) {
            Some(GlObjectKind::Framebuffer(attachments)) => {
                attachments.get(&uint(args, 1)).map(|a| a.object)
            }
            _ => None,
        };
        Ok(attached.into())
    }

    fn renderbuffer_storage(&mut self, host: &mut HeadlessHost, args: &[Value]) -> GlResult<()> {
        ensure(uint(args, 0) == gl::RENDERBUFFER, gl::INVALID_ENUM)?;
        let renderbuffer = self.renderbuffer.ok_or(Failure::Gl(gl::INVALID_OPERATION))?;
        let (width, height) = (int(args, 2), int(args, 3));
        ensure(width >= 0 && height >= 0, gl::INVALID_VALUE)?;
        if let Some(GlObjectKind::Renderbuffer(state)) = host.gl_object_mut(renderbuffer.id).map(|o| &mut o.kind) {
            *state = Renderbuffer {
                format: uint(args, 1),
                width: width as u32,
                height: height as u32,
            };
        }
        Ok(())
    }

    fn renderbuffer_parameter(&self, host: &HeadlessHost, args: &[Value]) -> GlResult<Value> {
        ensure(uint(args, 0) == gl::RENDERBUFFER, gl::INVALID_ENUM)?;
        let renderbuffer = self.renderbuffer.ok_or(Failure::Gl(gl::INVALID_OPERATION))?;
        let Some(GlObjectKind::Renderbuffer(state)) = host.gl_object(renderbuffer.id).map(|o| &o.kind) else {
            return Err(Failure::Gl(gl::INVALID_OPERATION));
        };
        match uint(args, 1) {
            gl::RENDERBUFFER_WIDTH => Ok(state.width.into()),
            gl::RENDERBUFFER_HEIGHT => Ok(state.height.into()),
            gl::RENDERBUFFER_INTERNAL_FORMAT => Ok(state.format.into()),
            _ => Err(Failure::Gl(gl::INVALID_ENUM)),
        }
    }

    fn color_buffer(&self, host: &HeadlessHost) -> ColorBuffer {
        let Some(framebuffer) = self.framebuffer else {
            return ColorBuffer::Canvas(self.canvas);
        };
        match host.gl_object(framebuffer.id).map(|o| &o.kind) {
            Some(GlObjectKind::Framebuffer(attachments)) => match attachments.get(&gl::COLOR_ATTACHMENT0) {
                Some(a) if a.object.class == ObjectClass::WebGLTexture => ColorBuffer::Texture {
                    texture: a.object.id,
                    face: a.face,
                    level: a.level,
                },
                _ => ColorBuffer::Incomplete,
            },
            _ => ColorBuffer::Incomplete,
        }
    }

    /// RGBA8 rows of a region of the color buffer, bottom row first.
    /// Texels outside the buffer read as zero.
    fn read_region(&self, host: &mut HeadlessHost, x: i64, y: i64, width: i64, height: i64) -> GlResult<Vec<u8>> {
        let (width, height, size) = region_size(width, height, 4)?;
        let mut out = vec![0; size];
        let mut texel = |i: usize, rgba: &[u8]| out[i * 4..i * 4 + 4].copy_from_slice(rgba);
        match self.color_buffer(host) {
            ColorBuffer::Canvas(id) => {
                if let Some(canvas) = host.canvas(id) {
                    let (w, h) = canvas.bitmap.dimensions();
                    for row in 0..height as i64 {
                        for col in 0..width as i64 {
                            let (gx, gy) = (x + col, y + row);
                            if gx < 0 || gy < 0 || gx >= w as i64 || gy >= h as i64 {
                                continue;
                            }
                            let pixel = canvas.bitmap.get_pixel(gx as u32, h - 1 - gy as u32);
                            texel((row * width as i64 + col) as usize, &pixel.0);
                        }
                    }
                }
            }
            ColorBuffer::Texture { texture, face, level } => {
                if let Some(image) = host.texture_mut(texture).and_then(|t| t.levels.get(&(face, level))) {
                    for row in 0..height as i64 {
                        for col in 0..width as i64 {
                            if let Some(offset) = image.rgba_offset(x + col, y + row) {
                                texel((row * width as i64 + col) as usize, &image.data[offset..offset + 4]);
                            }
                        }
                    }
                }
            }
            ColorBuffer::Incomplete => return Err(Failure::Gl(gl::INVALID_FRAMEBUFFER_OPERATION)),
        }
        Ok(out)
    }

    // ------------------------------------------------------------------------
    // Shaders and programs
    // ------------------------------------------------------------------------

    fn shader_parameter(&self, host: &HeadlessHost, shader: HostObject, pname: u32) -> GlResult<Value> {
        let Some(object) = host.gl_object(shader.id) else {
            return Err(Failure::Gl(gl::INVALID_VALUE));
        };
        let GlObjectKind::Shader(state) = &object.kind else {
            return Err(Failure::Gl(gl::INVALID_OPERATION));
        };
        match pname {
            gl::SHADER_TYPE => Ok(state.ty.into()),
            gl::COMPILE_STATUS => Ok(state.compiled.into()),
            gl::DELETE_STATUS => Ok(object.deleted.into()),
            _ => Err(Failure::Gl(gl::INVALID_ENUM)),
        }
    }

    fn attach_shader(&mut self, host: &mut HeadlessHost, program: HostObject, shader: HostObject) -> GlResult<()> {
        let ty = match host.gl_object(shader.id).map(|o| &o.kind) {
            Some(GlObjectKind::Shader(state)) => state.ty,
            _ => return Err(Failure::Gl(gl::INVALID_OPERATION)),
        };
        let attached_types: Vec<u32> = host
            .program(program.id)
            .map(|p| p.shaders.clone())
            .unwrap_or_default()
            .iter()
            .filter_map(|s| match host.gl_object(s.id).map(|o| &o.kind) {
                Some(GlObjectKind::Shader(state)) => Some(state.ty),
                _ => None,
            })
            .collect();
        ensure(!attached_types.contains(&ty), gl::INVALID_OPERATION)?;
        if let Some(state) = host.program_mut(program.id) {
            state.shaders.push(shader);
        }
        Ok(())
    }

    fn link_program(&mut self, host: &mut HeadlessHost, program: HostObject) -> GlResult<()> {
        let shaders = host.program(program.id).map(|p| p.shaders.clone()).unwrap_or_default();
        let mut types = BTreeSet::new();
        let mut compiled = true;
        let mut uniforms: Vec<Uniform> = Vec::new();
        let mut attributes = Vec::new();
        for shader in shaders {
            let Some(GlObjectKind::Shader(state)) = host.gl_object(shader.id).map(|o| &o.kind) else {
                continue;
            };
            types.insert(state.ty);
            compiled &= state.compiled;
            for (ty, name, size) in declarations(&state.source, "uniform") {
                if uniforms.iter().all(|u| u.name != name) {
                    let value = vec![0.0; components(ty) * size as usize];
                    uniforms.push(Uniform { name, ty, size, value });
                }
            }
            if state.ty == gl::VERTEX_SHADER {
                attributes.extend(declarations(&state.source, "attribute").into_iter().map(|(_, name, _)| name));
            }
        }
        let Some(state) = host.program_mut(program.id) else {
            return Err(Failure::Gl(gl::INVALID_OPERATION));
        };
        state.linked = compiled && types.contains(&gl::VERTEX_SHADER) && types.contains(&gl::FRAGMENT_SHADER);
        if !state.linked {
            return Ok(());
        }
        state.uniforms = uniforms;
        state.attributes.clear();
        let mut next = 0;
        for name in attributes {
            let location = match state.attribute_bindings.get(&name) {
                Some(bound) => *bound,
                None => {
                    while state.attribute_bindings.values().any(|l| *l == next)
                        || state.attributes.values().any(|l| *l == next)
                    {
                        next += 1;
                    }
                    next
                }
            };
            state.attributes.insert(name, location);
        }
        Ok(())
    }

    fn program_parameter(&self, host: &HeadlessHost, program: HostObject, pname: u32) -> GlResult<Value> {
        let Some(object) = host.gl_object(program.id) else {
            return Err(Failure::Gl(gl::INVALID_VALUE));
        };
        let GlObjectKind::Program(state) = &object.kind else {
            return Err(Failure::Gl(gl::INVALID_OPERATION));
        };
        match pname {
            gl::LINK_STATUS => Ok(state.linked.into()),
            gl::DELETE_STATUS => Ok(object.deleted.into()),
            gl::VALIDATE_STATUS => Ok(state.linked.into()),
            gl::ATTACHED_SHADERS => Ok((state.shaders.len() as u32).into()),
            gl::ACTIVE_UNIFORMS => Ok((state.uniforms.len() as u32).into()),
            gl::ACTIVE_ATTRIBUTES => Ok((state.attributes.len() as u32).into()),
            _ => Err(Failure::Gl(gl::INVALID_ENUM)),
        }
    }

    fn active_uniform(&self, host: &mut HeadlessHost, program: HostObject, index: u32) -> GlResult<Value> {
        let uniform = host
            .program(program.id)
            .and_then(|p| p.uniforms.get(index as usize))
            .cloned()
            .ok_or(Failure::Gl(gl::INVALID_VALUE))?;
        let name = if uniform.size > 1 {
            format!("{}[0]", uniform.name)
        } else {
            uniform.name
        };
        let info = ActiveInfo {
            name,
            ty: uniform.ty,
            size: uniform.size,
        };
        Ok(host.alloc(ObjectClass::WebGLActiveInfo, Node::ActiveInfo(info)).into())
    }

    fn uniform_location(&mut self, host: &mut HeadlessHost, this: ObjectId, program: HostObject, name: &str) -> GlResult<Value> {
        let Some(state) = host.program(program.id) else {
            return Err(Failure::Gl(gl::INVALID_OPERATION));
        };
        ensure(state.linked, gl::INVALID_OPERATION)?;
        let base = name.strip_suffix("[0]").unwrap_or(name);
        let Some(index) = state.uniforms.iter().position(|u| u.name == base) else {
            return Ok(Value::Null);
        };
        let location = GlObjectKind::UniformLocation {
            program: program.id,
            index,
        };
        Ok(self.create(host, this, ObjectClass::WebGLUniformLocation, location))
    }

    /// Program and uniform index behind a location argument.
    fn location_arg(&self, host: &HeadlessHost, this: ObjectId, method: &str, value: Option<&Value>) -> GlResult<Option<(ObjectId, usize)>> {
        let Some(location) = self.object_arg(host, this, method, value, ObjectClass::WebGLUniformLocation)? else {
            return Ok(None);
        };
        match host.gl_object(location.id).map(|o| &o.kind) {
            Some(GlObjectKind::UniformLocation { program, index }) => Ok(Some((*program, *index))),
            _ => Err(Failure::Gl(gl::INVALID_OPERATION)),
        }
    }

    fn get_uniform(&self, host: &HeadlessHost, this: ObjectId, args: &[Value]) -> GlResult<Value> {
        let program = self.required_object(host, this, "getUniform", args.first(), ObjectClass::WebGLProgram)?;
        let Some((owner, index)) = self.location_arg(host, this, "getUniform", args.get(1))? else {
            return Err(type_error("getUniform", "location must not be null"));
        };
        ensure(owner == program.id, gl::INVALID_OPERATION)?;
        let uniform = host
            .program(owner)
            .and_then(|p| p.uniforms.get(index))
            .ok_or(Failure::Gl(gl::INVALID_OPERATION))?;
        let first = uniform.value.iter().copied().take(components(uniform.ty));
        let value = match uniform.ty {
            gl::FLOAT | gl::INT | gl::SAMPLER_2D | gl::SAMPLER_CUBE => {
                Value::Number(uniform.value.first().copied().unwrap_or(0.0))
            }
            gl::BOOL => Value::Bool(uniform.value.first().is_some_and(|v| *v != 0.0)),
            gl::BOOL_VEC2 | gl::BOOL_VEC3 | gl::BOOL_VEC4 => Value::array(first.map(|v| Value::Bool(v != 0.0))),
            gl::INT_VEC2 | gl::INT_VEC3 | gl::INT_VEC4 => ints(first),
            _ => floats(first),
        };
        Ok(value)
    }

    fn set_uniform(
        &mut self,
        host: &mut HeadlessHost,
        this: ObjectId,
        method: &str,
        setter: UniformSetter,
        args: &[Value],
    ) -> GlResult<()> {
        let Some((owner, index)) = self.location_arg(host, this, method, args.first())? else {
            return Ok(());
        };
        ensure(self.program.is_some_and(|p| p.id == owner), gl::INVALID_OPERATION)?;
        let values = if setter.vector {
            let data = args.get(if setter.matrix { 2 } else { 1 });
            data.and_then(Value::numbers)
                .ok_or_else(|| type_error(method, "value must be an array"))?
        } else {
            (1..=setter.count).map(|i| number(args, i)).collect()
        };
        if setter.matrix {
            ensure(!flag(args, 1), gl::INVALID_VALUE)?;
        }
        ensure(!values.is_empty() && values.len() % setter.count == 0, gl::INVALID_VALUE)?;
        let Some(uniform) = host.program_mut(owner).and_then(|p| p.uniforms.get_mut(index)) else {
            return Err(Failure::Gl(gl::INVALID_OPERATION));
        };
        ensure(setter_accepts(setter, uniform.ty), gl::INVALID_OPERATION)?;
        let is_bool = matches!(uniform.ty, gl::BOOL | gl::BOOL_VEC2 | gl::BOOL_VEC3 | gl::BOOL_VEC4);
        for (slot, value) in uniform.value.iter_mut().zip(values) {
            *slot = if is_bool {
                if value != 0.0 { 1.0 } else { 0.0 }
            } else if setter.integer {
                value.trunc()
            } else {
                value as f32 as f64
            };
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Vertex attributes
    // ------------------------------------------------------------------------

    fn attrib_mut(&mut self, index: u32) -> GlResult<&mut VertexAttrib> {
        self.attribs
            .get_mut(index as usize)
            .ok_or(Failure::Gl(gl::INVALID_VALUE))
    }

    fn vertex_attrib_pointer(&mut self, args: &[Value]) -> GlResult<()> {
        let (size, ty, stride, offset) = (int(args, 1), uint(args, 2), int(args, 4), int(args, 5));
        ensure((1..=4).contains(&size), gl::INVALID_VALUE)?;
        ensure(
            matches!(ty, gl::BYTE | gl::UNSIGNED_BYTE | gl::SHORT | gl::UNSIGNED_SHORT | gl::FLOAT),
            gl::INVALID_ENUM,
        )?;
        ensure((0..=255).contains(&stride) && offset >= 0, gl::INVALID_VALUE)?;
        let buffer = self.array_buffer.ok_or(Failure::Gl(gl::INVALID_OPERATION))?;
        let attrib = self.attrib_mut(uint(args, 0))?;
        *attrib = VertexAttrib {
            size: size as u32,
            ty,
            normalized: flag(args, 3),
            stride: stride as u32,
            offset: offset as u32,
            buffer: Some(buffer),
            ..attrib.clone()
        };
        Ok(())
    }

    /// `vertexAttrib{N}f` and `vertexAttrib{N}fv`.
    fn vertex_attrib(&mut self, method: &str, count: usize, args: &[Value]) -> GlResult<()> {
        let values: Vec<f64> = if method.ends_with('v') {
            args.get(1)
                .and_then(Value::numbers)
                .ok_or_else(|| type_error(method, "values must be an array"))?
        } else {
            (1..=count).map(|i| number(args, i)).collect()
        };
        ensure(values.len() >= count, gl::INVALID_VALUE)?;
        let attrib = self.attrib_mut(uint(args, 0))?;
        let mut current = [0.0, 0.0, 0.0, 1.0];
        for (slot, value) in current.iter_mut().zip(values.into_iter().take(count)) {
            *slot = value as f32 as f64;
        }
        attrib.current = current;
        Ok(())
    }

    fn get_vertex_attrib(&mut self, index: u32, pname: u32) -> GlResult<Value> {
        let attrib = self.attrib_mut(index)?;
        let value = match pname {
            gl::VERTEX_ATTRIB_ARRAY_BUFFER_BINDING => attrib.buffer.into(),
            gl::VERTEX_ATTRIB_ARRAY_ENABLED => attrib.enabled.into(),
            gl::VERTEX_ATTRIB_ARRAY_SIZE => attrib.size.into(),
            gl::VERTEX_ATTRIB_ARRAY_STRIDE => attrib.stride.into(),
            gl::VERTEX_ATTRIB_ARRAY_TYPE => attrib.ty.into(),
            gl::VERTEX_ATTRIB_ARRAY_NORMALIZED => attrib.normalized.into(),
            gl::CURRENT_VERTEX_ATTRIB => floats(attrib.current),
            _ => return Err(Failure::Gl(gl::INVALID_ENUM)),
        };
        Ok(value)
    }

    // ------------------------------------------------------------------------
    // Drawing
    // ------------------------------------------------------------------------

    fn clear(&mut self, host: &mut HeadlessHost, mask: u32) -> GlResult<()> {
        let known = gl::COLOR_BUFFER_BIT | gl::DEPTH_BUFFER_BIT | gl::STENCIL_BUFFER_BIT;
        ensure(mask & !known == 0, gl::INVALID_VALUE)?;
        self.draws += 1;
        if mask & gl::COLOR_BUFFER_BIT == 0 {
            return Ok(());
        }
        let color = self
            .parameters
            .get(&gl::COLOR_CLEAR_VALUE)
            .and_then(Value::numbers)
            .unwrap_or_default();
        let color: Vec<u8> = (0..4)
            .map(|i| (clamp01(color.get(i).copied().unwrap_or(0.0)) * 255.0).round() as u8)
            .collect();
        let write_mask: Vec<bool> = (0..4)
            .map(|i| {
                self.parameters
                    .get(&gl::COLOR_WRITEMASK)
                    .is_none_or(|m| m.element(i).is_truthy())
            })
            .collect();
        let scissor = self
            .capabilities
            .contains(&gl::SCISSOR_TEST)
            .then(|| self.parameters.get(&gl::SCISSOR_BOX).and_then(Value::numbers))
            .flatten();
        let inside = |x: i64, y: i64| match &scissor {
            Some(b) if b.len() == 4 => {
                x >= b[0] as i64 && y >= b[1] as i64 && x < (b[0] + b[2]) as i64 && y < (b[1] + b[3]) as i64
            }
            _ => true,
        };
        let paint = |texel: &mut [u8]| {
            for (i, channel) in texel.iter_mut().enumerate() {
                if write_mask[i] {
                    *channel = color[i];
                }
            }
        };
        match self.color_buffer(host) {
            ColorBuffer::Canvas(id) => {
                if let Some(canvas) = host.canvas_mut(id) {
                    let (w, h) = canvas.bitmap.dimensions();
                    for y in 0..h {
                        for x in 0..w {
                            if inside(x as i64, y as i64) {
                                paint(&mut canvas.bitmap.get_pixel_mut(x, h - 1 - y).0);
                            }
                        }
                    }
                }
            }
            ColorBuffer::Texture { texture, face, level } => {
                if let Some(image) = host.texture_mut(texture).and_then(|t| t.levels.get_mut(&(face, level))) {
                    for y in 0..image.height as i64 {
                        for x in 0..image.width as i64 {
                            if let Some(offset) = image.rgba_offset(x, y).filter(|_| inside(x, y)) {
                                paint(&mut image.data[offset..offset + 4]);
                            }
                        }
                    }
                }
            }
            ColorBuffer::Incomplete => return Err(Failure::Gl(gl::INVALID_FRAMEBUFFER_OPERATION)),
        }
        Ok(())
    }

    fn draw(&mut self, mode: u32, count: i64, indexed: Option<u32>) -> GlResult<()> {
        ensure(mode <= gl::TRIANGLE_FAN, gl::INVALID_ENUM)?;
        ensure(count >= 0, gl::INVALID_VALUE)?;
        if let Some(ty) = indexed {
            let uint_indices = ty == gl::UNSIGNED_INT && self.extensions.contains_key("OES_element_index_uint");
            ensure(
                matches!(ty, gl::UNSIGNED_BYTE | gl::UNSIGNED_SHORT) || uint_indices,
                gl::INVALID_ENUM,
            )?;
            ensure(self.element_array_buffer.is_some(), gl::INVALID_OPERATION)?;
        }
        ensure(self.program.is_some(), gl::INVALID_OPERATION)?;
        self.draws += 1;
        Ok(())
    }

    fn read_pixels(&mut self, host: &mut HeadlessHost, args: &[Value]) -> GlResult<()> {
        let (width, height) = (int(args, 2), int(args, 3));
        ensure(width >= 0 && height >= 0, gl::INVALID_VALUE)?;
        ensure(uint(args, 4) == gl::RGBA && uint(args, 5) == gl::UNSIGNED_BYTE, gl::INVALID_OPERATION)?;
        let Some(Value::Typed(pixels)) = args.get(6) else {
            return Err(type_error("readPixels", "pixels must be a Uint8Array"));
        };
        let data = self.read_region(host, int(args, 0), int(args, 1), width, height)?;
        ensure(pixels.len() >= data.len(), gl::INVALID_OPERATION)?;
        for (i, byte) in data.into_iter().enumerate() {
            pixels.set(i, byte as f64);
        }
        Ok(())
    }

    fn get_extension(&mut self, host: &mut HeadlessHost, name: &str) -> Value {
        let Some(canonical) = SUPPORTED_EXTENSIONS.iter().find(|e| e.eq_ignore_ascii_case(name)) else {
            return Value::Null;
        };
        if let Some(extension) = self.extensions.get(*canonical) {
            return (*extension).into();
        }
        let extension = host.alloc(ObjectClass::WebGLExtension, Node::Extension(canonical.to_string()));
        self.extensions.insert(canonical.to_string(), extension);
        extension.into()
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    fn call(&mut self, host: &mut HeadlessHost, this: &HostObject, method: &str, args: &[Value]) -> GlResult<Value> {
        let id = this.id;
        let u = |i| uint(args, i);
        let f = |i| number(args, i);
        let done = |result: GlResult<()>| result.map(|()| Value::Undefined);

        match method {
            // Queries
            "getParameter" => self.get_parameter(u(0)),
            "getError" => {
                let error = if self.errors.is_empty() { gl::NO_ERROR } else { self.errors.remove(0) };
                Ok(error.into())
            }
            "isEnabled" => {
                ensure(CAPABILITIES.contains(&u(0)), gl::INVALID_ENUM)?;
                Ok(self.capabilities.contains(&u(0)).into())
            }
            "getContextAttributes" => {
                Ok(host.alloc(ObjectClass::WebGLContextAttributes, Node::ContextAttributes(self.attributes)).into())
            }
            "getExtension" => Ok(self.get_extension(host, args.first().and_then(Value::as_str).unwrap_or_default())),
            "getSupportedExtensions" => Ok(Value::array(SUPPORTED_EXTENSIONS.map(Value::from))),
            "isContextLost" => Ok(false.into()),

            // Fixed-function state
            "enable" => done(self.set_capability(u(0), true)),
            "disable" => done(self.set_capability(u(0), false)),
            "blendColor" => {
                self.set(gl::BLEND_COLOR, floats((0..4).map(|i| clamp01(f(i)))));
                Ok(Value::Undefined)
            }
            "blendEquation" => done(self.blend_equation(u(0), u(0))),
            "blendEquationSeparate" => done(self.blend_equation(u(0), u(1))),
            "blendFunc" => {
                self.blend_func(u(0), u(1), u(0), u(1));
                Ok(Value::Undefined)
            }
            "blendFuncSeparate" => {
                self.blend_func(u(0), u(1), u(2), u(3));
                Ok(Value::Undefined)
            }
            "clearColor" => {
                self.set(gl::COLOR_CLEAR_VALUE, floats((0..4).map(|i| clamp01(f(i)))));
                Ok(Value::Undefined)
            }
            "clearDepth" => {
                self.set(gl::DEPTH_CLEAR_VALUE, clamp01(f(0)));
                Ok(Value::Undefined)
            }
            "clearStencil" => {
                self.set(gl::STENCIL_CLEAR_VALUE, Value::Number(int(args, 0) as f64));
                Ok(Value::Undefined)
            }
            "colorMask" => {
                self.set(gl::COLOR_WRITEMASK, Value::array((0..4).map(|i| Value::Bool(flag(args, i)))));
                Ok(Value::Undefined)
            }
            "cullFace" => {
                ensure(matches!(u(0), gl::FRONT | gl::BACK | gl::FRONT_AND_BACK), gl::INVALID_ENUM)?;
                self.set(gl::CULL_FACE_MODE, u(0));
                Ok(Value::Undefined)
            }
            "depthFunc" => {
                ensure((gl::NEVER..=gl::ALWAYS).contains(&u(0)), gl::INVALID_ENUM)?;
                self.set(gl::DEPTH_FUNC, u(0));
                Ok(Value::Undefined)
            }
            "depthMask" => {
                self.set(gl::DEPTH_WRITEMASK, flag(args, 0));
                Ok(Value::Undefined)
            }
            "depthRange" => {
                let (near, far) = (clamp01(f(0)), clamp01(f(1)));
                ensure(near <= far, gl::INVALID_OPERATION)?;
                self.set(gl::DEPTH_RANGE, floats([near, far]));
                Ok(Value::Undefined)
            }
            "frontFace" => {
                ensure(matches!(u(0), gl::CW | gl::CCW), gl::INVALID_ENUM)?;
                self.set(gl::FRONT_FACE, u(0));
                Ok(Value::Undefined)
            }
            "hint" => {
                ensure(u(0) == gl::GENERATE_MIPMAP_HINT, gl::INVALID_ENUM)?;
                ensure(matches!(u(1), gl::DONT_CARE | gl::FASTEST | gl::NICEST), gl::INVALID_ENUM)?;
                self.set(gl::GENERATE_MIPMAP_HINT, u(1));
                Ok(Value::Undefined)
            }
            "lineWidth" => {
                ensure(f(0) > 0.0, gl::INVALID_VALUE)?;
                self.set(gl::LINE_WIDTH, f(0));
                Ok(Value::Undefined)
            }
            "pixelStorei" => done(self.pixel_store(u(0), &args.get(1).cloned().unwrap_or_default())),
            "polygonOffset" => {
                self.set(gl::POLYGON_OFFSET_FACTOR, f(0));
                self.set(gl::POLYGON_OFFSET_UNITS, f(1));
                Ok(Value::Undefined)
            }
            "sampleCoverage" => {
                self.set(gl::SAMPLE_COVERAGE_VALUE, clamp01(f(0)));
                self.set(gl::SAMPLE_COVERAGE_INVERT, flag(args, 1));
                Ok(Value::Undefined)
            }
            "stencilFunc" => done(self.stencil_func(gl::FRONT_AND_BACK, u(0), int(args, 1), u(2))),
            "stencilFuncSeparate" => done(self.stencil_func(u(0), u(1), int(args, 2), u(3))),
            "stencilOp" => done(self.stencil_op(gl::FRONT_AND_BACK, u(0), u(1), u(2))),
            "stencilOpSeparate" => done(self.stencil_op(u(0), u(1), u(2), u(3))),
            "stencilMask" => done(self.stencil_mask(gl::FRONT_AND_BACK, u(0))),
            "stencilMaskSeparate" => done(self.stencil_mask(u(0), u(1))),
            "scissor" => done(self.rectangle(gl::SCISSOR_BOX, args)),
            "viewport" => done(self.rectangle(gl::VIEWPORT, args)),

            // Object lifetime
            "createBuffer" => Ok(self.create(host, id, ObjectClass::WebGLBuffer, GlObjectKind::Buffer(Buffer { data: Vec::new(), usage: gl::STATIC_DRAW }))),
            "createTexture" => Ok(self.create(host, id, ObjectClass::WebGLTexture, GlObjectKind::Texture(Texture::default()))),
            "createFramebuffer" => Ok(self.create(host, id, ObjectClass::WebGLFramebuffer, GlObjectKind::Framebuffer(BTreeMap::new()))),
            "createRenderbuffer" => Ok(self.create(host, id, ObjectClass::WebGLRenderbuffer, GlObjectKind::Renderbuffer(Renderbuffer::default()))),
            "createProgram" => Ok(self.create(host, id, ObjectClass::WebGLProgram, GlObjectKind::Program(Program::default()))),
            "createShader" => {
                ensure(matches!(u(0), gl::VERTEX_SHADER | gl::FRAGMENT_SHADER), gl::INVALID_ENUM)?;
                let shader = Shader {
                    ty: u(0),
                    source: String::new(),
                    compiled: false,
                };
                Ok(self.create(host, id, ObjectClass::WebGLShader, GlObjectKind::Shader(shader)))
            }
            "deleteBuffer" => done(self.delete(host, id, method, args, ObjectClass::WebGLBuffer)),
            "deleteTexture" => done(self.delete(host, id, method, args, ObjectClass::WebGLTexture)),
            "deleteFramebuffer" => done(self.delete(host, id, method, args, ObjectClass::WebGLFramebuffer)),
            "deleteRenderbuffer" => done(self.delete(host, id, method, args, ObjectClass::WebGLRenderbuffer)),
            "deleteProgram" => done(self.delete(host, id, method, args, ObjectClass::WebGLProgram)),
            "deleteShader" => done(self.delete(host, id, method, args, ObjectClass::WebGLShader)),
            "isBuffer" => Ok(self.is_object(host, id, args, ObjectClass::WebGLBuffer).into()),
            "isTexture" => Ok(self.is_object(host, id, args, ObjectClass::WebGLTexture).into()),
            "isFramebuffer" => Ok(self.is_object(host, id, args, ObjectClass::WebGLFramebuffer).into()),
            "isRenderbuffer" => Ok(self.is_object(host, id, args, ObjectClass::WebGLRenderbuffer).into()),
            "isProgram" => Ok(self.is_object(host, id, args, ObjectClass::WebGLProgram).into()),
            "isShader" => Ok(self.is_object(host, id, args, ObjectClass::WebGLShader).into()),

            // Bindings
            "bindBuffer" => {
                let buffer = self.object_arg(host, id, method, args.get(1), ObjectClass::WebGLBuffer)?;
                *self.buffer_slot(u(0))? = buffer;
                Ok(Value::Undefined)
            }
            "bindTexture" => {
                let texture = self.object_arg(host, id, method, args.get(1), ObjectClass::WebGLTexture)?;
                done(self.bind_texture(host, u(0), texture))
            }
            "bindFramebuffer" => {
                ensure(u(0) == gl::FRAMEBUFFER, gl::INVALID_ENUM)?;
                self.framebuffer = self.object_arg(host, id, method, args.get(1), ObjectClass::WebGLFramebuffer)?;
                Ok(Value::Undefined)
            }
            "bindRenderbuffer" => {
                ensure(u(0) == gl::RENDERBUFFER, gl::INVALID_ENUM)?;
                self.renderbuffer = self.object_arg(host, id, method, args.get(1), ObjectClass::WebGLRenderbuffer)?;
                Ok(Value::Undefined)
            }
            "useProgram" => {
                let program = self.object_arg(host, id, method, args.first(), ObjectClass::WebGLProgram)?;
                if let Some(program) = program {
                    ensure(host.program(program.id).is_some_and(|p| p.linked), gl::INVALID_OPERATION)?;
                }
                self.program = program;
                Ok(Value::Undefined)
            }
            "activeTexture" => {
                let unit = u(0).wrapping_sub(gl::TEXTURE0) as usize;
                ensure(unit < MAX_TEXTURE_UNITS, gl::INVALID_ENUM)?;
                self.active_unit = unit;
                Ok(Value::Undefined)
            }

            // Buffers
            "bufferData" => done(self.buffer_data(host, method, args)),
            "bufferSubData" => done(self.buffer_sub_data(host, method, args)),
            "getBufferParameter" => self.buffer_parameter(host, args),

            // Textures
            "texImage2D" => done(self.tex_image_2d(host, method, args)),
            "texSubImage2D" => done(self.tex_sub_image_2d(host, method, args)),
            "compressedTexImage2D" => done(self.compressed_tex_image_2d(host, method, args)),
            "compressedTexSubImage2D" => done(self.compressed_tex_sub_image_2d(host, args)),
            "copyTexImage2D" => done(self.copy_tex_image_2d(host, args)),
            "copyTexSubImage2D" => done(self.copy_tex_sub_image_2d(host, args)),
            "generateMipmap" => done(self.generate_mipmap(host, u(0))),
            "texParameterf" | "texParameteri" => done(self.tex_parameter(host, args)),
            "getTexParameter" => self.get_tex_parameter(host, args),

            // Framebuffers and renderbuffers
            "framebufferTexture2D" => {
                let texture = self.object_arg(host, id, method, args.get(3), ObjectClass::WebGLTexture)?;
                let attachment = texture.map(|object| Attachment {
                    object,
                    face: u(2),
                    level: int(args, 4) as i32,
                });
                done(self.attach(host, u(0), u(1), attachment))
            }
            "framebufferRenderbuffer" => {
                let renderbuffer = self.object_arg(host, id, method, args.get(3), ObjectClass::WebGLRenderbuffer)?;
                let attachment = renderbuffer.map(|object| Attachment {
                    object,
                    face: gl::NONE,
                    level: 0,
                });
                done(self.attach(host, u(0), u(1), attachment))
            }
            "getFramebufferAttachmentParameter" => self.attachment_parameter(host, args),
            "checkFramebufferStatus" => {
                ensure(u(0) == gl::FRAMEBUFFER, gl::INVALID_ENUM)?;
                Ok(gl::FRAMEBUFFER_COMPLETE.into())
            }
            "renderbufferStorage" => done(self.renderbuffer_storage(host, args)),
            "getRenderbufferParameter" => self.renderbuffer_parameter(host, args),

            // Shaders
            "shaderSource" => {
                let shader = self.required_object(host, id, method, args.first(), ObjectClass::WebGLShader)?;
                let source = args.get(1).map(Value::to_string).unwrap_or_default();
                if let Some(state) = host.shader_mut(shader.id) {
                    state.source = source;
                }
                Ok(Value::Undefined)
            }
            "compileShader" => {
                let shader = self.required_object(host, id, method, args.first(), ObjectClass::WebGLShader)?;
                if let Some(state) = host.shader_mut(shader.id) {
                    state.compiled = !state.source.trim().is_empty();
                }
                Ok(Value::Undefined)
            }
            "getShaderParameter" => {
                let shader = self.required_object(host, id, method, args.first(), ObjectClass::WebGLShader)?;
                self.shader_parameter(host, shader, u(1))
            }
            "getShaderSource" => {
                let shader = self.required_object(host, id, method, args.first(), ObjectClass::WebGLShader)?;
                Ok(match host.gl_object(shader.id).map(|o| &o.kind) {
                    Some(GlObjectKind::Shader(state)) => state.source.as_str().into(),
                    _ => Value::Null,
                })
            }
            "getShaderInfoLog" | "getProgramInfoLog" => Ok("".into()),

            // Programs
            "attachShader" | "detachShader" => {
                let program = self.required_object(host, id, method, args.first(), ObjectClass::WebGLProgram)?;
                let shader = self.required_object(host, id, method, args.get(1), ObjectClass::WebGLShader)?;
                if method == "attachShader" {
                    return done(self.attach_shader(host, program, shader));
                }
                let Some(state) = host.program_mut(program.id) else {
                    return Err(Failure::Gl(gl::INVALID_OPERATION));
                };
                let before = state.shaders.len();
                state.shaders.retain(|s| *s != shader);
                ensure(state.shaders.len() < before, gl::INVALID_OPERATION)?;
                Ok(Value::Undefined)
            }
            "bindAttribLocation" => {
                let program = self.required_object(host, id, method, args.first(), ObjectClass::WebGLProgram)?;
                ensure((u(1) as usize) < MAX_VERTEX_ATTRIBS, gl::INVALID_VALUE)?;
                let name = args.get(2).map(Value::to_string).unwrap_or_default();
                if let Some(state) = host.program_mut(program.id) {
                    state.attribute_bindings.insert(name, u(1));
                }
                Ok(Value::Undefined)
            }
            "linkProgram" => {
                let program = self.required_object(host, id, method, args.first(), ObjectClass::WebGLProgram)?;
                done(self.link_program(host, program))
            }
            "validateProgram" => {
                self.required_object(host, id, method, args.first(), ObjectClass::WebGLProgram)?;
                Ok(Value::Undefined)
            }
            "getProgramParameter" => {
                let program = self.required_object(host, id, method, args.first(), ObjectClass::WebGLProgram)?;
                self.program_parameter(host, program, u(1))
            }
            "getActiveUniform" => {
                let program = self.required_object(host, id, method, args.first(), ObjectClass::WebGLProgram)?;
                self.active_uniform(host, program, u(1))
            }
            "getUniformLocation" => {
                let program = self.required_object(host, id, method, args.first(), ObjectClass::WebGLProgram)?;
                let name = args.get(1).map(Value::to_string).unwrap_or_default();
                self.uniform_location(host, id, program, &name)
            }
            "getAttribLocation" => {
                let program = self.required_object(host, id, method, args.first(), ObjectClass::WebGLProgram)?;
                let name = args.get(1).map(Value::to_string).unwrap_or_default();
                let location = host
                    .program(program.id)
                    .filter(|p| p.linked)
                    .ok_or(Failure::Gl(gl::INVALID_OPERATION))?
                    .attributes
                    .get(&name)
                    .map_or(-1.0, |l| *l as f64);
                Ok(Value::Number(location))
            }
            "getUniform" => self.get_uniform(host, id, args),

            // Vertex attributes
            "enableVertexAttribArray" | "disableVertexAttribArray" => {
                let enabled = method == "enableVertexAttribArray";
                self.attrib_mut(u(0))?.enabled = enabled;
                Ok(Value::Undefined)
            }
            "vertexAttribPointer" => done(self.vertex_attrib_pointer(args)),
            "getVertexAttrib" => self.get_vertex_attrib(u(0), u(1)),
            "getVertexAttribOffset" => {
                ensure(u(1) == gl::VERTEX_ATTRIB_ARRAY_POINTER, gl::INVALID_ENUM)?;
                Ok(self.attrib_mut(u(0))?.offset.into())
            }

            // Drawing
            "clear" => done(self.clear(host, u(0))),
            "drawArrays" => done(self.draw(u(0), int(args, 2), None)),
            "drawElements" => done(self.draw(u(0), int(args, 1), Some(u(2)))),
            "readPixels" => done(self.read_pixels(host, args)),
            "flush" | "finish" => Ok(Value::Undefined),

            _ => {
                if let Some(count) = method
                    .strip_prefix("vertexAttrib")
                    .and_then(|rest| rest.strip_suffix("fv").or_else(|| rest.strip_suffix('f')))
                    .and_then(|n| n.parse::<usize>().ok())
                    .filter(|n| (1..=4).contains(n))
                {
                    return done(self.vertex_attrib(method, count, args));
                }
                if let Some(setter) = uniform_setter(method) {
                    return done(self.set_uniform(host, id, method, setter, args));
                }
                Err(Failure::Host(HostError::UnknownMethod {
                    class: this.class,
                    method: method.to_string(),
                }))
            }
        }
    }
}

pub(super) fn invoke(
    host: &mut HeadlessHost,
    target: &HostObject,
    method: &str,
    args: &[Value],
) -> Result<Value, HostError> {
    let mut context = match host.nodes.remove(&target.id) {
        Some(Node::WebGL(context)) => context,
        other => {
            if let Some(node) = other {
                host.nodes.insert(target.id, node);
            }
            return Err(HostError::UnknownObject(target.id));
        }
    };
    let result = match context.call(host, target, method, args) {
        Ok(value) => Ok(value),
        Err(Failure::Gl(error)) => {
            tracing::trace!(method, error, "GL error raised");
            context.record_error(error);
            let returns_value = method.starts_with("get") || method.starts_with("create");
            Ok(if returns_value { Value::Null } else { Value::Undefined })
        }
        Err(Failure::Host(e)) => Err(e),
    };
    host.nodes.insert(target.id, Node::WebGL(context));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Host;

    fn setup() -> (HeadlessHost, HostObject) {
        let mut host = HeadlessHost::new();
        let context = host.create_webgl_context(4, 4);
        (host, context)
    }

    fn call(host: &mut HeadlessHost, context: &HostObject, method: &str, args: &[Value]) -> Value {
        host.invoke(context, method, args).unwrap()
    }

    fn error(host: &mut HeadlessHost, context: &HostObject) -> u32 {
        call(host, context, "getError", &[]).as_u32().unwrap()
    }

    const VERTEX: &str = "attribute vec4 position;\nuniform mat4 transform;\nvoid main() { gl_Position = transform * position; }";
    const FRAGMENT: &str = "precision mediump float;\nuniform vec3 tint; // color\nuniform sampler2D image, mask;\nvoid main() {}";

    fn linked_program(host: &mut HeadlessHost, context: &HostObject) -> Value {
        let program = call(host, context, "createProgram", &[]);
        for (ty, source) in [(gl::VERTEX_SHADER, VERTEX), (gl::FRAGMENT_SHADER, FRAGMENT)] {
            let shader = call(host, context, "createShader", &[ty.into()]);
            call(host, context, "shaderSource", &[shader.clone(), source.into()]);
            call(host, context, "compileShader", &[shader.clone()]);
            call(host, context, "attachShader", &[program.clone(), shader]);
        }
        call(host, context, "linkProgram", &[program.clone()]);
        program
    }

    #[test]
    fn test_defaults_and_parameter_copies() {
        let (mut host, context) = setup();
        assert_eq!(call(&mut host, &context, "isEnabled", &[gl::DITHER.into()]), Value::Bool(true));
        assert_eq!(call(&mut host, &context, "getParameter", &[gl::UNPACK_ALIGNMENT.into()]), Value::Number(4.0));

        let viewport = call(&mut host, &context, "getParameter", &[gl::VIEWPORT.into()]);
        assert_eq!(viewport.numbers(), Some(vec![0.0, 0.0, 4.0, 4.0]));
        if let Value::Typed(array) = &viewport {
            array.set(2, 99.0);
        }
        let again = call(&mut host, &context, "getParameter", &[gl::VIEWPORT.into()]);
        assert_eq!(again.numbers(), Some(vec![0.0, 0.0, 4.0, 4.0]));
    }

    #[test]
    fn test_errors_are_queued_once() {
        let (mut host, context) = setup();
        call(&mut host, &context, "enable", &[gl::TEXTURE_2D.into()]);
        call(&mut host, &context, "enable", &[gl::TEXTURE_2D.into()]);
        call(&mut host, &context, "lineWidth", &[0.into()]);
        assert_eq!(call(&mut host, &context, "getParameter", &[0x1234.into()]), Value::Null);

        assert_eq!(error(&mut host, &context), gl::INVALID_ENUM);
        assert_eq!(error(&mut host, &context), gl::INVALID_VALUE);
        assert_eq!(error(&mut host, &context), gl::NO_ERROR);
    }

    #[test]
    fn test_buffer_contents_follow_uploads() {
        let (mut host, context) = setup();
        let buffer = call(&mut host, &context, "createBuffer", &[]);
        call(&mut host, &context, "bufferData", &[gl::ARRAY_BUFFER.into(), 4.into(), gl::STATIC_DRAW.into()]);
        assert_eq!(error(&mut host, &context), gl::INVALID_OPERATION);

        call(&mut host, &context, "bindBuffer", &[gl::ARRAY_BUFFER.into(), buffer.clone()]);
        let data = Value::typed(TypedArrayKind::Uint16, [1.0, 258.0]);
        call(&mut host, &context, "bufferData", &[gl::ARRAY_BUFFER.into(), data, gl::DYNAMIC_DRAW.into()]);
        let sub = Value::typed(TypedArrayKind::Uint8, [7.0]);
        call(&mut host, &context, "bufferSubData", &[gl::ARRAY_BUFFER.into(), 1.into(), sub]);

        let object = buffer.as_object().unwrap();
        let expected: Vec<u8> = [1u16.to_ne_bytes(), 258u16.to_ne_bytes()].concat();
        let mut expected = expected;
        expected[1] = 7;
        assert_eq!(host.buffer_data(&object), Some(expected.as_slice()));
        assert_eq!(
            call(&mut host, &context, "getBufferParameter", &[gl::ARRAY_BUFFER.into(), gl::BUFFER_USAGE.into()]),
            Value::from(gl::DYNAMIC_DRAW)
        );
    }

    #[test]
    fn test_texture_bindings_are_per_unit() {
        let (mut host, context) = setup();
        let texture = call(&mut host, &context, "createTexture", &[]);
        call(&mut host, &context, "activeTexture", &[(gl::TEXTURE0 + 2).into()]);
        call(&mut host, &context, "bindTexture", &[gl::TEXTURE_2D.into(), texture.clone()]);
        assert_eq!(call(&mut host, &context, "getParameter", &[gl::TEXTURE_BINDING_2D.into()]), texture);

        call(&mut host, &context, "activeTexture", &[gl::TEXTURE0.into()]);
        assert_eq!(call(&mut host, &context, "getParameter", &[gl::TEXTURE_BINDING_2D.into()]), Value::Null);

        // A 2D texture cannot become a cube map.
        call(&mut host, &context, "bindTexture", &[gl::TEXTURE_CUBE_MAP.into(), texture]);
        assert_eq!(error(&mut host, &context), gl::INVALID_OPERATION);
    }

    #[test]
    fn test_tex_image_honours_flip_y() {
        let (mut host, context) = setup();
        let texture = call(&mut host, &context, "createTexture", &[]);
        call(&mut host, &context, "bindTexture", &[gl::TEXTURE_2D.into(), texture.clone()]);
        call(&mut host, &context, "pixelStorei", &[gl::UNPACK_ALIGNMENT.into(), 1.into()]);
        call(&mut host, &context, "pixelStorei", &[gl::UNPACK_FLIP_Y_WEBGL.into(), true.into()]);
        let pixels = Value::typed(TypedArrayKind::Uint8, [1.0, 2.0]);
        call(
            &mut host,
            &context,
            "texImage2D",
            &[
                gl::TEXTURE_2D.into(), 0.into(), gl::LUMINANCE.into(), 1.into(), 2.into(), 0.into(),
                gl::LUMINANCE.into(), gl::UNSIGNED_BYTE.into(), pixels,
            ],
        );
        assert_eq!(error(&mut host, &context), gl::NO_ERROR);
        let level = host.texture_level(&texture.as_object().unwrap(), gl::TEXTURE_2D, 0).unwrap();
        assert_eq!(level.data, vec![2, 1]);
    }

    #[test]
    fn test_tex_image_from_image_element() {
        let (mut host, context) = setup();
        let image = host.create_image("a.png", 2, 1, [200, 100, 50, 128]);
        let texture = call(&mut host, &context, "createTexture", &[]);
        call(&mut host, &context, "bindTexture", &[gl::TEXTURE_2D.into(), texture.clone()]);
        call(&mut host, &context, "pixelStorei", &[gl::UNPACK_PREMULTIPLY_ALPHA_WEBGL.into(), true.into()]);
        call(
            &mut host,
            &context,
            "texImage2D",
            &[gl::TEXTURE_2D.into(), 0.into(), gl::RGB.into(), gl::RGB.into(), gl::UNSIGNED_BYTE.into(), image.into()],
        );
        let level = host.texture_level(&texture.as_object().unwrap(), gl::TEXTURE_2D, 0).unwrap();
        assert_eq!((level.width, level.height), (2, 1));
        assert_eq!(level.data, vec![100, 50, 25, 100, 50, 25]);
    }

    #[test]
    fn test_clear_paints_canvas_within_scissor() {
        let (mut host, context) = setup();
        let canvas = host.get_property(&context, "canvas").unwrap().as_object().unwrap();
        call(&mut host, &context, "clearColor", &[1.into(), 0.into(), 0.into(), 1.into()]);
        call(&mut host, &context, "enable", &[gl::SCISSOR_TEST.into()]);
        call(&mut host, &context, "scissor", &[0.into(), 0.into(), 2.into(), 1.into()]);
        call(&mut host, &context, "clear", &[gl::COLOR_BUFFER_BIT.into()]);

        // GL row 0 is the bottom row of the canvas.
        assert_eq!(host.pixel(&canvas, 1, 3), Some([255, 0, 0, 255]));
        assert_eq!(host.pixel(&canvas, 2, 3), Some([0, 0, 0, 0]));
        assert_eq!(host.pixel(&canvas, 0, 0), Some([0, 0, 0, 0]));

        let pixels = Value::typed(TypedArrayKind::Uint8, [0.0; 4]);
        call(
            &mut host,
            &context,
            "readPixels",
            &[0.into(), 0.into(), 1.into(), 1.into(), gl::RGBA.into(), gl::UNSIGNED_BYTE.into(), pixels.clone()],
        );
        assert_eq!(pixels.numbers(), Some(vec![255.0, 0.0, 0.0, 255.0]));
    }

    #[test]
    fn test_program_reflection_and_uniforms() {
        let (mut host, context) = setup();
        let program = linked_program(&mut host, &context);
        assert_eq!(
            call(&mut host, &context, "getProgramParameter", &[program.clone(), gl::LINK_STATUS.into()]),
            Value::Bool(true)
        );
        assert_eq!(
            call(&mut host, &context, "getProgramParameter", &[program.clone(), gl::ACTIVE_UNIFORMS.into()]),
            Value::Number(4.0)
        );
        let info = call(&mut host, &context, "getActiveUniform", &[program.clone(), 1.into()]).as_object().unwrap();
        assert_eq!(host.get_property(&info, "name").unwrap(), Value::from("tint"));
        assert_eq!(host.get_property(&info, "type").unwrap(), Value::from(gl::FLOAT_VEC3));
        assert_eq!(
            call(&mut host, &context, "getAttribLocation", &[program.clone(), "position".into()]),
            Value::Number(0.0)
        );

        let tint = call(&mut host, &context, "getUniformLocation", &[program.clone(), "tint".into()]);
        let value = Value::typed(TypedArrayKind::Float32, [0.25, 0.5, 1.0]);
        call(&mut host, &context, "uniform3fv", &[tint.clone(), value.clone()]);
        assert_eq!(error(&mut host, &context), gl::INVALID_OPERATION);

        call(&mut host, &context, "useProgram", &[program.clone()]);
        call(&mut host, &context, "uniform3fv", &[tint.clone(), value.clone()]);
        call(&mut host, &context, "uniform1i", &[tint.clone(), 1.into()]);
        assert_eq!(error(&mut host, &context), gl::INVALID_OPERATION);
        assert_eq!(call(&mut host, &context, "getUniform", &[program, tint]), value);
    }

    #[test]
    fn test_oversized_uploads_and_reads_are_rejected() {
        let (mut host, context) = setup();
        let texture = call(&mut host, &context, "createTexture", &[]);
        call(&mut host, &context, "bindTexture", &[gl::TEXTURE_2D.into(), texture.clone()]);
        let upload = |width: f64, height: f64| -> Vec<Value> {
            vec![
                gl::TEXTURE_2D.into(),
                0.into(),
                gl::RGBA.into(),
                width.into(),
                height.into(),
                0.into(),
                gl::RGBA.into(),
                gl::UNSIGNED_BYTE.into(),
                Value::Null,
            ]
        };
        call(&mut host, &context, "texImage2D", &upload(70000.0, 70000.0));
        assert_eq!(error(&mut host, &context), gl::INVALID_VALUE);
        let object = texture.as_object().unwrap();
        assert!(host.texture_level(&object, gl::TEXTURE_2D, 0).is_none());

        call(&mut host, &context, "texImage2D", &upload(2.0, 2.0));
        assert_eq!(error(&mut host, &context), gl::NO_ERROR);
        assert_eq!(host.texture_level(&object, gl::TEXTURE_2D, 0).map(|level| level.data.len()), Some(16));

        let pixels = Value::typed(TypedArrayKind::Uint8, [0.0; 4]);
        let huge = f64::from(u32::MAX);
        call(
            &mut host,
            &context,
            "readPixels",
            &[0.into(), 0.into(), huge.into(), huge.into(), gl::RGBA.into(), gl::UNSIGNED_BYTE.into(), pixels],
        );
        assert_eq!(error(&mut host, &context), gl::INVALID_VALUE);
    }

    #[test]
    fn test_uniform_setter_names() {
        assert_eq!(
            uniform_setter("uniform3fv"),
            Some(UniformSetter { count: 3, matrix: false, vector: true, integer: false })
        );
        assert_eq!(
            uniform_setter("uniformMatrix3fv"),
            Some(UniformSetter { count: 9, matrix: true, vector: true, integer: false })
        );
        assert_eq!(uniform_setter("uniform5f"), None);
        assert_eq!(uniform_setter("uniformBlockBinding"), None);
    }

    #[test]
    fn test_vertex_attrib_pointer_needs_array_buffer() {
        let (mut host, context) = setup();
        let args = [0.into(), 3.into(), gl::FLOAT.into(), false.into(), 12.into(), 4.into()];
        call(&mut host, &context, "vertexAttribPointer", &args);
        assert_eq!(error(&mut host, &context), gl::INVALID_OPERATION);

        let buffer = call(&mut host, &context, "createBuffer", &[]);
        call(&mut host, &context, "bindBuffer", &[gl::ARRAY_BUFFER.into(), buffer.clone()]);
        call(&mut host, &context, "vertexAttribPointer", &args);
        let pname = gl::VERTEX_ATTRIB_ARRAY_BUFFER_BINDING;
        assert_eq!(call(&mut host, &context, "getVertexAttrib", &[0.into(), pname.into()]), buffer);
        assert_eq!(
            call(&mut host, &context, "getVertexAttribOffset", &[0.into(), gl::VERTEX_ATTRIB_ARRAY_POINTER.into()]),
            Value::Number(4.0)
        );

        call(&mut host, &context, "vertexAttrib2f", &[1.into(), 0.5.into(), 2.into()]);
        let current = call(&mut host, &context, "getVertexAttrib", &[1.into(), gl::CURRENT_VERTEX_ATTRIB.into()]);
        assert_eq!(current.numbers(), Some(vec![0.5, 2.0, 0.0, 1.0]));
    }

    #[test]
    fn test_extensions_are_stable_objects() {
        let (mut host, context) = setup();
        let first = call(&mut host, &context, "getExtension", &["oes_texture_float".into()]);
        let second = call(&mut host, &context, "getExtension", &["OES_texture_float".into()]);
        assert_eq!(first, second);
        assert_eq!(call(&mut host, &context, "getExtension", &["WEBGL_draw_buffers".into()]), Value::Null);
    }

    #[test]
    fn test_constants_read_as_properties() {
        let (host, context) = setup();
        assert_eq!(host.get_property(&context, "TEXTURE_2D").unwrap(), Value::from(gl::TEXTURE_2D));
        assert!(host.get_property(&context, "NOT_A_CONSTANT").is_err());
        assert_eq!(host.get_property(&context, "drawingBufferWidth").unwrap(), Value::Number(4.0));
    }

    #[test]
    fn test_declarations_parse_lists_and_arrays() {
        let found = declarations("uniform highp vec2 a, b[3];\nuniform float c; // uniform vec4 d;", "uniform");
        assert_eq!(
            found,
            vec![
                (gl::FLOAT_VEC2, "a".to_string(), 1),
                (gl::FLOAT_VEC2, "b".to_string(), 3),
                (gl::FLOAT, "c".to_string(), 1),
            ]
        );
    }
}
