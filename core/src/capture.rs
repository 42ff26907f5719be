//! Surface capture as PNG `data:` URLs.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use canvas_inspector_shared::{ResourceId, Value};

use crate::host::{Host, HostError};
use crate::resource::ResourceRegistry;

/// Encodes tightly packed RGBA8 pixels as `data:image/png;base64,...`.
pub fn encode_data_url(pixels: &[u8], width: u32, height: u32) -> Result<String, HostError> {
    let mut bytes = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut bytes, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder
            .write_header()
            .map_err(|e| HostError::Encoding(e.to_string()))?;
        writer
            .write_image_data(pixels)
            .map_err(|e| HostError::Encoding(e.to_string()))?;
    }
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(bytes)))
}

/// Canvas contents of a context resource, or `None` for other resources.
pub fn resource_data_url(
    host: &mut dyn Host,
    registry: &ResourceRegistry,
    id: ResourceId,
) -> Result<Option<String>, HostError> {
    let Some(resource) = registry.get(id) else {
        return Ok(None);
    };
    if !resource.kind().is_context() {
        return Ok(None);
    }
    let context = resource.wrapped_object().ok_or(HostError::Unbound(id))?;
    match host.get_property(&context, "canvas")? {
        Value::Object(canvas) => host.to_data_url(&canvas).map(Some),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_data_url_has_png_signature() {
        let url = encode_data_url(&[255, 0, 0, 255], 1, 1).unwrap();
        let payload = url.strip_prefix("data:image/png;base64,").unwrap();
        let bytes = STANDARD.decode(payload).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn test_encode_rejects_short_pixel_data() {
        assert!(matches!(
            encode_data_url(&[0, 0, 0], 1, 1),
            Err(HostError::Encoding(_))
        ));
    }
}
