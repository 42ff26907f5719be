//! Integration tests for the capture and replay pipeline
//!
//! Drives a headless host through the inspector facade the way an
//! application would, then checks the replay world object by object.

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use canvas_inspector_shared::constants as gl;
    use canvas_inspector_shared::{HostObject, ResourceId, TypedArrayKind, Value};

    use crate::config::InspectorConfig;
    use crate::error::InspectorError;
    use crate::headless::HeadlessHost;
    use crate::host::Host;
    use crate::inspector::CanvasInspector;
    use crate::replay::TraceLogPlayer;
    use crate::resource::Resource;

    // ============================================================================
    // Harness
    // ============================================================================

    fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }

    fn inspector() -> CanvasInspector<HeadlessHost> {
        init_logging();
        CanvasInspector::new(HeadlessHost::new(), 1, InspectorConfig::default())
    }

    /// Inspector with one wrapped 4x4 WebGL context.
    fn webgl() -> (CanvasInspector<HeadlessHost>, Value) {
        let mut inspector = inspector();
        let context = inspector.host_mut().create_webgl_context(4, 4);
        let proxy = inspector.wrap_webgl_context(context);
        (inspector, proxy)
    }

    fn call(inspector: &mut CanvasInspector<HeadlessHost>, receiver: &Value, method: &str, args: &[Value]) -> Value {
        inspector.call(receiver, method, args).unwrap()
    }

    /// Replays the latest trace log into a fresh replay world.
    fn replay_last(inspector: &mut CanvasInspector<HeadlessHost>) -> TraceLogPlayer {
        let log = Rc::clone(inspector.engine().manager().last_trace_log().unwrap());
        let mut player = TraceLogPlayer::new(log);
        player.replay(inspector.host_mut()).unwrap();
        player
    }

    /// Resource behind a proxy or a raw GL handle.
    fn resource(inspector: &CanvasInspector<HeadlessHost>, value: &Value) -> ResourceId {
        inspector.engine().registry().for_value(value).unwrap()
    }

    fn history(inspector: &CanvasInspector<HeadlessHost>, id: ResourceId) -> Vec<String> {
        inspector
            .engine()
            .registry()
            .get(id)
            .unwrap()
            .calls()
            .iter()
            .map(|call| call.function_name().to_string())
            .collect()
    }

    fn replayed(player: &TraceLogPlayer, id: ResourceId) -> HostObject {
        player
            .replay_world_resource(id)
            .and_then(Resource::wrapped_object)
            .unwrap()
    }

    fn canvas_of(host: &HeadlessHost, context: &HostObject) -> HostObject {
        host.get_property(context, "canvas").unwrap().as_object().unwrap()
    }

    // ============================================================================
    // WebGL
    // ============================================================================

    #[test]
    fn test_replay_restores_buffer_contents() {
        let (mut inspector, context) = webgl();
        let buffer = call(&mut inspector, &context, "createBuffer", &[]);
        let buffer_id = resource(&inspector, &buffer);
        call(&mut inspector, &context, "bindBuffer", &[gl::ARRAY_BUFFER.into(), buffer.clone()]);
        let data = Value::typed(TypedArrayKind::Float32, [1.0, 2.0, 3.0]);
        call(&mut inspector, &context, "bufferData", &[gl::ARRAY_BUFFER.into(), data, gl::STATIC_DRAW.into()]);
        call(&mut inspector, &context, "bindBuffer", &[gl::ARRAY_BUFFER.into(), Value::Null]);

        let id = inspector.start_capturing();
        call(&mut inspector, &context, "bindBuffer", &[gl::ARRAY_BUFFER.into(), buffer.clone()]);
        inspector.stop_capturing(&id);

        assert_eq!(history(&inspector, buffer_id), ["createBuffer", "bindBuffer", "bufferData"]);

        let live = inspector.engine().registry().wrapped_object(buffer_id);
        let context_id = resource(&inspector, &context);
        let player = replay_last(&mut inspector);
        let replayed_buffer = replayed(&player, buffer_id);
        let replayed_context = replayed(&player, context_id);
        assert_ne!(Some(replayed_buffer), live);
        let host = inspector.host_mut();
        assert_eq!(
            host.buffer_data(&replayed_buffer),
            Some(bytemuck::cast_slice::<f32, u8>(&[1.0, 2.0, 3.0]))
        );
        let binding = host
            .invoke(&replayed_context, "getParameter", &[gl::ARRAY_BUFFER_BINDING.into()])
            .unwrap();
        assert_eq!(binding, Value::Object(replayed_buffer));
    }

    #[test]
    fn test_replaying_a_buffer_keeps_the_live_binding() {
        let (mut inspector, context) = webgl();
        let mut buffers = Vec::new();
        for value in [1.0, 2.0] {
            let buffer = call(&mut inspector, &context, "createBuffer", &[]);
            call(&mut inspector, &context, "bindBuffer", &[gl::ARRAY_BUFFER.into(), buffer.clone()]);
            let data = Value::typed(TypedArrayKind::Float32, [value]);
            call(&mut inspector, &context, "bufferData", &[gl::ARRAY_BUFFER.into(), data, gl::STATIC_DRAW.into()]);
            buffers.push(buffer);
        }
        call(&mut inspector, &context, "bindBuffer", &[gl::ARRAY_BUFFER.into(), Value::Null]);
        let (first, second) = (buffers[0].clone(), buffers[1].clone());

        let id = inspector.start_capturing();
        call(&mut inspector, &context, "bindBuffer", &[gl::ARRAY_BUFFER.into(), second.clone()]);
        call(&mut inspector, &context, "isBuffer", &[first.clone()]);
        inspector.stop_capturing(&id);

        let (first_id, second_id) = (resource(&inspector, &first), resource(&inspector, &second));
        let context_id = resource(&inspector, &context);
        let player = replay_last(&mut inspector);
        let replayed_first = replayed(&player, first_id);
        let replayed_second = replayed(&player, second_id);
        let replayed_context = replayed(&player, context_id);
        let host = inspector.host_mut();
        assert_eq!(host.buffer_data(&replayed_first), Some(bytemuck::cast_slice::<f32, u8>(&[1.0])));
        let binding = host
            .invoke(&replayed_context, "getParameter", &[gl::ARRAY_BUFFER_BINDING.into()])
            .unwrap();
        assert_eq!(binding, Value::Object(replayed_second));
    }

    #[test]
    fn test_replay_restores_context_state_and_pixels() {
        let (mut inspector, context) = webgl();
        call(&mut inspector, &context, "clearColor", &[0.25.into(), 0.5.into(), 0.75.into(), 1.0.into()]);
        call(&mut inspector, &context, "enable", &[gl::BLEND.into()]);
        call(&mut inspector, &context, "viewport", &[1.into(), 1.into(), 2.into(), 2.into()]);

        let id = inspector.start_capturing();
        call(&mut inspector, &context, "clear", &[gl::COLOR_BUFFER_BIT.into()]);
        inspector.stop_capturing(&id);

        let context_id = resource(&inspector, &context);
        let live = inspector.engine().registry().wrapped_object(context_id).unwrap();
        let player = replay_last(&mut inspector);
        let replayed_context = replayed(&player, context_id);
        assert_ne!(replayed_context, live);

        let host = inspector.host_mut();
        let clear_color = host
            .invoke(&replayed_context, "getParameter", &[gl::COLOR_CLEAR_VALUE.into()])
            .unwrap();
        assert_eq!(clear_color.numbers(), Some(vec![0.25, 0.5, 0.75, 1.0]));
        let viewport = host
            .invoke(&replayed_context, "getParameter", &[gl::VIEWPORT.into()])
            .unwrap();
        assert_eq!(viewport.numbers(), Some(vec![1.0, 1.0, 2.0, 2.0]));
        assert_eq!(
            host.invoke(&replayed_context, "isEnabled", &[gl::BLEND.into()]).unwrap(),
            Value::Bool(true)
        );

        let canvas = canvas_of(host, &replayed_context);
        assert_ne!(canvas, canvas_of(host, &live));
        assert_eq!(host.pixel(&canvas, 0, 0), Some([64, 128, 191, 255]));
        assert_eq!(host.draw_count(&replayed_context), Some(1));
    }

    #[test]
    fn test_texture_history_records_pixel_store_changes_only() {
        let (mut inspector, context) = webgl();
        let texture = call(&mut inspector, &context, "createTexture", &[]);
        call(&mut inspector, &context, "bindTexture", &[gl::TEXTURE_2D.into(), texture.clone()]);
        let upload = |pixel: [f64; 4]| -> Vec<Value> {
            vec![
                gl::TEXTURE_2D.into(),
                0.into(),
                gl::RGBA.into(),
                1.into(),
                1.into(),
                0.into(),
                gl::RGBA.into(),
                gl::UNSIGNED_BYTE.into(),
                Value::typed(TypedArrayKind::Uint8, pixel),
            ]
        };
        call(&mut inspector, &context, "texImage2D", &upload([0.0, 0.0, 255.0, 255.0]));
        call(&mut inspector, &context, "pixelStorei", &[gl::UNPACK_FLIP_Y_WEBGL.into(), true.into()]);
        call(&mut inspector, &context, "texImage2D", &upload([0.0, 255.0, 0.0, 255.0]));
        call(&mut inspector, &context, "texImage2D", &upload([255.0, 0.0, 0.0, 255.0]));

        let texture_id = resource(&inspector, &texture);
        assert_eq!(
            history(&inspector, texture_id),
            ["createTexture", "bindTexture", "texImage2D", "pixelStorei", "texImage2D", "texImage2D"]
        );

        let id = inspector.start_capturing();
        call(&mut inspector, &context, "bindTexture", &[gl::TEXTURE_2D.into(), texture.clone()]);
        inspector.stop_capturing(&id);

        let player = replay_last(&mut inspector);
        let replayed_texture = replayed(&player, texture_id);
        let replayed_context = replayed(&player, resource(&inspector, &context));
        let host = inspector.host_mut();
        let level = host.texture_level(&replayed_texture, gl::TEXTURE_2D, 0).unwrap();
        assert_eq!((level.width, level.height), (1, 1));
        assert_eq!(level.data, [255, 0, 0, 255]);
        assert_eq!(
            host.invoke(&replayed_context, "getParameter", &[gl::UNPACK_FLIP_Y_WEBGL.into()])
                .unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_copy_tex_image_leaves_framebuffer_history_alone() {
        let (mut inspector, context) = webgl();
        let framebuffer = call(&mut inspector, &context, "createFramebuffer", &[]);
        call(&mut inspector, &context, "bindFramebuffer", &[gl::FRAMEBUFFER.into(), framebuffer.clone()]);
        let texture = call(&mut inspector, &context, "createTexture", &[]);
        call(&mut inspector, &context, "bindTexture", &[gl::TEXTURE_2D.into(), texture.clone()]);
        let args = [gl::TEXTURE_2D, 0, gl::RGBA, 0, 0, 1, 1, 0].map(Value::from);
        call(&mut inspector, &context, "copyTexImage2D", &args);

        let framebuffer_id = resource(&inspector, &framebuffer);
        assert_eq!(history(&inspector, framebuffer_id), ["createFramebuffer"]);
        assert_eq!(
            history(&inspector, resource(&inspector, &texture)),
            ["createTexture", "bindTexture", "bindFramebuffer", "copyTexImage2D"]
        );
    }

    #[test]
    fn test_replay_restores_program_uniforms() {
        const VERTEX: &str = "attribute vec4 position;\nvoid main() { gl_Position = position; }";
        const FRAGMENT: &str = "precision mediump float;\nuniform vec3 tint;\nvoid main() {}";

        let (mut inspector, context) = webgl();
        let program = call(&mut inspector, &context, "createProgram", &[]);
        for (ty, source) in [(gl::VERTEX_SHADER, VERTEX), (gl::FRAGMENT_SHADER, FRAGMENT)] {
            let shader = call(&mut inspector, &context, "createShader", &[ty.into()]);
            call(&mut inspector, &context, "shaderSource", &[shader.clone(), source.into()]);
            call(&mut inspector, &context, "compileShader", &[shader.clone()]);
            call(&mut inspector, &context, "attachShader", &[program.clone(), shader]);
        }
        call(&mut inspector, &context, "linkProgram", &[program.clone()]);
        call(&mut inspector, &context, "useProgram", &[program.clone()]);
        let tint = call(&mut inspector, &context, "getUniformLocation", &[program.clone(), "tint".into()]);
        call(&mut inspector, &context, "uniform3f", &[tint, 0.25.into(), 0.5.into(), 1.0.into()]);
        call(&mut inspector, &context, "useProgram", &[Value::Null]);

        let id = inspector.start_capturing();
        call(&mut inspector, &context, "useProgram", &[program.clone()]);
        inspector.stop_capturing(&id);

        let program_id = resource(&inspector, &program);
        let context_id = resource(&inspector, &context);
        let player = replay_last(&mut inspector);
        let replayed_program = Value::Object(replayed(&player, program_id));
        let replayed_context = replayed(&player, context_id);
        let host = inspector.host_mut();
        assert_eq!(
            host.invoke(&replayed_context, "getParameter", &[gl::CURRENT_PROGRAM.into()]).unwrap(),
            replayed_program
        );
        let location = host
            .invoke(&replayed_context, "getUniformLocation", &[replayed_program.clone(), "tint".into()])
            .unwrap();
        let value = host
            .invoke(&replayed_context, "getUniform", &[replayed_program, location])
            .unwrap();
        assert_eq!(value.numbers(), Some(vec![0.25, 0.5, 1.0]));
    }

    #[test]
    fn test_get_error_reports_errors_consumed_by_capture() {
        let (mut inspector, context) = webgl();
        call(&mut inspector, &context, "enable", &[gl::TEXTURE_2D.into()]);
        call(&mut inspector, &context, "lineWidth", &[0.into()]);

        let id = inspector.start_capturing();
        call(&mut inspector, &context, "clear", &[gl::COLOR_BUFFER_BIT.into()]);
        inspector.stop_capturing(&id);

        assert_eq!(call(&mut inspector, &context, "getError", &[]), Value::from(gl::INVALID_ENUM));
        assert_eq!(call(&mut inspector, &context, "getError", &[]), Value::from(gl::INVALID_VALUE));
        assert_eq!(call(&mut inspector, &context, "getError", &[]), Value::from(gl::NO_ERROR));
    }

    // ============================================================================
    // Canvas 2D
    // ============================================================================

    #[test]
    fn test_canvas2d_replay_starts_from_captured_bitmap() {
        let mut inspector = inspector();
        let context = inspector.host_mut().create_canvas2d_context(4, 4);
        let proxy = inspector.wrap_canvas2d_context(context);
        inspector.set(&proxy, "fillStyle", "#ff0000".into()).unwrap();
        call(&mut inspector, &proxy, "fillRect", &[0.into(), 0.into(), 4.into(), 4.into()]);
        inspector.set(&proxy, "fillStyle", "#00ff00".into()).unwrap();

        let id = inspector.start_capturing();
        call(&mut inspector, &proxy, "fillRect", &[0.into(), 0.into(), 2.into(), 2.into()]);
        inspector.stop_capturing(&id);

        let state = inspector.replay_trace_log(&id, 0).unwrap();
        assert!(state.image_url.starts_with("data:image/png;base64,"));
        assert_eq!(state.trace_log_id, id);
        assert_eq!(
            state.id,
            format!(r#"{{"injectedScriptId":1,"resourceId":{}}}"#, proxy.as_resource().unwrap().0)
        );

        let player = replay_last(&mut inspector);
        let replayed_context = replayed(&player, resource(&inspector, &proxy));
        let host = inspector.host();
        let canvas = canvas_of(host, &replayed_context);
        assert_eq!(host.pixel(&canvas, 0, 0), Some([0, 255, 0, 255]));
        assert_eq!(host.pixel(&canvas, 1, 1), Some([0, 255, 0, 255]));
        assert_eq!(host.pixel(&canvas, 3, 3), Some([255, 0, 0, 255]));
        assert_eq!(
            host.get_property(&replayed_context, "fillStyle").unwrap(),
            Value::from("#00ff00")
        );
    }

    #[test]
    fn test_canvas2d_log_is_compacted_while_not_capturing() {
        let mut inspector = inspector();
        let context = inspector.host_mut().create_canvas2d_context(4, 4);
        let proxy = inspector.wrap_canvas2d_context(context);
        let id = resource(&inspector, &proxy);

        call(&mut inspector, &proxy, "save", &[]);
        call(&mut inspector, &proxy, "translate", &[10.into(), 10.into()]);
        call(&mut inspector, &proxy, "restore", &[]);
        assert!(history(&inspector, id).is_empty());

        for _ in 0..1000 {
            call(&mut inspector, &proxy, "clearRect", &[0.into(), 0.into(), 4.into(), 4.into()]);
            call(&mut inspector, &proxy, "fillRect", &[0.into(), 0.into(), 2.into(), 2.into()]);
        }
        assert!(history(&inspector, id).is_empty());

        call(&mut inspector, &proxy, "save", &[]);
        call(&mut inspector, &proxy, "translate", &[1.into(), 1.into()]);
        call(&mut inspector, &proxy, "fillRect", &[0.into(), 0.into(), 1.into(), 1.into()]);
        call(&mut inspector, &proxy, "fillRect", &[1.into(), 1.into(), 1.into(), 1.into()]);
        call(&mut inspector, &proxy, "restore", &[]);
        assert_eq!(history(&inspector, id), ["save", "translate", "fillRect", "restore"]);
    }

    // ============================================================================
    // Facade
    // ============================================================================

    #[test]
    fn test_capture_frame_stops_at_first_nonempty_frame() {
        let (mut inspector, context) = webgl();
        let id = inspector.capture_frame();
        inspector.mark_frame_end();
        assert!(inspector.engine().manager().capturing());

        call(&mut inspector, &context, "clear", &[gl::COLOR_BUFFER_BIT.into()]);
        inspector.mark_frame_end();
        assert!(!inspector.engine().manager().capturing());
        call(&mut inspector, &context, "clear", &[gl::COLOR_BUFFER_BIT.into()]);

        let view = inspector.trace_log(&id, None, None).unwrap();
        assert_eq!(view.total_available_calls, 1);
        assert!(!view.alive);
        assert!(view.calls[0].is_frame_end_call);
    }

    #[test]
    fn test_trace_log_view_json() {
        let (mut inspector, context) = webgl();
        let id = inspector.start_capturing();
        call(&mut inspector, &context, "clear", &[gl::COLOR_BUFFER_BIT.into()]);
        call(&mut inspector, &context, "lineWidth", &[2.into()]);

        let view = inspector.trace_log(&id, Some(1), Some(5)).unwrap();
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["id"], serde_json::json!(id));
        assert_eq!(json["alive"], serde_json::json!(true));
        assert_eq!(json["startOffset"], serde_json::json!(1));
        assert_eq!(json["totalAvailableCalls"], serde_json::json!(2));
        assert_eq!(json["calls"].as_array().map(Vec::len), Some(1));
        assert_eq!(json["calls"][0]["functionName"], serde_json::json!("lineWidth"));
        assert_eq!(json["calls"][0]["isFrameEndCall"], serde_json::json!(true));

        let first = inspector.trace_log(&id, None, Some(1)).unwrap();
        let json = serde_json::to_value(&first).unwrap();
        assert_eq!(json["calls"][0]["functionName"], serde_json::json!("clear"));
        assert_eq!(json["calls"][0]["isDrawingCall"], serde_json::json!(true));
        let context_id = format!(r#"{{"injectedScriptId":1,"resourceId":{}}}"#, context.as_resource().unwrap().0);
        assert_eq!(json["calls"][0]["contextId"], serde_json::json!(context_id));
    }

    #[test]
    fn test_resource_state_lookup_errors() {
        let (mut inspector, context) = webgl();
        let id = inspector.start_capturing();
        call(&mut inspector, &context, "clear", &[gl::COLOR_BUFFER_BIT.into()]);
        inspector.stop_capturing(&id);

        let ResourceId(context_id) = context.as_resource().unwrap();
        let resource = format!(r#"{{"injectedScriptId":1,"resourceId":{context_id}}}"#);
        assert_eq!(
            inspector.resource_state(&id, &resource),
            Err(InspectorError::ReplayNotStarted)
        );

        inspector.replay_trace_log(&id, 0).unwrap();
        assert_eq!(
            inspector.resource_state(&id, "garbage"),
            Err(InspectorError::WrongResourceId("garbage".to_string()))
        );
        let foreign = format!(r#"{{"injectedScriptId":2,"resourceId":{context_id}}}"#);
        assert_eq!(
            inspector.resource_state(&id, &foreign),
            Err(InspectorError::InjectedScriptMismatch)
        );
        assert_eq!(
            inspector.resource_state(&id, r#"{"injectedScriptId":1,"resourceId":999}"#),
            Err(InspectorError::ResourceNotReplayed)
        );

        let state = inspector.resource_state(&id, &resource).unwrap();
        assert!(state.image_url.starts_with("data:image/png;base64,"));
        assert_eq!(
            inspector.resource_info(&resource).unwrap().description,
            "WebGLRenderingContext@1"
        );

        inspector.drop_trace_log(&id);
        assert_eq!(
            inspector.replay_trace_log(&id, 0).unwrap_err().to_string(),
            "Error: Trace log with the given ID not found."
        );
    }
}
