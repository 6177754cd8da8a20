// End-to-end service scenarios with a scripted transport

use std::sync::{Arc, Mutex};
use std::time::Duration;

use keyglow::config::Configuration;
use keyglow::context::Context;
use keyglow::device_watcher::Description;
use keyglow::effect::EffectRegistry;
use keyglow::render::RenderTarget;
use keyglow::service::{Service, SessionEvent};
use keyglow::transport::{DeviceError, Transport};

const KEY_COUNT: usize = 16;

/// Transport double recording every flushed frame.
struct RecordingTransport {
    serial: String,
    frames: Arc<Mutex<Vec<RenderTarget>>>,
}

impl Transport for RecordingTransport {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn name(&self) -> &str {
        "Test Keyboard"
    }

    fn key_count(&self) -> usize {
        KEY_COUNT
    }

    fn flush(&mut self, frame: &RenderTarget) -> Result<(), DeviceError> {
        self.frames.lock().unwrap().push(frame.clone());
        Ok(())
    }
}

fn description(dev_node: &str, sys_path: &str) -> Description {
    Description {
        dev_node: dev_node.to_string(),
        sys_path: sys_path.to_string(),
        event_devices: vec![format!("{dev_node}-kbd")],
    }
}

/// Service whose opener accepts /dev/x* nodes and records flushed frames.
fn service_with_frames(config: &str) -> (Service, Arc<Mutex<Vec<RenderTarget>>>) {
    let frames: Arc<Mutex<Vec<RenderTarget>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = frames.clone();
    let service = Service::new(
        Configuration::from_toml(config).unwrap(),
        EffectRegistry::with_builtins(),
    )
    .with_transport_opener(Box::new(move |description: &Description| {
        if description.dev_node.starts_with("/dev/x") {
            Ok(Box::new(RecordingTransport {
                serial: format!("serial-{}", description.sys_path),
                frames: sink.clone(),
            }) as Box<dyn Transport>)
        } else {
            Err(DeviceError::NotSupported("wrong report descriptor".into()))
        }
    }));
    (service, frames)
}

fn last_frame(frames: &Arc<Mutex<Vec<RenderTarget>>>) -> RenderTarget {
    frames.lock().unwrap().last().expect("no frame flushed").clone()
}

#[test]
fn hotplug_lifecycle_with_auto_quit() {
    let (mut service, _frames) = service_with_frames(
        r#"
        [[device]]
        [[device.effect]]
        name = "feedback"
        "#,
    );
    service.set_auto_quit(true);
    let mut sessions = service.subscribe_sessions();

    // Watcher reports an add for /dev/x1: session created, serial recorded.
    service.device_added(&description("/dev/x1", "/sys/devices/x1"));
    assert_eq!(service.devices().len(), 1);
    assert_eq!(service.devices()[0].serial(), "serial-/sys/devices/x1");
    assert_eq!(
        sessions.try_recv().unwrap(),
        SessionEvent::DeviceAdded {
            serial: "serial-/sys/devices/x1".to_string(),
            name: "Test Keyboard".to_string(),
        }
    );

    // A device of the wrong kind never creates a session.
    service.device_added(&description("/dev/other", "/sys/devices/other"));
    assert_eq!(service.devices().len(), 1);

    // Remove for /dev/x1: session destroyed, removal announced, auto-quit.
    service.device_removed(&description("/dev/x1", "/sys/devices/x1"));
    assert!(service.devices().is_empty());
    assert_eq!(
        sessions.try_recv().unwrap(),
        SessionEvent::DeviceRemoved {
            serial: "serial-/sys/devices/x1".to_string(),
        }
    );
    assert!(service.should_quit());
}

#[test]
fn configured_feedback_times_drive_the_fade() {
    let (mut service, frames) = service_with_frames(
        r#"
        [[device]]
        [[device.effect]]
        name = "feedback"
        sustain = "100ms"
        decay = "50ms"
        "#,
    );
    service.device_added(&description("/dev/x1", "/sys/devices/x1"));

    // Press Esc at t=0.
    service.handle_key_event("/dev/x1-kbd", 1, true);
    let device = &mut service.devices_mut()[0];

    // t=100ms: still at full opacity.
    device.render(Duration::from_millis(100)).unwrap();
    assert_eq!(last_frame(&frames)[0].a, 255);

    // t=125ms: halfway through the decay.
    device.render(Duration::from_millis(25)).unwrap();
    let half = last_frame(&frames)[0].a;
    assert!((126..=128).contains(&half), "alpha was {half}");

    // t=150ms: fully faded; the next frame no longer tracks the key.
    device.render(Duration::from_millis(25)).unwrap();
    assert_eq!(last_frame(&frames)[0].a, 0);
}

#[test]
fn key_events_route_only_to_the_owning_device() {
    let (mut service, frames) = service_with_frames(
        r#"
        [[device]]
        [[device.effect]]
        name = "feedback"
        "#,
    );
    service.device_added(&description("/dev/x1", "/sys/devices/x1"));
    service.device_added(&description("/dev/x2", "/sys/devices/x2"));

    // Press on the second device's input node only.
    service.handle_key_event("/dev/x2-kbd", 1, true);

    service.devices_mut()[0]
        .render(Duration::from_millis(10))
        .unwrap();
    let first = last_frame(&frames);
    assert_eq!(first[0].a, 0, "first device saw a foreign key event");

    service.devices_mut()[1]
        .render(Duration::from_millis(10))
        .unwrap();
    let second = last_frame(&frames);
    assert_eq!(second[0].a, 255);
}

#[test]
fn reconfiguration_rebuilds_stacks_on_live_sessions() {
    let (mut service, frames) = service_with_frames(
        r#"
        [[device]]
        [[device.effect]]
        name = "feedback"
        "#,
    );
    service.device_added(&description("/dev/x1", "/sys/devices/x1"));
    assert_eq!(service.devices()[0].effect_count(), 1);

    service.set_configuration(
        Configuration::from_toml(
            r#"
            [[device]]
            [[device.effect]]
            name = "fill"
            color = "#336699"
            "#,
        )
        .unwrap(),
    );
    assert_eq!(service.devices()[0].effect_count(), 1);

    service.devices_mut()[0]
        .render(Duration::from_millis(16))
        .unwrap();
    let frame = last_frame(&frames);
    assert_eq!(frame[5].r, 0x33);
    assert_eq!(frame[5].g, 0x66);
    assert_eq!(frame[5].b, 0x99);
}

#[test]
fn context_selects_rules_per_application() {
    let (mut service, frames) = service_with_frames(
        r#"
        [[device]]
        [[device.effect]]
        name = "feedback"

        [[device]]
        [device.context]
        window = "game*"
        [[device.effect]]
        name = "fill"
        color = "red"
        "#,
    );
    service.device_added(&description("/dev/x1", "/sys/devices/x1"));
    assert_eq!(service.devices()[0].effect_count(), 1);

    // The display reports a focus change to a matching window class.
    let mut focus = Context::new();
    focus.set("window", "game: doom");
    service.handle_generic_event(&focus);
    assert_eq!(service.devices()[0].effect_count(), 2);

    service.devices_mut()[0]
        .render(Duration::from_millis(16))
        .unwrap();
    assert_eq!(last_frame(&frames)[3].r, 255);

    // Focus moves away; the extra rule stops matching.
    let mut focus = Context::new();
    focus.set("window", "terminal");
    service.handle_generic_event(&focus);
    assert_eq!(service.devices()[0].effect_count(), 1);
}
