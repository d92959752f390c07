use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};

use super::*;
use crate::anc::{AncKind, PacketDecoder};
use crate::config::{InputSourceSetting, SourceSettings};
use crate::device::sim::{SimulatedDevice, SimulatedDeviceManager};
use crate::device::Channel;
use crate::error::{CapabilityField, Ntv2SrcError};
use crate::events::{EventBus, SrcEvent};
use crate::format::VideoFormat;

const TIMEOUT: Duration = Duration::from_secs(5);

fn sim_device(format: VideoFormat) -> Arc<SimulatedDevice> {
    Arc::new(
        SimulatedDevice::with_default_capabilities()
            .with_serial("SIM0001")
            .with_signal(Some(format.hardware_format())),
    )
}

fn build_source(device: &Arc<SimulatedDevice>, settings: SourceSettings) -> Ntv2Source {
    let manager = Arc::new(SimulatedDeviceManager::new());
    manager.register(Arc::clone(device));

    Ntv2SourceBuilder::new()
        .settings(settings)
        .device_manager(manager)
        .event_bus(Arc::new(EventBus::new(4096)))
        .decoder(Arc::new(PacketDecoder::new()))
        .build()
        .unwrap()
}

fn sd_settings(queue_size: u32) -> SourceSettings {
    SourceSettings {
        video_format: VideoFormat::Sd625i5000,
        queue_size,
        ..Default::default()
    }
}

fn drain(rx: &mut broadcast::Receiver<SrcEvent>) -> Vec<SrcEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    events
}

fn state_changes(events: &[SrcEvent]) -> Vec<(LifecycleState, LifecycleState)> {
    events
        .iter()
        .filter_map(|event| match event {
            SrcEvent::StateChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[test]
fn test_state_steps() {
    use LifecycleState::*;

    assert_eq!(Closed.towards(Playing), Some(Opened));
    assert_eq!(Configured.towards(Playing), Some(Playing));
    assert_eq!(Playing.towards(Closed), Some(Configured));
    assert_eq!(Opened.towards(Closed), Some(Closed));
    assert_eq!(Opened.towards(Opened), None);
    assert_eq!(Configured.to_string(), "configured");
}

#[test]
fn test_full_lifecycle_walk() {
    use LifecycleState::*;

    let device = sim_device(VideoFormat::Sd625i5000);
    let source = build_source(&device, sd_settings(4));
    let mut rx = source.subscribe();

    source.set_state(Playing).unwrap();
    assert_eq!(source.state(), Playing);
    assert!(device.is_multi_format());

    let frame = source.next_frame().unwrap();
    assert_eq!(frame.duration, 40_000_000);
    assert_eq!(frame.info.width, 720);
    assert_eq!(frame.info.height, 576);

    source.set_state(Closed).unwrap();
    assert_eq!(source.state(), Closed);
    assert!(source.queue.is_empty());

    let events = drain(&mut rx);
    assert_eq!(
        state_changes(&events),
        vec![
            (Closed, Opened),
            (Opened, Configured),
            (Configured, Playing),
            (Playing, Configured),
            (Configured, Opened),
            (Opened, Closed),
        ]
    );
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, SrcEvent::LatencyChanged { .. }))
            .count(),
        1
    );

    let state = device.channel_state(Channel(0));
    assert!(!state.circulating);
    assert!(!state.interrupt_enabled);
}

#[test]
fn test_open_unknown_device() {
    let device = sim_device(VideoFormat::Sd625i5000);
    let settings = SourceSettings {
        device_identifier: "7".to_string(),
        ..sd_settings(4)
    };
    let source = build_source(&device, settings);

    assert!(matches!(source.open(), Err(Ntv2SrcError::Device(_))));
    assert_eq!(source.state(), LifecycleState::Closed);
}

#[test]
fn test_open_by_serial_and_not_ready() {
    let device = sim_device(VideoFormat::Sd625i5000);
    let settings = SourceSettings {
        device_identifier: "SIM0001".to_string(),
        ..sd_settings(4)
    };
    let source = build_source(&device, settings);

    device.set_ready(false);
    assert!(matches!(source.open(), Err(Ntv2SrcError::Device(_))));
    assert_eq!(source.state(), LifecycleState::Closed);

    device.set_ready(true);
    source.open().unwrap();
    assert_eq!(source.state(), LifecycleState::Opened);
}

#[test]
fn test_start_failure_stays_opened() {
    let device = sim_device(VideoFormat::Sd625i5000);
    let settings = SourceSettings {
        video_format: VideoFormat::Uhd4320p5000,
        ..sd_settings(4)
    };
    let source = build_source(&device, settings);
    source.open().unwrap();

    let err = source.start().unwrap_err();
    assert!(matches!(
        err,
        Ntv2SrcError::UnsupportedCapability {
            field: CapabilityField::VideoFormat,
            ..
        }
    ));
    assert_eq!(source.state(), LifecycleState::Opened);
    assert!(matches!(source.device_config(), Err(Ntv2SrcError::NotConfigured)));
    assert_eq!(source.latency(), None);
    assert!(!device.channel_state(Channel(0)).enabled);

    // Fixing the settings makes the next start succeed
    source.update_settings(sd_settings(4)).unwrap();
    source.start().unwrap();
    assert_eq!(source.state(), LifecycleState::Configured);
    source.stop().unwrap();
}

#[test]
fn test_settings_locked_while_configured() {
    let device = sim_device(VideoFormat::Sd625i5000);
    let source = build_source(&device, sd_settings(4));

    let invalid = SourceSettings {
        queue_size: 0,
        ..sd_settings(4)
    };
    assert!(matches!(
        source.update_settings(invalid),
        Err(Ntv2SrcError::Config(_))
    ));

    source.set_state(LifecycleState::Configured).unwrap();
    assert!(matches!(
        source.update_settings(sd_settings(8)),
        Err(Ntv2SrcError::InvalidState { .. })
    ));
    assert_eq!(source.settings().queue_size, 4);

    source.stop().unwrap();
    source.update_settings(sd_settings(8)).unwrap();
    assert_eq!(source.settings().queue_size, 8);
}

#[test]
fn test_invalid_transitions() {
    let device = sim_device(VideoFormat::Sd625i5000);
    let source = build_source(&device, sd_settings(4));

    assert!(matches!(source.play(), Err(Ntv2SrcError::InvalidState { .. })));
    assert!(matches!(source.stop(), Err(Ntv2SrcError::InvalidState { .. })));
    source.open().unwrap();
    assert!(matches!(source.open(), Err(Ntv2SrcError::InvalidState { .. })));
    assert!(matches!(source.pause(), Err(Ntv2SrcError::InvalidState { .. })));
    assert_eq!(source.state(), LifecycleState::Opened);
}

#[test]
fn test_builder_requires_device_manager() {
    let result = Ntv2SourceBuilder::new().settings(sd_settings(4)).build();
    assert!(matches!(result, Err(Ntv2SrcError::InvalidSetting { .. })));
}

#[test]
fn test_latency_reported_on_start() {
    let device = sim_device(VideoFormat::Hd1080i5994);
    let settings = SourceSettings {
        video_format: VideoFormat::Hd1080i5994,
        queue_size: 4,
        ..Default::default()
    };
    let source = build_source(&device, settings);
    let mut rx = source.subscribe();

    assert_eq!(source.latency(), None);
    source.set_state(LifecycleState::Configured).unwrap();

    let latency = source.latency().unwrap();
    assert_eq!(latency.min, 100_100_000);
    assert_eq!(latency.max, 400_400_000);

    let reported = drain(&mut rx).into_iter().find_map(|event| match event {
        SrcEvent::LatencyChanged { min, max } => Some(Latency { min, max }),
        _ => None,
    });
    assert_eq!(reported, Some(latency));

    source.stop().unwrap();
    assert_eq!(source.latency(), None);
}

#[test]
fn test_next_frame_requires_configuration() {
    let device = sim_device(VideoFormat::Sd625i5000);
    let source = build_source(&device, sd_settings(4));

    assert_eq!(source.next_frame().unwrap_err(), FlowError::NotNegotiated);
    source.open().unwrap();
    assert_eq!(source.next_frame().unwrap_err(), FlowError::NotNegotiated);
}

#[test]
fn test_unlock_releases_blocked_consumer() {
    let device = sim_device(VideoFormat::Sd625i5000);
    let source = Arc::new(build_source(&device, sd_settings(4)));
    source.set_state(LifecycleState::Configured).unwrap();

    // Configured but not playing: nothing arrives until unlock
    let consumer = thread::spawn({
        let source = Arc::clone(&source);
        move || source.next_frame().map(|frame| frame.pts)
    });
    thread::sleep(Duration::from_millis(30));
    source.unlock();
    assert_eq!(consumer.join().unwrap(), Err(FlowError::Flushing));
    assert_eq!(source.next_frame().unwrap_err(), FlowError::Flushing);

    source.unlock_stop();
    source.play().unwrap();
    assert!(source.next_frame().is_ok());
    source.stop().unwrap();
}

#[test]
fn test_stop_releases_blocked_consumer() {
    let device = sim_device(VideoFormat::Sd625i5000);
    let source = Arc::new(build_source(&device, sd_settings(4)));
    source.set_state(LifecycleState::Configured).unwrap();

    let consumer = thread::spawn({
        let source = Arc::clone(&source);
        move || source.next_frame().map(|frame| frame.pts)
    });
    thread::sleep(Duration::from_millis(30));
    source.stop().unwrap();

    assert_eq!(consumer.join().unwrap(), Err(FlowError::Flushing));
    assert_eq!(source.next_frame().unwrap_err(), FlowError::NotNegotiated);
}

#[test]
fn test_frames_carry_timecode_audio_and_captions() {
    let device = sim_device(VideoFormat::Sd625i5000);
    device.set_captions(Some(vec![0x96, 0x69, 0x10]));
    let source = build_source(&device, sd_settings(4));
    source.set_state(LifecycleState::Playing).unwrap();

    let config = source.device_config().unwrap();
    let frame = source.next_frame().unwrap();

    assert_eq!(frame.video.len(), config.video_buffer_size());
    let mut stamp = [0u8; 8];
    stamp.copy_from_slice(&frame.video[..8]);
    assert!(u64::from_le_bytes(stamp) >= 1);

    assert_eq!(frame.audio.channels, 16);
    assert_eq!(frame.audio.sample_rate, 48_000);
    assert_eq!(frame.audio.buffer.len(), 1920 * 16 * 4);

    let timecode = frame.timecode.unwrap();
    assert_eq!((timecode.fps_n, timecode.fps_d), (25, 1));
    assert!(timecode.interlaced);
    assert!(!timecode.drop_frame);

    assert_eq!(frame.captions, Some(vec![0x96, 0x69, 0x10]));
    assert_eq!(frame.ancillary[0].kind, AncKind::Cea708);
    assert_eq!(frame.ancillary[0].line, None);

    drop(frame);
    source.stop().unwrap();
    assert!(source.stats().frames_delivered >= 1);
}

#[test]
fn test_tall_vanc_frames_are_trimmed_to_picture() {
    let format = VideoFormat::Hd720p5000;
    let device = sim_device(format);
    device.set_captions(Some(vec![0x42]));
    let settings = SourceSettings {
        video_format: format,
        input_source: InputSourceSetting::Sdi1,
        queue_size: 4,
        ..Default::default()
    };
    let source = build_source(&device, settings);
    source.set_state(LifecycleState::Playing).unwrap();

    let layout = source.device_config().unwrap().raster_layout();
    assert!(layout.vanc_lines > 0);
    let frame = source.next_frame().unwrap();

    let (offset, size) = layout.visible_region();
    assert_eq!(frame.video.region(), (offset, size));
    assert_eq!(frame.video.len(), layout.line_stride * 720);

    // The picture starts with the frame number the device stamped
    let mut stamp = [0u8; 8];
    stamp.copy_from_slice(&frame.video[..8]);
    assert!(u64::from_le_bytes(stamp) >= 1);

    assert_eq!(frame.captions, Some(vec![0x42]));
    assert_eq!(frame.ancillary[0].line, Some(1));

    drop(frame);
    source.stop().unwrap();
}

#[test]
fn test_running_time_continues_across_pause() {
    let device = sim_device(VideoFormat::Sd625i5000);
    let source = build_source(&device, sd_settings(2));
    source.set_state(LifecycleState::Playing).unwrap();
    let channel = source.device_config().unwrap().channel;

    thread::sleep(Duration::from_millis(20));
    source.pause().unwrap();
    assert!(wait_until(|| !device.channel_state(channel).circulating));

    let mut last_pts = 0;
    while !source.queue.is_empty() {
        last_pts = source.next_frame().unwrap().pts;
    }

    thread::sleep(Duration::from_millis(200));
    source.play().unwrap();
    let resumed = source.next_frame().unwrap().pts;

    assert!(resumed + 50_000_000 > last_pts);
    assert!(resumed < last_pts + 100_000_000);
    source.stop().unwrap();
}

#[test]
fn test_drop_in_any_state() {
    for target in [
        LifecycleState::Closed,
        LifecycleState::Opened,
        LifecycleState::Configured,
        LifecycleState::Playing,
    ] {
        let device = sim_device(VideoFormat::Sd625i5000);
        let source = build_source(&device, sd_settings(4));
        source.set_state(target).unwrap();
        if target == LifecycleState::Playing {
            assert!(wait_until(|| !source.queue.is_empty()));
        }

        drop(source);
        let state = device.channel_state(Channel(0));
        assert!(!state.circulating);
        assert!(!state.vertical_subscribed);
    }
}

#[test]
fn test_restart_after_stop() {
    let device = sim_device(VideoFormat::Sd625i5000);
    let source = build_source(&device, sd_settings(4));

    for _ in 0..2 {
        source.set_state(LifecycleState::Playing).unwrap();
        assert!(source.next_frame().is_ok());
        source.set_state(LifecycleState::Opened).unwrap();
    }

    assert_eq!(device.channel_state(Channel(0)).sessions, 2);
    assert_eq!(source.stats().sessions_started, 2);
}
