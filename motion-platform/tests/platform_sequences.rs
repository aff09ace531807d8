//! Command ordering and unit conversion through the full platform stack,
//! driven over scripted links.

use approx::assert_relative_eq;
use motion_platform::link::LinkEvent;
use motion_platform::{
    JogRequest, MotionPlatform, PlatformConfig, PlatformError, RegisterCapabilities,
    RegisterDrive, ScriptedLink, VarcomDrive,
};

type TestPlatform = MotionPlatform<ScriptedLink, ScriptedLink>;

/// Replies for construction: OPMODE on X and Y, then VLIM on X and Y.
fn queue_startup(xy: &ScriptedLink) {
    xy.queue_silence(4);
    xy.queue_silence(1);
    xy.queue_reply("VLIM\r\n2500<01>\r\n-->");
    xy.queue_silence(1);
    xy.queue_reply("VLIM\r\n2000<02>\r\n-->");
}

fn build(xy: &ScriptedLink, z: &ScriptedLink, capabilities: RegisterCapabilities) -> TestPlatform {
    let config = PlatformConfig {
        z_capabilities: capabilities,
        ..Default::default()
    };
    let platform = MotionPlatform::from_drives(
        VarcomDrive::new(xy.clone()),
        RegisterDrive::new(z.clone(), config.z_station, capabilities),
        &config,
    )
    .unwrap();
    xy.clear_events();
    z.clear_events();
    platform
}

fn platform() -> (TestPlatform, ScriptedLink, ScriptedLink) {
    let xy = ScriptedLink::new();
    let z = ScriptedLink::new();
    queue_startup(&xy);
    let platform = build(&xy, &z, RegisterCapabilities::default());
    (platform, xy, z)
}

#[test]
fn test_startup_selects_mode_and_reads_speed_limits() {
    let xy = ScriptedLink::new();
    let z = ScriptedLink::new();
    queue_startup(&xy);

    let config = PlatformConfig::default();
    let platform = MotionPlatform::from_drives(
        VarcomDrive::new(xy.clone()),
        RegisterDrive::new(z.clone(), config.z_station, config.z_capabilities),
        &config,
    )
    .unwrap();

    assert_eq!(
        xy.sent_lines(),
        vec![
            "\\1\r\n", "OPMODE 8\r\n", "\\2\r\n", "OPMODE 8\r\n", "\\1\r\n", "VLIM\r\n",
            "\\2\r\n", "VLIM\r\n",
        ]
    );
    assert!(z.sent_lines().is_empty());
    assert_relative_eq!(platform.max_speed_x(), 2500.0);
    assert_relative_eq!(platform.max_speed_y(), 2000.0);
    assert_eq!(platform.position_z(), None);
}

#[test]
fn test_silent_speed_limit_falls_back_to_config() {
    let xy = ScriptedLink::new();
    let z = ScriptedLink::new();
    let platform = build(&xy, &z, RegisterCapabilities::default());

    assert_relative_eq!(platform.max_speed_x(), 2500.0);
    assert_relative_eq!(platform.max_speed_y(), 2000.0);
}

#[test]
fn test_enable_issues_every_step_in_order() {
    // One link for both transports so the relative order is observable.
    let shared = ScriptedLink::new();
    queue_startup(&shared);
    let mut platform = build(&shared, &shared, RegisterCapabilities::default());

    platform.enable().unwrap();

    assert_eq!(
        shared.sent_lines(),
        vec![
            "\\1\r\n",
            "CLEARFAULTS\r\n",
            "\\2\r\n",
            "CLEARFAULTS\r\n",
            "\\1\r\n",
            "EN\r\n",
            "\\2\r\n",
            "EN\r\n",
            ":010620110001C7\r\n",
            ":010620110000C8\r\n",
            ":0106201E0006B5\r\n",
            ":010620110000C8\r\n",
        ]
    );
}

#[test]
fn test_is_enabled_requires_both_servo_axes() {
    let (mut platform, xy, z) = platform();

    xy.queue_silence(1);
    xy.queue_reply("ACTIVE\r\n1<01>\r\n");
    xy.queue_silence(1);
    xy.queue_reply("ACTIVE\r\n1<02>\r\n");
    assert!(platform.is_enabled().unwrap());

    xy.queue_silence(1);
    xy.queue_reply("ACTIVE\r\n1<01>\r\n");
    xy.queue_silence(1);
    xy.queue_reply("ACTIVE\r\n0<02>\r\n");
    assert!(!platform.is_enabled().unwrap());

    // No reply is "unknown", never "enabled"
    assert!(!platform.is_enabled().unwrap());

    // Ready query disabled by default
    assert!(z.sent_lines().is_empty());
}

#[test]
fn test_is_enabled_checks_z_ready_when_supported() {
    let xy = ScriptedLink::new();
    let z = ScriptedLink::new();
    queue_startup(&xy);
    let mut platform = build(
        &xy,
        &z,
        RegisterCapabilities {
            ready_query: true,
            ..Default::default()
        },
    );

    xy.queue_silence(1);
    xy.queue_reply("1<01>\r\n");
    xy.queue_silence(1);
    xy.queue_reply("1<02>\r\n");
    z.queue_reply(":0103020000FA\r\n");
    assert!(!platform.is_enabled().unwrap());

    xy.queue_silence(1);
    xy.queue_reply("1<01>\r\n");
    xy.queue_silence(1);
    xy.queue_reply("1<02>\r\n");
    z.queue_reply(":010302000EEC\r\n");
    assert!(platform.is_enabled().unwrap());
}

#[test]
fn test_home_xy_backs_off_before_homing() {
    let (mut platform, xy, _z) = platform();

    platform.home_xy().unwrap();

    assert_eq!(
        xy.sent_lines(),
        vec![
            "\\1\r\n",
            "MOVEINC 5000 10\r\n",
            "\\2\r\n",
            "MOVEINC 5000 10\r\n",
            "\\1\r\n",
            "HOMECMD\r\n",
            "\\2\r\n",
            "HOMECMD\r\n",
        ]
    );
}

#[test]
fn test_home_z_resets_cached_position() {
    let (mut platform, _xy, z) = platform();

    platform.move_absolute_z(40.0, 20.0).unwrap();
    assert_relative_eq!(platform.position_z().unwrap(), 40.0);

    z.clear_events();
    platform.home_z().unwrap();
    assert_eq!(z.sent_lines(), vec![":0106201E0003B8\r\n"]);
    assert_relative_eq!(platform.position_z().unwrap(), 0.0);
}

#[test]
fn test_xy_moves_convert_to_counts() {
    let (mut platform, xy, _z) = platform();

    platform.move_increment_x(1.0, 25.0).unwrap();
    platform.move_absolute_y(-0.5, 12.5).unwrap();
    platform.move_absolute_x(250.0009, 100.0).unwrap();
    platform.move_increment_y(-3.25, 2000.0).unwrap();

    assert_eq!(
        xy.sent_lines(),
        vec![
            "\\1\r\n",
            "MOVEINC 1000 25\r\n",
            "\\2\r\n",
            "MOVEABS -500 12.5\r\n",
            "\\1\r\n",
            "MOVEABS 250000 100\r\n",
            "\\2\r\n",
            "MOVEINC -3250 2000\r\n",
        ]
    );
}

#[test]
fn test_move_absolute_z_frames() {
    let (mut platform, _xy, z) = platform();

    platform.move_absolute_z(12.345, 50.0).unwrap();

    assert_eq!(
        z.sent_lines(),
        vec![
            ":01062014003293\r\n",
            ":01102002000204000004D2F1\r\n",
            ":0106201E0001BA\r\n",
        ]
    );
    assert_relative_eq!(platform.position_z().unwrap(), 12.34);
}

#[test]
fn test_move_absolute_z_speed_limits() {
    let (mut platform, _xy, z) = platform();

    let err = platform.move_absolute_z(10.0, 150.0).unwrap_err();
    assert!(matches!(err, PlatformError::SpeedOutOfRange(s) if s == 150.0));
    assert!(platform.move_absolute_z(10.0, -0.1).is_err());
    assert!(z.sent_lines().is_empty());

    platform.move_absolute_z(10.0, 0.0).unwrap();
    platform.move_absolute_z(10.0, 100.0).unwrap();
    assert_eq!(z.sent_lines().len(), 6);
}

#[test]
fn test_negative_z_target_clamps_to_zero() {
    let (mut platform, _xy, z) = platform();

    platform.move_absolute_z(-4.0, 10.0).unwrap();
    assert_eq!(z.sent_lines()[1], ":0110200200020400000000C7\r\n");
    assert_relative_eq!(platform.position_z().unwrap(), 0.0);
}

#[test]
fn test_move_completion_xy() {
    let (mut platform, xy, _z) = platform();

    xy.queue_silence(1);
    xy.queue_reply("STOPPED\r\n2<01>\r\n");
    assert!(platform.is_move_completed_x().unwrap());

    xy.queue_silence(1);
    xy.queue_reply("STOPPED\r\n1<02>\r\n");
    assert!(platform.is_move_completed_y().unwrap());

    xy.queue_silence(1);
    xy.queue_reply("STOPPED\r\n0<02>\r\n");
    assert!(!platform.is_move_completed_y().unwrap());
}

#[test]
fn test_slow_reply_is_discarded_by_next_exchange() {
    let (mut platform, xy, _z) = platform();

    // Drive says nothing within the timeout
    assert!(!platform.is_move_completed_x().unwrap());

    // Its late answer is sitting in the buffer when the next query starts
    xy.inject_stale("STOPPED\r\n2<01>\r\n");
    xy.clear_events();
    xy.queue_silence(1);
    xy.queue_reply("STOPPED\r\n0<01>\r\n");
    assert!(!platform.is_move_completed_x().unwrap());

    let events = xy.events();
    assert_eq!(
        events[0],
        LinkEvent::Discarded(b"STOPPED\r\n2<01>\r\n".to_vec())
    );
    assert_eq!(events[1], LinkEvent::Sent("\\1\r\n".to_string()));
}

#[test]
fn test_move_completion_z() {
    let (mut platform, _xy, z) = platform();

    z.queue_reply(":0103020000FA\r\n");
    assert!(platform.is_move_completed_z().unwrap());
    assert_eq!(z.sent_lines(), vec![":010310000001EB\r\n"]);

    z.queue_reply(":0103020005F5\r\n");
    assert!(!platform.is_move_completed_z().unwrap());
}

#[test]
fn test_move_completion_z_without_status_query() {
    let xy = ScriptedLink::new();
    let z = ScriptedLink::new();
    queue_startup(&xy);
    let mut platform = build(
        &xy,
        &z,
        RegisterCapabilities {
            status_query: false,
            ..Default::default()
        },
    );

    assert!(!platform.is_move_completed_z().unwrap());
    assert!(z.sent_lines().is_empty());
}

#[test]
fn test_jog_scales_speed_by_axis_limit() {
    let (mut platform, xy, _z) = platform();

    platform
        .jog(
            motion_platform::Axis::X,
            JogRequest {
                distance_mm: 2.0,
                speed_percent: 50.0,
            },
        )
        .unwrap();
    platform
        .jog(
            motion_platform::Axis::Y,
            JogRequest {
                distance_mm: -0.1,
                speed_percent: 10.0,
            },
        )
        .unwrap();

    assert_eq!(
        xy.sent_lines(),
        vec!["\\1\r\n", "MOVEINC 2000 1250\r\n", "\\2\r\n", "MOVEINC -100 200\r\n"]
    );
}

#[test]
fn test_jog_z_is_relative_to_cached_position() {
    let (mut platform, _xy, z) = platform();

    platform.move_absolute_z(10.0, 50.0).unwrap();
    z.clear_events();

    platform
        .jog(
            motion_platform::Axis::Z,
            JogRequest {
                distance_mm: 2.5,
                speed_percent: 100.0,
            },
        )
        .unwrap();

    assert_eq!(
        z.sent_lines(),
        vec![
            ":01062014006461\r\n",
            ":01102002000204000004E2E1\r\n",
            ":0106201E0001BA\r\n",
        ]
    );
    assert_relative_eq!(platform.position_z().unwrap(), 12.5);

    platform
        .jog(
            motion_platform::Axis::Z,
            JogRequest {
                distance_mm: -50.0,
                speed_percent: 100.0,
            },
        )
        .unwrap();
    assert_relative_eq!(platform.position_z().unwrap(), 0.0);
}

#[test]
fn test_jog_rejects_bad_percentage_before_sending() {
    let (mut platform, xy, z) = platform();

    let request = JogRequest {
        distance_mm: 1.0,
        speed_percent: 120.0,
    };
    assert!(platform.jog(motion_platform::Axis::X, request).is_err());
    assert!(platform.jog(motion_platform::Axis::Z, request).is_err());
    assert!(xy.sent_lines().is_empty());
    assert!(z.sent_lines().is_empty());
}

#[test]
fn test_jog_z_before_home_sends_nothing() {
    let (mut platform, _xy, z) = platform();

    platform
        .jog(
            motion_platform::Axis::Z,
            JogRequest {
                distance_mm: 10.0,
                speed_percent: 50.0,
            },
        )
        .unwrap();

    assert!(z.sent_lines().is_empty());
    assert_eq!(platform.position_z(), None);

    platform.home_z().unwrap();
    z.clear_events();
    platform
        .jog(
            motion_platform::Axis::Z,
            JogRequest {
                distance_mm: 10.0,
                speed_percent: 50.0,
            },
        )
        .unwrap();
    assert_eq!(z.sent_lines()[1], ":01102002000204000003E8DC\r\n");
    assert_relative_eq!(platform.position_z().unwrap(), 10.0);
}
