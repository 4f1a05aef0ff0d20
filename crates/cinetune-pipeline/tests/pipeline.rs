//! End-to-end pipeline behavior over scripted media backends.

mod support;

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use cinetune_core::{ControlCommand, Notification};
use cinetune_pipeline::PipelineConfig;

use support::{
    collect_for, file_info, interleaved_packets, scripted_pipeline, wait_for, FRAME_INTERVAL_US,
};

fn test_config() -> PipelineConfig {
    PipelineConfig {
        progress_interval: Duration::from_millis(50),
        ..PipelineConfig::default()
    }
}

#[test]
fn open_publishes_file_info_and_bounds_reads() {
    let frames = 200;
    let pipeline = scripted_pipeline(
        file_info(frames as i64 * FRAME_INTERVAL_US, true, true),
        interleaved_packets(frames, true, true),
        0.1,
        test_config(),
    );
    let mut rx = pipeline.player.subscribe();
    pipeline
        .player
        .send_command(ControlCommand::OpenFile {
            path: "scripted://avfile".into(),
        })
        .expect("send open");

    let opened = wait_for(&mut rx, Duration::from_secs(2), |n| {
        matches!(n, Notification::FileOpened { .. })
    })
    .expect("file opened");
    match opened {
        Notification::FileOpened { info } => {
            assert!(info.has_audio && info.has_video);
            assert_eq!(info.duration_us, Some(frames as i64 * FRAME_INTERVAL_US));
        }
        other => panic!("unexpected notification: {other:?}"),
    }

    // Playback never started, so demuxing must stall once both streams hit
    // their packet targets plus the frame pools, far short of the script.
    std::thread::sleep(Duration::from_millis(400));
    let reads = pipeline.reads.load(Ordering::SeqCst);
    assert!(reads < 80, "demuxer read {reads} packets while paused");
    assert!(reads >= 16, "demuxer never prefetched ({reads} reads)");

    pipeline.player.shutdown();
}

#[test]
fn close_right_after_open_completes_cleanly() {
    let pipeline = scripted_pipeline(
        file_info(1_000_000, true, true),
        interleaved_packets(10, true, true),
        0.1,
        test_config(),
    );
    let mut rx = pipeline.player.subscribe();
    pipeline
        .player
        .send_command(ControlCommand::OpenFile {
            path: "scripted://avfile".into(),
        })
        .expect("send open");
    // The close lands while the streams are still opening; it must be
    // deferred and executed afterwards, not dropped.
    pipeline
        .player
        .send_command(ControlCommand::CloseFile)
        .expect("send close");

    wait_for(&mut rx, Duration::from_secs(2), |n| {
        matches!(n, Notification::FileOpened { .. })
    })
    .expect("file opened before the deferred close");
    wait_for(&mut rx, Duration::from_secs(2), |n| {
        matches!(n, Notification::FileClosed)
    })
    .expect("deferred close ran");

    pipeline.player.shutdown();
}

#[test]
fn commands_without_a_file_are_ignored() {
    let pipeline = scripted_pipeline(
        file_info(1_000_000, true, true),
        interleaved_packets(10, true, true),
        0.1,
        test_config(),
    );
    let mut rx = pipeline.player.subscribe();
    for command in [
        ControlCommand::CloseFile,
        ControlCommand::SeekAbsolute {
            position_us: 500_000,
        },
        ControlCommand::SeekRelative { delta_us: -100_000 },
    ] {
        pipeline.player.send_command(command).expect("send");
    }

    let noise = collect_for(&mut rx, Duration::from_millis(300), |n| {
        matches!(
            n,
            Notification::Error { .. } | Notification::FileOpenFailed { .. }
        )
    });
    assert!(noise.is_empty(), "idle commands raised: {noise:?}");

    // The pipeline is still healthy afterwards.
    pipeline
        .player
        .send_command(ControlCommand::OpenFile {
            path: "scripted://avfile".into(),
        })
        .expect("send open");
    wait_for(&mut rx, Duration::from_secs(2), |n| {
        matches!(n, Notification::FileOpened { .. })
    })
    .expect("open still works");

    pipeline.player.shutdown();
}

#[test]
fn video_only_files_report_and_self_clock() {
    let frames = 30;
    let pipeline = scripted_pipeline(
        file_info(frames as i64 * FRAME_INTERVAL_US, false, true),
        interleaved_packets(frames, false, true),
        0.1,
        test_config(),
    );
    let mut rx = pipeline.player.subscribe();
    pipeline
        .player
        .send_command(ControlCommand::OpenFile {
            path: "scripted://vfile".into(),
        })
        .expect("send open");

    wait_for(&mut rx, Duration::from_secs(2), |n| {
        matches!(n, Notification::NoAudioStream)
    })
    .expect("missing audio reported");
    wait_for(&mut rx, Duration::from_secs(2), |n| {
        matches!(n, Notification::FileOpened { .. })
    })
    .expect("file opened");

    pipeline
        .player
        .send_command(ControlCommand::Play)
        .expect("send play");
    std::thread::sleep(Duration::from_millis(800));

    let shown = pipeline.video_sink.shown();
    assert!(shown.len() >= 4, "only {} frames shown", shown.len());
    assert!(
        shown.windows(2).all(|w| w[0].0 < w[1].0),
        "frame PTS not increasing: {shown:?}"
    );
    // Self-clocked pacing: the frames did not all come out at once.
    let span = shown[shown.len() - 1].1.duration_since(shown[0].1);
    assert!(span >= Duration::from_millis(200), "frames shown in a burst");

    wait_for(&mut rx, Duration::from_secs(2), |n| {
        matches!(n, Notification::CurrentTime { .. })
    })
    .expect("video progress drives the position");

    pipeline.player.shutdown();
}

#[test]
fn audio_led_playback_paces_video_and_time() {
    let frames = 30;
    let pipeline = scripted_pipeline(
        file_info(frames as i64 * FRAME_INTERVAL_US, true, true),
        interleaved_packets(frames, true, true),
        0.1,
        test_config(),
    );
    let mut rx = pipeline.player.subscribe();
    pipeline
        .player
        .send_command(ControlCommand::OpenFile {
            path: "scripted://avfile".into(),
        })
        .expect("send open");
    wait_for(&mut rx, Duration::from_secs(2), |n| {
        matches!(n, Notification::FileOpened { .. })
    })
    .expect("file opened");

    pipeline
        .player
        .send_command(ControlCommand::Play)
        .expect("send play");
    std::thread::sleep(Duration::from_millis(900));

    let shown = pipeline.video_sink.shown();
    assert!(shown.len() >= 4, "only {} frames shown", shown.len());
    assert!(
        shown.windows(2).all(|w| w[0].0 < w[1].0),
        "frame PTS not increasing: {shown:?}"
    );
    let span = shown[shown.len() - 1].1.duration_since(shown[0].1);
    assert!(span >= Duration::from_millis(200), "frames shown in a burst");

    let times: Vec<i64> = collect_for(&mut rx, Duration::from_millis(400), |n| {
        matches!(n, Notification::CurrentTime { .. })
    })
    .into_iter()
    .filter_map(|n| match n {
        Notification::CurrentTime { position_us } => Some(position_us),
        _ => None,
    })
    .collect();
    assert!(times.len() >= 2, "too few time reports: {times:?}");
    assert!(
        times.windows(2).all(|w| w[0] <= w[1]),
        "position went backwards: {times:?}"
    );
    assert!(*times.last().unwrap() > 0);

    pipeline.player.shutdown();
}

#[test]
fn displayed_frames_track_the_audio_clock() {
    let frames = 40;
    let pipeline = scripted_pipeline(
        file_info(frames as i64 * FRAME_INTERVAL_US, true, true),
        interleaved_packets(frames, true, true),
        0.1,
        test_config(),
    );
    let mut rx = pipeline.player.subscribe();
    pipeline
        .player
        .send_command(ControlCommand::OpenFile {
            path: "scripted://avfile".into(),
        })
        .expect("send open");
    wait_for(&mut rx, Duration::from_secs(2), |n| {
        matches!(n, Notification::FileOpened { .. })
    })
    .expect("file opened");
    pipeline
        .player
        .send_command(ControlCommand::Play)
        .expect("send play");

    // Sample the pair (latest displayed PTS, audible device position)
    // while both run. The device position is the live presentation time,
    // so the latest displayed frame may lag it by at most one frame
    // interval, plus scheduling slack.
    let slack_us = 50_000;
    let deadline = Instant::now() + Duration::from_millis(1_500);
    let mut samples = Vec::new();
    while Instant::now() < deadline {
        let played_us = pipeline.audio_sink.played_us();
        if let Some((pts_us, _)) = pipeline.video_sink.shown().last().copied() {
            if played_us > 0 {
                samples.push((pts_us, played_us));
            }
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(samples.len() >= 10, "too few sync samples: {samples:?}");
    for (pts_us, played_us) in &samples {
        let drift = (pts_us - played_us).abs();
        assert!(
            drift <= FRAME_INTERVAL_US + slack_us,
            "video drifted {drift}us from the audio clock \
             (displayed {pts_us}, audible {played_us})"
        );
    }

    pipeline.player.shutdown();
}

#[test]
fn seek_landing_during_close_dies_with_the_file() {
    let frames = 50;
    let pipeline = scripted_pipeline(
        file_info(frames as i64 * FRAME_INTERVAL_US, true, true),
        interleaved_packets(frames, true, true),
        0.1,
        test_config(),
    );
    let mut rx = pipeline.player.subscribe();
    pipeline
        .player
        .send_command(ControlCommand::OpenFile {
            path: "scripted://avfile".into(),
        })
        .expect("send open");
    wait_for(&mut rx, Duration::from_secs(2), |n| {
        matches!(n, Notification::FileOpened { .. })
    })
    .expect("file opened");

    // The seek reaches the demuxer while the close is still settling; it
    // is deferred, replayed after the close and then dropped with no file
    // open any more.
    pipeline
        .player
        .send_command(ControlCommand::CloseFile)
        .expect("send close");
    pipeline
        .player
        .send_command(ControlCommand::SeekAbsolute {
            position_us: 3_000_000,
        })
        .expect("send seek");
    wait_for(&mut rx, Duration::from_secs(2), |n| {
        matches!(n, Notification::FileClosed)
    })
    .expect("close completed");

    let noise = collect_for(&mut rx, Duration::from_millis(300), |n| {
        matches!(
            n,
            Notification::Error { .. }
                | Notification::FileOpenFailed { .. }
                | Notification::CurrentTime { .. }
        )
    });
    assert!(noise.is_empty(), "dead seek leaked events: {noise:?}");

    // Reopening starts from zero; the dead seek target must not resurface.
    pipeline
        .player
        .send_command(ControlCommand::OpenFile {
            path: "scripted://avfile".into(),
        })
        .expect("send open");
    wait_for(&mut rx, Duration::from_secs(2), |n| {
        matches!(n, Notification::FileOpened { .. })
    })
    .expect("reopen works");
    pipeline
        .player
        .send_command(ControlCommand::Play)
        .expect("send play");
    let first_time = wait_for(&mut rx, Duration::from_secs(2), |n| {
        matches!(n, Notification::CurrentTime { .. })
    })
    .expect("playback reports time after reopen");
    match first_time {
        Notification::CurrentTime { position_us } => {
            assert!(
                position_us < 1_000_000,
                "position started at {position_us} after the dead seek"
            );
        }
        other => panic!("unexpected notification: {other:?}"),
    }

    pipeline.player.shutdown();
}

#[test]
fn end_of_stream_is_reported_after_both_streams_drain() {
    let frames = 8;
    let pipeline = scripted_pipeline(
        file_info(frames as i64 * FRAME_INTERVAL_US, true, true),
        interleaved_packets(frames, true, true),
        0.1,
        test_config(),
    );
    let mut rx = pipeline.player.subscribe();
    pipeline
        .player
        .send_command(ControlCommand::OpenFile {
            path: "scripted://avfile".into(),
        })
        .expect("send open");
    wait_for(&mut rx, Duration::from_secs(2), |n| {
        matches!(n, Notification::FileOpened { .. })
    })
    .expect("file opened");
    pipeline
        .player
        .send_command(ControlCommand::Play)
        .expect("send play");

    wait_for(&mut rx, Duration::from_secs(6), |n| {
        matches!(n, Notification::EndOfStream)
    })
    .expect("end of stream after drain");

    pipeline.player.shutdown();
}

#[test]
fn pause_and_resume_keep_time_monotone() {
    let frames = 40;
    let pipeline = scripted_pipeline(
        file_info(frames as i64 * FRAME_INTERVAL_US, true, true),
        interleaved_packets(frames, true, true),
        0.1,
        test_config(),
    );
    let mut rx = pipeline.player.subscribe();
    pipeline
        .player
        .send_command(ControlCommand::OpenFile {
            path: "scripted://avfile".into(),
        })
        .expect("send open");
    wait_for(&mut rx, Duration::from_secs(2), |n| {
        matches!(n, Notification::FileOpened { .. })
    })
    .expect("file opened");

    let mut times: Vec<i64> = Vec::new();
    for _ in 0..3 {
        pipeline
            .player
            .send_command(ControlCommand::Play)
            .expect("send play");
        times.extend(
            collect_for(&mut rx, Duration::from_millis(250), |n| {
                matches!(n, Notification::CurrentTime { .. })
            })
            .into_iter()
            .filter_map(|n| match n {
                Notification::CurrentTime { position_us } => Some(position_us),
                _ => None,
            }),
        );
        pipeline
            .player
            .send_command(ControlCommand::Pause)
            .expect("send pause");
        std::thread::sleep(Duration::from_millis(150));
    }

    assert!(times.len() >= 3, "too few time reports: {times:?}");
    assert!(
        times.windows(2).all(|w| w[0] <= w[1]),
        "position went backwards across pause cycles: {times:?}"
    );
    assert!(pipeline.audio_sink.written_us() > 0, "no audio reached the device");

    pipeline.player.shutdown();
}

#[test]
fn seek_jumps_the_reported_position() {
    let frames = 50;
    let pipeline = scripted_pipeline(
        file_info(frames as i64 * FRAME_INTERVAL_US, true, true),
        interleaved_packets(frames, true, true),
        0.1,
        test_config(),
    );
    let mut rx = pipeline.player.subscribe();
    pipeline
        .player
        .send_command(ControlCommand::OpenFile {
            path: "scripted://avfile".into(),
        })
        .expect("send open");
    wait_for(&mut rx, Duration::from_secs(2), |n| {
        matches!(n, Notification::FileOpened { .. })
    })
    .expect("file opened");
    pipeline
        .player
        .send_command(ControlCommand::Play)
        .expect("send play");
    std::thread::sleep(Duration::from_millis(300));

    pipeline
        .player
        .send_command(ControlCommand::SeekAbsolute {
            position_us: 3_000_000,
        })
        .expect("send seek");

    wait_for(&mut rx, Duration::from_secs(3), |n| {
        matches!(n, Notification::CurrentTime { position_us } if *position_us >= 2_800_000)
    })
    .expect("position jumped to the seek target");

    pipeline.player.shutdown();
}

#[test]
fn back_to_back_seeks_do_not_stall_playback() {
    let frames = 50;
    let pipeline = scripted_pipeline(
        file_info(frames as i64 * FRAME_INTERVAL_US, true, true),
        interleaved_packets(frames, true, true),
        0.1,
        test_config(),
    );
    let mut rx = pipeline.player.subscribe();
    pipeline
        .player
        .send_command(ControlCommand::OpenFile {
            path: "scripted://avfile".into(),
        })
        .expect("send open");
    wait_for(&mut rx, Duration::from_secs(2), |n| {
        matches!(n, Notification::FileOpened { .. })
    })
    .expect("file opened");
    pipeline
        .player
        .send_command(ControlCommand::Play)
        .expect("send play");

    // Two flushes race each other through the pipeline; exactly one
    // resynchronization must come out the other side.
    pipeline
        .player
        .send_command(ControlCommand::SeekAbsolute {
            position_us: 2_000_000,
        })
        .expect("send seek");
    pipeline
        .player
        .send_command(ControlCommand::SeekAbsolute {
            position_us: 4_000_000,
        })
        .expect("send seek");

    wait_for(&mut rx, Duration::from_secs(4), |n| {
        matches!(n, Notification::CurrentTime { position_us } if *position_us >= 3_800_000)
    })
    .expect("playback resumed past the second seek target");

    pipeline.player.shutdown();
}

#[test]
fn deinterlace_route_keeps_frames_flowing() {
    let frames = 20;
    let pipeline = scripted_pipeline(
        file_info(frames as i64 * FRAME_INTERVAL_US, false, true),
        interleaved_packets(frames, false, true),
        0.1,
        test_config(),
    );
    let mut rx = pipeline.player.subscribe();
    pipeline
        .player
        .send_command(ControlCommand::OpenFile {
            path: "scripted://vfile".into(),
        })
        .expect("send open");
    wait_for(&mut rx, Duration::from_secs(2), |n| {
        matches!(n, Notification::FileOpened { .. })
    })
    .expect("file opened");

    pipeline
        .player
        .send_command(ControlCommand::SelectDeinterlacer {
            mode: cinetune_core::DeinterlaceMode::Bob,
        })
        .expect("send mode");
    pipeline
        .player
        .send_command(ControlCommand::Play)
        .expect("send play");
    std::thread::sleep(Duration::from_millis(600));

    let shown = pipeline.video_sink.shown();
    assert!(
        shown.len() >= 3,
        "frames stopped at the deinterlacer: {} shown",
        shown.len()
    );
    assert!(shown.windows(2).all(|w| w[0].0 < w[1].0));

    pipeline.player.shutdown();
}

#[test]
fn loud_audio_reports_clipping() {
    let frames = 30;
    let pipeline = scripted_pipeline(
        file_info(frames as i64 * FRAME_INTERVAL_US, true, false),
        interleaved_packets(frames, true, false),
        0.9,
        test_config(),
    );
    let mut rx = pipeline.player.subscribe();
    pipeline
        .player
        .send_command(ControlCommand::OpenFile {
            path: "scripted://afile".into(),
        })
        .expect("send open");
    wait_for(&mut rx, Duration::from_secs(2), |n| {
        matches!(n, Notification::FileOpened { .. })
    })
    .expect("file opened");

    pipeline
        .player
        .send_command(ControlCommand::SetVolume { linear: 2.0 })
        .expect("send volume");
    pipeline
        .player
        .send_command(ControlCommand::Play)
        .expect("send play");

    wait_for(&mut rx, Duration::from_secs(3), |n| {
        matches!(n, Notification::Clipping { peak } if *peak > 1.0)
    })
    .expect("clipping reported at doubled gain");
    assert_eq!(pipeline.audio_sink.volume(), 2.0);

    pipeline.player.shutdown();
}

#[test]
fn shutdown_joins_without_playback() {
    let pipeline = scripted_pipeline(
        file_info(1_000_000, true, true),
        interleaved_packets(10, true, true),
        0.1,
        test_config(),
    );
    pipeline.player.shutdown();
}
