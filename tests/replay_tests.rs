use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use timeshift::{
    Clock, Control, ControlReply, EsId, TimeshiftError, TimeshiftOut, Timestamp,
    config::TimeshiftSettings,
    es::{Block, Epg, EpgEvent, EsCategory, EsFormat, Meta},
    session::wait_until_empty,
    sink::{
        Query, SourceCaps,
        recorder::{RecordingSink, SinkEvent, SinkOp},
    },
};
use tokio::time::{sleep, timeout};

struct Tracked {
    bytes: Vec<u8>,
    drops: Arc<AtomicUsize>,
}

impl AsRef<[u8]> for Tracked {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

fn tracked(bytes: &[u8], drops: &Arc<AtomicUsize>) -> Bytes {
    Bytes::from_owner(Tracked {
        bytes: bytes.to_vec(),
        drops: drops.clone(),
    })
}

fn layer(sink: &RecordingSink) -> TimeshiftOut<RecordingSink> {
    TimeshiftOut::new(sink.clone(), SourceCaps::default(), &TimeshiftSettings::default())
}

fn video() -> EsFormat {
    EsFormat::new(EsCategory::Video, "h264").with_id(0x100)
}

fn pause(paused: bool, date: Timestamp) -> Control<'static, EsId> {
    Control::SetPauseState {
        source_paused: false,
        paused,
        date,
    }
}

/// Clock readings (in microseconds) of every block delivered downstream.
fn send_times(events: &[SinkEvent], clock: &Clock) -> Vec<i64> {
    events
        .iter()
        .filter(|event| matches!(event.op, SinkOp::Send { .. }))
        .map(|event| clock.timestamp(event.at).as_micros())
        .collect()
}

fn assert_at(actual_us: i64, expected_us: i64) {
    assert!(
        actual_us >= expected_us && actual_us < expected_us + 2_000,
        "executed at {actual_us}us, expected {expected_us}us"
    );
}

fn programme_guide() -> Epg {
    let mut epg = Epg::new("late channel");
    for (start, name) in [(100, "news"), (200, "weather")] {
        epg.add_event(EpgEvent {
            start,
            duration: 100,
            name: name.into(),
            short_description: None,
            description: None,
        });
    }
    epg.set_current(Some(200));
    epg
}

/// Controls forwarded downstream, pause changes left out.
fn forwarded_controls(sink: &RecordingSink) -> Vec<(Query, String)> {
    sink.ops()
        .into_iter()
        .filter_map(|op| match op {
            SinkOp::Control {
                query: Query::SetPauseState,
                ..
            } => None,
            SinkOp::Control { query, args } => Some((query, args)),
            _ => None,
        })
        .collect()
}

async fn drain(layer: &TimeshiftOut<RecordingSink>) {
    wait_until_empty(layer, Duration::from_millis(1))
        .await
        .expect("get-empty");
}

#[tokio::test(start_paused = true)]
async fn resume_shifts_replay_by_pause_duration() {
    let sink = RecordingSink::new();
    let layer = layer(&sink);
    let clock = layer.clock();
    let es = layer.add(&video()).await.expect("add");

    layer.control(pause(true, clock.now())).await.expect("pause");
    assert!(layer.is_delayed().await);
    sleep(Duration::from_millis(100)).await;
    layer.send(es, Block::new(&b"b1"[..])).await.expect("send");
    sleep(Duration::from_millis(400)).await;
    layer.control(pause(false, clock.now())).await.expect("resume");
    drain(&layer).await;

    let times = send_times(&sink.events(), &clock);
    assert_eq!(times.len(), 1);
    assert_at(times[0], 600_000);
    assert_eq!(layer.stats().await.command_delay_us, 500_000);
    layer.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn rate_change_stretches_deadlines() {
    let sink = RecordingSink::new();
    let layer = layer(&sink);
    let clock = layer.clock();
    let es = layer.add(&video()).await.expect("add");

    layer
        .control(Control::SetRate {
            source_rate: 1000,
            rate: 2000,
        })
        .await
        .expect("set rate");
    layer.send(es, Block::new(&b"t0"[..])).await.expect("send");
    sleep(Duration::from_millis(200)).await;
    layer.send(es, Block::new(&b"t200"[..])).await.expect("send");
    drain(&layer).await;

    let times = send_times(&sink.events(), &clock);
    assert_eq!(times.len(), 2);
    assert_at(times[0], 0);
    assert_at(times[1], 400_000);

    let forwarded_rate = sink.ops().into_iter().find_map(|op| match op {
        SinkOp::Control {
            query: Query::SetRate,
            args,
        } => Some(args),
        _ => None,
    });
    assert_eq!(
        forwarded_rate.as_deref(),
        Some("SetRate { source_rate: 2000, rate: 2000 }")
    );
    layer.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn buffered_commands_replay_in_fifo_order() {
    let sink = RecordingSink::new();
    let layer = layer(&sink);
    let clock = layer.clock();
    let mut meta = Meta::new();
    meta.set("title", "late show");

    layer.control(pause(true, clock.now())).await.expect("pause");
    let a = layer.add(&video()).await.expect("add a");
    for payload in [&b"a1"[..], b"a2", b"a3"] {
        layer.send(a, Block::new(payload)).await.expect("send");
    }
    layer
        .control(Control::SetEsState {
            es: a,
            enabled: false,
        })
        .await
        .expect("es state");
    let b = layer
        .add(&EsFormat::new(EsCategory::Audio, "mp4a"))
        .await
        .expect("add b");
    layer.send(b, Block::new(&b"b1"[..])).await.expect("send");
    layer.del(a).await;
    assert_eq!(layer.streams().await, vec![b]);
    assert_eq!(
        layer
            .control(Control::SetGroupMeta {
                group: 1,
                meta: &meta,
            })
            .await,
        Ok(ControlReply::Queued)
    );
    drop(meta);

    sleep(Duration::from_millis(50)).await;
    layer.control(pause(false, clock.now())).await.expect("resume");
    drain(&layer).await;

    // Second cycle while already buffering.
    layer.control(pause(true, clock.now())).await.expect("pause");
    layer.send(b, Block::new(&b"b2"[..])).await.expect("send");
    layer.send(b, Block::new(&b"b3"[..])).await.expect("send");
    sleep(Duration::from_millis(20)).await;
    layer.control(pause(false, clock.now())).await.expect("resume");
    drain(&layer).await;

    let replayed: Vec<String> = sink
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            SinkOp::Add { es, format } => Some(format!("add {es} {}", format.codec)),
            SinkOp::Send { es, data, .. } => Some(format!(
                "send {es} {}",
                String::from_utf8_lossy(&data)
            )),
            SinkOp::Del { es } => Some(format!("del {es}")),
            SinkOp::Control {
                query: Query::SetPauseState,
                ..
            } => None,
            SinkOp::Control { args, .. } => Some(args),
        })
        .collect();
    assert_eq!(
        replayed,
        vec![
            "add 1 h264",
            "send 1 a1",
            "send 1 a2",
            "send 1 a3",
            "SetEsState { es: 1, enabled: false }",
            "add 2 mp4a",
            "send 2 b1",
            "del 1",
            "SetGroupMeta { group: 1, meta: Meta { entries: {\"title\": \"late show\"} } }",
            "send 2 b2",
            "send 2 b3",
        ]
    );
    assert_eq!(layer.stats().await.command_delay_us, 70_000);
    layer.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn stop_before_deadline_releases_without_executing() {
    let sink = RecordingSink::new();
    let layer = layer(&sink);
    let clock = layer.clock();
    let drops = Arc::new(AtomicUsize::new(0));

    layer.control(pause(true, clock.now())).await.expect("pause");
    let format = video().with_extra(tracked(b"sps/pps", &drops));
    let a = layer.add(&format).await.expect("add");
    drop(format);
    layer
        .send(a, Block::new(tracked(b"b1", &drops)))
        .await
        .expect("send b1");
    sleep(Duration::from_millis(100)).await;
    layer
        .send(a, Block::new(tracked(b"b2", &drops)))
        .await
        .expect("send b2");

    let stats = layer.stats().await;
    assert_eq!(stats.pending, 3);
    assert_eq!(drops.load(Ordering::SeqCst), 0, "queued copies are still alive");

    layer.destroy().await;

    assert_eq!(drops.load(Ordering::SeqCst), 3);
    let ops = sink.ops();
    assert!(
        ops.iter().all(|op| matches!(
            op,
            SinkOp::Control {
                query: Query::SetPauseState,
                ..
            }
        )),
        "nothing but the pause reached downstream: {ops:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn destroy_removes_streams_whose_removal_was_drained() {
    let sink = RecordingSink::new();
    let layer = layer(&sink);
    let clock = layer.clock();

    let a = layer.add(&video()).await.expect("add");
    let b = layer
        .add(&EsFormat::new(EsCategory::Audio, "mp4a"))
        .await
        .expect("add");
    assert_eq!(sink.live_streams(), vec![1, 2]);

    layer.control(pause(true, clock.now())).await.expect("pause");
    layer.del(a).await;
    assert_eq!(layer.streams().await, vec![b]);
    assert_eq!(sink.live_streams(), vec![1, 2], "removal is only recorded");

    layer.destroy().await;
    assert!(sink.live_streams().is_empty());
}

#[tokio::test(start_paused = true)]
async fn special_queries_answer_from_the_layer_while_buffering() {
    let sink = RecordingSink::new();
    let layer = layer(&sink);
    let clock = layer.clock();
    let es = layer.add(&video()).await.expect("add");

    layer.control(pause(true, clock.now())).await.expect("pause");
    assert_eq!(
        layer.control(Control::GetEmpty).await,
        Ok(ControlReply::Bool(true))
    );
    layer.send(es, Block::new(&b"x"[..])).await.expect("send");
    assert_eq!(
        layer.control(Control::GetEmpty).await,
        Ok(ControlReply::Bool(false))
    );
    assert_eq!(
        layer.control(Control::GetBuffering).await,
        Ok(ControlReply::Bool(true))
    );
    assert_eq!(
        layer.control(Control::GetWakeup).await,
        Ok(ControlReply::Time(Timestamp::ZERO))
    );
    assert_eq!(
        layer.control(Control::SetTime(Timestamp::from_millis(5))).await,
        Err(TimeshiftError::UnsupportedWhileBuffering("time change"))
    );
    assert_eq!(
        layer.control(Control::SetFrameNext).await,
        Err(TimeshiftError::UnsupportedWhileBuffering("frame next"))
    );

    let forwarded: Vec<Query> = sink
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            SinkOp::Control { query, .. } => Some(query),
            _ => None,
        })
        .collect();
    assert_eq!(forwarded, vec![Query::SetPauseState]);
    layer.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn faster_replay_reports_underflow_and_keeps_going() {
    let sink = RecordingSink::new();
    let layer = layer(&sink);
    let es = layer.add(&video()).await.expect("add");

    layer
        .control(Control::SetRate {
            source_rate: 1000,
            rate: 500,
        })
        .await
        .expect("set rate");
    layer.send(es, Block::new(&b"first"[..])).await.expect("send");
    sleep(Duration::from_millis(100)).await;
    layer.send(es, Block::new(&b"second"[..])).await.expect("send");
    drain(&layer).await;

    let stats = layer.stats().await;
    assert_eq!(stats.underflows, 1);
    assert_eq!(send_times(&sink.events(), &layer.clock()).len(), 2);
    layer.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn payloads_are_released_once_under_mixed_operations() {
    let drops = Arc::new(AtomicUsize::new(0));
    let sink = RecordingSink::new();
    let layer = layer(&sink);
    let clock = layer.clock();

    let mut seed: u64 = 0x5eed;
    let mut next = move |bound: u64| {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (seed >> 33) % bound
    };

    let mut created = 0usize;
    let mut streams: Vec<EsId> = Vec::new();
    let mut paused = false;
    for step in 0..400u32 {
        match next(10) {
            0 => streams.push(layer.add(&video()).await.expect("add")),
            1 if !streams.is_empty() => {
                let es = streams.remove(next(streams.len() as u64) as usize);
                layer.del(es).await;
            }
            2 => {
                layer
                    .control(pause(!paused, clock.now()))
                    .await
                    .expect("pause toggle");
                paused = !paused;
            }
            3 => sleep(Duration::from_millis(next(20) + 1)).await,
            _ if !streams.is_empty() => {
                let es = streams[next(streams.len() as u64) as usize];
                let payload = step.to_be_bytes();
                created += 1;
                // Blocks for streams the sink refused are released on failure.
                let _ = layer.send(es, Block::new(tracked(&payload, &drops))).await;
            }
            _ => {}
        }
    }

    layer.destroy().await;
    assert_eq!(drops.load(Ordering::SeqCst), created);
    assert!(sink.live_streams().is_empty());
}

#[tokio::test(start_paused = true)]
async fn buffered_payload_queries_replay_on_realized_streams() {
    let sink = RecordingSink::new();
    let layer = layer(&sink);
    let clock = layer.clock();
    let drops = Arc::new(AtomicUsize::new(0));
    let es = layer.add(&video()).await.expect("add");

    layer.control(pause(true, clock.now())).await.expect("pause");
    let format = EsFormat::new(EsCategory::Video, "hevc").with_extra(tracked(b"vps/sps", &drops));
    assert_eq!(
        layer
            .control(Control::SetEsFmt {
                es,
                format: &format,
            })
            .await,
        Ok(ControlReply::Queued)
    );
    drop(format);
    let epg = programme_guide();
    assert_eq!(
        layer.control(Control::SetGroupEpg { group: 1, epg: &epg }).await,
        Ok(ControlReply::Queued)
    );
    drop(epg);
    assert_eq!(drops.load(Ordering::SeqCst), 0, "queued copy keeps the extradata");
    assert!(forwarded_controls(&sink).is_empty());

    sleep(Duration::from_millis(10)).await;
    layer.control(pause(false, clock.now())).await.expect("resume");
    drain(&layer).await;

    let controls = forwarded_controls(&sink);
    assert_eq!(controls.len(), 2);
    assert_eq!(controls[0].0, Query::SetEsFmt);
    assert!(
        controls[0]
            .1
            .starts_with("SetEsFmt { es: 1, format: EsFormat { category: Video, codec: \"hevc\""),
        "{}",
        controls[0].1
    );
    assert_eq!(controls[1].0, Query::SetGroupEpg);
    assert!(controls[1].1.contains("name: \"weather\""), "{}", controls[1].1);
    assert!(controls[1].1.ends_with("current: Some(1) } }"), "{}", controls[1].1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    layer.destroy().await;
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn buffered_payload_queries_are_released_once_when_drained() {
    let sink = RecordingSink::new();
    let layer = layer(&sink);
    let clock = layer.clock();
    let drops = Arc::new(AtomicUsize::new(0));
    let es = layer.add(&video()).await.expect("add");

    layer.control(pause(true, clock.now())).await.expect("pause");
    let format = EsFormat::new(EsCategory::Video, "hevc").with_extra(tracked(b"vps/sps", &drops));
    layer
        .control(Control::SetEsFmt {
            es,
            format: &format,
        })
        .await
        .expect("es format");
    drop(format);
    let epg = programme_guide();
    layer
        .control(Control::SetGroupEpg { group: 1, epg: &epg })
        .await
        .expect("epg");
    drop(epg);
    assert_eq!(layer.stats().await.pending, 2);

    layer.destroy().await;

    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert!(forwarded_controls(&sink).is_empty());
    assert!(sink.live_streams().is_empty());
}

#[tokio::test(start_paused = true)]
async fn dropping_a_buffering_layer_releases_its_backlog() {
    let sink = RecordingSink::new();
    let layer = layer(&sink);
    let clock = layer.clock();
    let drops = Arc::new(AtomicUsize::new(0));
    let es = layer.add(&video()).await.expect("add");

    layer.control(pause(true, clock.now())).await.expect("pause");
    for payload in [&b"b1"[..], b"b2", b"b3"] {
        layer
            .send(es, Block::new(tracked(payload, &drops)))
            .await
            .expect("send");
    }
    assert_eq!(layer.stats().await.pending, 3);
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    drop(layer);

    timeout(Duration::from_secs(1), async {
        while drops.load(Ordering::SeqCst) < 3 {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("worker stopped and released the backlog");
    assert_eq!(drops.load(Ordering::SeqCst), 3);
    assert!(
        sink.ops()
            .iter()
            .all(|op| !matches!(op, SinkOp::Send { .. }))
    );
}
