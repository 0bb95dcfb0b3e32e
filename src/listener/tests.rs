use super::*;
use crate::audio::{DeviceError, DeviceSelection, MuteFlag, VoiceActivityDetector};
use crate::config::{ListenerConfig, StaticConfig, VadEngineKind};
use crate::diagnostics::{noop_watchdog, LevelMeter, Watchdog};
use crate::stt::{SpeechToText, SttError};
use crate::test_support::{
    quiet, tone, AfterScript, CollectingSink, RecordingStt, ScriptedBackend, ScriptedChunks,
    ScriptedWakeEngine, Step,
};
use crate::wake::{WakeWordEngine, WakeWordRegistry, WakeWordSpec};
use crossbeam_channel::unbounded;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const CHUNK_SAMPLES: usize = 480;
const CHUNK_BYTES: usize = CHUNK_SAMPLES * 2;
const LOOP_TIMEOUT: Duration = Duration::from_secs(10);

fn test_config() -> ListenerConfig {
    ListenerConfig {
        vad_engine: VadEngineKind::Simple,
        vad_threshold_db: -40.0,
        wake_word_module: "scripted".into(),
        mic_open_backoff_ms: 10,
        ..ListenerConfig::default()
    }
}

fn speech() -> Vec<u8> {
    tone(9_000, CHUNK_SAMPLES)
}

fn silent() -> Vec<u8> {
    quiet(CHUNK_SAMPLES)
}

fn counting_watchdog() -> (Watchdog, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let watchdog: Watchdog = Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (watchdog, calls)
}

fn waiter_with(engine: ScriptedWakeEngine, meter: LevelMeter, watchdog: Watchdog) -> WakeWordWaiter {
    WakeWordWaiter::new(
        WaiterSettings::from_config(&test_config()),
        Box::new(engine),
        "scripted",
        meter,
        watchdog,
    )
}

fn waiter(engine: ScriptedWakeEngine) -> WakeWordWaiter {
    waiter_with(engine, LevelMeter::default(), noop_watchdog())
}

fn running_state() -> Arc<RunState> {
    let state = Arc::new(RunState::new());
    state.begin_run();
    state
}

fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

#[test]
fn threshold_moves_toward_scaled_ambient_energy() {
    let mut waiter = waiter(ScriptedWakeEngine::new("hey mycroft", None));
    assert_eq!(waiter.energy_threshold(), 300.0);
    waiter.adjust_threshold(100.0);
    let first = waiter.energy_threshold();
    assert!(first < 300.0 && first > 150.0, "threshold {first}");
    for _ in 0..2_000 {
        waiter.adjust_threshold(100.0);
    }
    assert!((waiter.energy_threshold() - 150.0).abs() < 1.0);
}

#[test]
fn zero_energy_leaves_threshold_alone() {
    let mut waiter = waiter(ScriptedWakeEngine::new("hey mycroft", None));
    waiter.adjust_threshold(0.0);
    assert_eq!(waiter.energy_threshold(), 300.0);
}

#[test]
fn ambient_calibration_skips_muted_audio() {
    let mut waiter = waiter(ScriptedWakeEngine::new("hey mycroft", None));
    let mute = MuteFlag::new(true);
    let mut source = ScriptedChunks::new((0..20).map(|_| tone(50, CHUNK_SAMPLES))).with_mute(mute);
    waiter
        .adjust_for_ambient_noise(&mut source, 0.3)
        .expect("calibrate");
    assert_eq!(waiter.energy_threshold(), 300.0);
    assert!(source.reads() >= 10);
}

#[test]
fn sustained_loud_input_bumps_threshold() {
    let state = running_state();
    let stopper = state.clone();
    let mut waiter = waiter(ScriptedWakeEngine::new("hey mycroft", None));
    let mut source = ScriptedChunks::new(vec![tone(1_000, CHUNK_SAMPLES)])
        .at_read(1, move || stopper.signal_stop());
    let result = waiter
        .wait(&mut source, &state, &CollectingSink::default())
        .expect("wait");
    assert!(result.stopped);
    assert!((waiter.energy_threshold() - 1_200.0).abs() < 1e-6);
}

#[test]
fn wake_word_is_checked_every_fifth_of_a_second() {
    let engine = ScriptedWakeEngine::new("hey mycroft", Some(10));
    let updates = engine.updates();
    let meter = LevelMeter::default();
    let (watchdog, calls) = counting_watchdog();
    let mut waiter = waiter_with(engine, meter.clone(), watchdog);
    let mut source = ScriptedChunks::new((0..30).map(|i| tone(100 + i, CHUNK_SAMPLES)));
    let state = running_state();

    let result = waiter
        .wait(&mut source, &state, &CollectingSink::default())
        .expect("wait");

    assert!(result.found);
    assert!(!result.stopped);
    // Checks land on chunks 7 and 14; the engine needs ten updates.
    assert_eq!(source.reads(), 14);
    assert_eq!(updates.load(Ordering::SeqCst), 14);
    // A three second window plus 10 ms of trailing silence.
    assert_eq!(result.audio.len(), 96_000 + 320);
    assert_eq!(result.trailing_chunks.len(), TRAILING_CHUNKS);
    assert_eq!(result.trailing_chunks[0], tone(107, CHUNK_SAMPLES));
    assert_eq!(result.trailing_chunks[6], tone(113, CHUNK_SAMPLES));
    // Meter and watchdog skip every third chunk.
    assert_eq!(calls.load(Ordering::SeqCst), 9);
    assert_eq!(meter.snapshot().threshold, waiter.energy_threshold());
}

#[test]
fn listen_trigger_skips_the_wait() {
    let engine = ScriptedWakeEngine::new("hey mycroft", Some(1));
    let updates = engine.updates();
    let mut waiter = waiter(engine);
    let mut source = ScriptedChunks::new(vec![silent(); 10]);
    let state = running_state();
    state.trigger_listen();

    let result = waiter
        .wait(&mut source, &state, &CollectingSink::default())
        .expect("wait");

    assert!(!result.found);
    assert!(!result.stopped);
    assert_eq!(source.reads(), 0);
    assert_eq!(updates.load(Ordering::SeqCst), 0);
    assert!(!state.listen_triggered());
}

#[test]
fn stop_signal_ends_the_wait() {
    let state = running_state();
    let stopper = state.clone();
    let mut waiter = waiter(ScriptedWakeEngine::new("hey mycroft", None));
    let mut source =
        ScriptedChunks::new(vec![silent(); 20]).at_read(5, move || stopper.signal_stop());

    let result = waiter
        .wait(&mut source, &state, &CollectingSink::default())
        .expect("wait");

    assert!(result.stopped);
    assert!(!result.found);
    assert_eq!(source.reads(), 5);
}

#[test]
fn muted_chunks_never_reach_the_engine() {
    let engine = ScriptedWakeEngine::new("hey mycroft", Some(1));
    let updates = engine.updates();
    let mut waiter = waiter(engine);
    let mute = MuteFlag::new(true);
    let unmute = mute.clone();
    let mut source = ScriptedChunks::new(vec![silent(); 40])
        .with_mute(mute)
        .at_read(20, move || unmute.set(false));
    let state = running_state();

    let result = waiter
        .wait(&mut source, &state, &CollectingSink::default())
        .expect("wait");

    assert!(result.found);
    assert_eq!(source.reads(), 26);
    assert_eq!(updates.load(Ordering::SeqCst), 7);
}

#[test]
fn muted_wait_keeps_the_watchdog_and_meter_alive() {
    let engine = ScriptedWakeEngine::new("hey mycroft", Some(1));
    let updates = engine.updates();
    let meter = LevelMeter::default();
    let (watchdog, calls) = counting_watchdog();
    let mut waiter = waiter_with(engine, meter.clone(), watchdog);
    let state = running_state();
    let stopper = state.clone();
    let mut source = ScriptedChunks::new(vec![silent(); 40])
        .with_mute(MuteFlag::new(true))
        .at_read(30, move || stopper.signal_stop());

    let result = waiter
        .wait(&mut source, &state, &CollectingSink::default())
        .expect("wait");

    assert!(result.stopped);
    assert_eq!(source.reads(), 30);
    assert_eq!(updates.load(Ordering::SeqCst), 0);
    // Two of every three muted chunks still beat.
    assert_eq!(calls.load(Ordering::SeqCst), 20);
    let level = meter.snapshot();
    assert!(level.muted);
    assert_eq!(level.threshold, 300.0);
    assert_eq!(waiter.energy_threshold(), 300.0);
}

#[test]
fn device_fault_is_returned_from_the_wait() {
    let mut waiter = waiter(ScriptedWakeEngine::new("hey mycroft", None));
    let mut source = ScriptedChunks::new(vec![silent(); 3]).with_fault(DeviceError::Overflow {
        dropped: 2,
    });
    let state = running_state();
    let err = waiter
        .wait(&mut source, &state, &CollectingSink::default())
        .expect_err("fault");
    assert_eq!(err, DeviceError::Overflow { dropped: 2 });
}

#[test]
fn stand_up_phrase_wakes_a_sleeping_listener() {
    let main = ScriptedWakeEngine::new("hey mycroft", Some(1));
    let main_updates = main.updates();
    let stand_up = ScriptedWakeEngine::new("wake up", Some(7));
    let stand_up_stopped = stand_up.stopped();
    let mut waiter = waiter(main).with_stand_up(Box::new(stand_up));
    let mut source = ScriptedChunks::new(vec![silent(); 40]);
    let state = running_state();
    state.set_sleeping(true);
    let sink = CollectingSink::default();

    let result = waiter.wait(&mut source, &state, &sink).expect("wait");

    assert!(result.found);
    assert!(!state.is_sleeping());
    assert_eq!(sink.names(), vec!["awoken"]);
    assert_eq!(source.reads(), 14);
    assert_eq!(main_updates.load(Ordering::SeqCst), 7);

    waiter.stop();
    assert!(stand_up_stopped.load(Ordering::SeqCst));
}

#[test]
fn sleeping_without_stand_up_phrase_ignores_the_wake_word() {
    let main = ScriptedWakeEngine::new("hey mycroft", Some(1));
    let main_updates = main.updates();
    let mut waiter = waiter(main);
    let state = running_state();
    state.set_sleeping(true);
    let stopper = state.clone();
    let mut source =
        ScriptedChunks::new(vec![silent(); 40]).at_read(30, move || stopper.signal_stop());

    let result = waiter
        .wait(&mut source, &state, &CollectingSink::default())
        .expect("wait");

    assert!(result.stopped);
    assert_eq!(main_updates.load(Ordering::SeqCst), 0);
    assert!(state.is_sleeping());
}

fn recorder() -> UtteranceRecorder {
    UtteranceRecorder::new(
        VoiceActivityDetector::from_config(&test_config()),
        LevelMeter::default(),
        noop_watchdog(),
    )
}

#[test]
fn recording_ends_after_trailing_silence() {
    let mut recorder = recorder();
    let mut chunks = vec![speech(); 45];
    chunks.extend(vec![silent(); 30]);
    let mut source = ScriptedChunks::new(chunks);
    let state = running_state();

    let outcome = recorder
        .record(&mut source, &state, &[], None)
        .expect("record");

    assert_eq!(outcome.end, RecordEnd::PhraseEnd);
    assert_eq!(outcome.chunks, 64);
    assert_eq!(outcome.audio.len(), 64 * CHUNK_BYTES);
    assert_eq!(source.remaining(), 11);
}

#[test]
fn recording_calls_the_watchdog_every_ten_chunks() {
    let (watchdog, calls) = counting_watchdog();
    let mut recorder = UtteranceRecorder::new(
        VoiceActivityDetector::from_config(&test_config()),
        LevelMeter::default(),
        watchdog,
    );
    let mut chunks = vec![speech(); 45];
    chunks.extend(vec![silent(); 30]);
    let mut source = ScriptedChunks::new(chunks);
    let state = running_state();

    let outcome = recorder
        .record(&mut source, &state, &[], None)
        .expect("record");

    assert_eq!(outcome.chunks, 64);
    // Chunks 0, 10, .. 60; the closing chunk ends the loop first.
    assert_eq!(calls.load(Ordering::SeqCst), 7);
}

#[test]
fn streaming_forwards_voiced_chunks_in_order() {
    let mut recorder = recorder();
    let mut chunks = vec![silent(); 3];
    chunks.extend(vec![speech(); 45]);
    chunks.extend(vec![silent(); 30]);
    let mut source = ScriptedChunks::new(chunks);
    let state = running_state();
    let (tx, rx) = unbounded();
    let stream = StreamHandler::new(tx);

    let outcome = recorder
        .record(&mut source, &state, &[], Some(&stream))
        .expect("record");
    assert_eq!(outcome.end, RecordEnd::PhraseEnd);

    let messages: Vec<QueueMessage> = rx.try_iter().collect();
    assert_eq!(messages.first(), Some(&QueueMessage::StreamStart));
    assert_eq!(messages.last(), Some(&QueueMessage::StreamStop));
    let streamed = messages
        .iter()
        .filter(|message| matches!(message, QueueMessage::StreamChunk(_)))
        .count();
    assert_eq!(streamed, 45);
    assert_eq!(messages.len(), 47);
}

#[test]
fn stop_recording_returns_what_was_heard() {
    let mut recorder = recorder();
    let state = running_state();
    let stopper = state.clone();
    let mut source =
        ScriptedChunks::new(vec![speech(); 20]).at_read(3, move || stopper.request_stop_recording());
    let pre_roll = vec![silent(), silent()];

    let outcome = recorder
        .record(&mut source, &state, &pre_roll, None)
        .expect("record");

    assert_eq!(outcome.end, RecordEnd::Stopped);
    assert_eq!(outcome.chunks, 3);
    assert_eq!(outcome.audio.len(), 5 * CHUNK_BYTES);
    assert!(outcome.audio[..2 * CHUNK_BYTES].iter().all(|&b| b == 0));
}

#[test]
fn recorder_surfaces_device_faults_and_resets() {
    let mut recorder = recorder();
    let state = running_state();
    let (tx, rx) = unbounded();
    let stream = StreamHandler::new(tx);
    let mut source = ScriptedChunks::new(vec![speech(); 2]).with_fault(DeviceError::Disconnected);

    let err = recorder
        .record(&mut source, &state, &[], Some(&stream))
        .expect_err("fault");

    assert_eq!(err, DeviceError::Disconnected);
    assert_eq!(recorder.vad().state(), crate::audio::VadState::Idle);
    let messages: Vec<QueueMessage> = rx.try_iter().collect();
    assert_eq!(messages.last(), Some(&QueueMessage::StreamStop));
}

struct Harness {
    listen: ListenLoop,
    backend: Arc<ScriptedBackend>,
    sink: Arc<CollectingSink>,
    executed: Arc<Mutex<Vec<usize>>>,
    config: Arc<StaticConfig>,
}

fn harness(
    config: ListenerConfig,
    backend: ScriptedBackend,
    fire_after: Option<usize>,
    results: Vec<Result<Option<String>, SttError>>,
) -> Harness {
    let backend = Arc::new(backend);
    let sink = Arc::new(CollectingSink::default());
    let executed = Arc::new(Mutex::new(Vec::new()));
    let log = executed.clone();

    let mut registry = WakeWordRegistry::with_builtins();
    registry.register("scripted", move |spec: &WakeWordSpec| {
        Ok(Box::new(ScriptedWakeEngine::new(&spec.key_phrase, fire_after)) as Box<dyn WakeWordEngine>)
    });
    let ctx = ListenerContext::new(backend.clone(), sink.clone())
        .with_registry(registry)
        .with_stt_factory(move |config: &ListenerConfig| {
            if config.lang.starts_with("xx") {
                anyhow::bail!("unsupported language '{}'", config.lang);
            }
            Ok(Box::new(RecordingStt::new(results.clone()).with_log(log.clone()))
                as Box<dyn SpeechToText>)
        });
    let config = Arc::new(StaticConfig::new(config));
    let listen = ListenLoop::new(ctx, config.clone()).expect("listen loop");
    Harness {
        listen,
        backend,
        sink,
        executed,
        config,
    }
}

fn utterance_script(leading_quiet: usize) -> Vec<Step> {
    let mut steps: Vec<Step> = (0..leading_quiet).map(|_| Step::Chunk(silent())).collect();
    steps.extend((0..45).map(|_| Step::Chunk(speech())));
    steps
}

#[test]
fn wake_word_then_utterance_is_transcribed() {
    let backend = ScriptedBackend::new(utterance_script(20), AfterScript::Silence);
    let mut h = harness(
        test_config(),
        backend,
        Some(7),
        vec![Ok(Some("What Time Is It".into()))],
    );
    h.listen.start().expect("start");
    assert_eq!(h.listen.status(), ListenerStatus::Running);
    assert!(h.sink.wait_for("utterance", 1, LOOP_TIMEOUT));
    h.listen.stop();

    let names = h.sink.names();
    assert_eq!(
        &names[..4],
        &["wakeword", "record_begin", "record_end", "utterance"]
    );
    match &h.sink.events()[0] {
        ListenerEvent::WakeWord { hotword, engine } => {
            assert_eq!(hotword, "hey mycroft");
            assert_eq!(engine, "scripted");
        }
        other => panic!("unexpected event {other:?}"),
    }
    match &h.sink.events()[3] {
        ListenerEvent::Utterance { utterances, .. } => {
            assert_eq!(utterances, &vec!["what time is it".to_string()]);
        }
        other => panic!("unexpected event {other:?}"),
    }
    let executed = h.executed.lock().expect("lock").clone();
    assert_eq!(executed.len(), 1);
    let seconds = executed[0] as f64 / 32_000.0;
    assert!((2.0..=2.5).contains(&seconds), "utterance was {seconds}s");
    assert_eq!(h.backend.opens(), 1);
    assert_eq!(h.listen.status(), ListenerStatus::Stopped);
}

#[test]
fn overflow_below_restart_bound_recovers() {
    let mut steps: Vec<Step> = (0..5).map(|_| Step::Chunk(silent())).collect();
    steps.push(Step::Fault(DeviceError::Overflow { dropped: 3 }));
    steps.extend(utterance_script(30));
    let backend = ScriptedBackend::new(steps, AfterScript::Silence);
    let config = ListenerConfig {
        max_mic_restarts: 2,
        ..test_config()
    };
    let mut h = harness(config, backend, Some(7), vec![Ok(Some("lights on".into()))]);
    h.listen.start().expect("start");
    assert!(h.sink.wait_for("utterance", 1, LOOP_TIMEOUT));
    h.listen.stop();

    assert_eq!(h.backend.opens(), 2);
    assert_eq!(h.sink.count("error"), 0);
}

#[test]
fn overflow_past_restart_bound_is_fatal() {
    let steps = vec![
        Step::Chunk(silent()),
        Step::Fault(DeviceError::Overflow { dropped: 1 }),
        Step::Chunk(silent()),
        Step::Fault(DeviceError::Overflow { dropped: 4 }),
    ];
    let backend = ScriptedBackend::new(steps, AfterScript::Stall);
    let config = ListenerConfig {
        max_mic_restarts: 1,
        ..test_config()
    };
    let mut h = harness(config, backend, None, Vec::new());
    let handle = h.listen.handle();

    let err = h.listen.run().expect_err("fatal");

    match err {
        ListenerError::Fatal(message) => assert!(message.contains("overflowed"), "{message}"),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(h.backend.opens(), 2);
    assert!(matches!(
        h.sink.events().last(),
        Some(ListenerEvent::Error { fatal: true, .. })
    ));
    assert!(matches!(handle.status(), ListenerStatus::Failed(_)));
}

#[test]
fn microphone_that_never_opens_is_fatal() {
    let backend = ScriptedBackend::new(Vec::new(), AfterScript::Stall).failing_first_opens(10);
    let config = ListenerConfig {
        mic_open_attempts: 3,
        ..test_config()
    };
    let mut h = harness(config, backend, None, Vec::new());
    let err = h.listen.run().expect_err("fatal");
    assert!(matches!(err, ListenerError::Fatal(message) if message.contains("failed to open")));
    assert_eq!(h.backend.opens(), 0);
}

#[test]
fn transient_open_failures_are_retried() {
    let backend = ScriptedBackend::new(Vec::new(), AfterScript::Silence).failing_first_opens(2);
    let config = ListenerConfig {
        mic_open_attempts: 3,
        ..test_config()
    };
    let mut h = harness(config, backend, None, Vec::new());
    h.listen.start().expect("start");
    assert!(wait_until(LOOP_TIMEOUT, || h.backend.opens() == 1));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.listen.status(), ListenerStatus::Running);
    h.listen.stop();
    assert_eq!(h.sink.count("error"), 0);
}

#[test]
fn listen_trigger_records_without_wake_word() {
    let backend = ScriptedBackend::new(utterance_script(15), AfterScript::Silence);
    let config = ListenerConfig {
        wake_word_module: "listen_only".into(),
        ..test_config()
    };
    let mut h = harness(config, backend, None, vec![Ok(Some("play music".into()))]);
    let handle = h.listen.handle();
    handle.trigger_listen();
    h.listen.start().expect("start");
    assert!(h.sink.wait_for("utterance", 1, LOOP_TIMEOUT));
    h.listen.stop();
    assert_eq!(h.sink.count("wakeword"), 0);
    assert_eq!(&h.sink.names()[..3], &["record_begin", "record_end", "utterance"]);
}

#[test]
fn reload_restarts_threads_and_keeps_mute() {
    let backend = ScriptedBackend::new(Vec::new(), AfterScript::Silence);
    let mut h = harness(test_config(), backend, None, Vec::new());
    let handle = h.listen.handle();
    h.listen.start().expect("start");
    assert!(wait_until(LOOP_TIMEOUT, || h.backend.opens() == 1));
    handle.mute();

    h.config.update(|config| config.wake_word = "hey computer".into());
    h.listen.poll_config();

    assert_eq!(h.listen.generation(), 2);
    assert_eq!(h.listen.config().wake_word, "hey computer");
    assert!(wait_until(LOOP_TIMEOUT, || h.backend.opens() == 2));
    assert!(handle.is_muted());
    assert!(wait_until(LOOP_TIMEOUT, || h.backend.is_paused()));
    assert_eq!(h.listen.status(), ListenerStatus::Running);
    // The old generation released the device before the new one opened it.
    assert_eq!(h.backend.max_live_streams(), 1);
    assert_eq!(h.backend.live_streams(), 1);

    // An unchanged config is not reloaded.
    h.listen.poll_config();
    assert_eq!(h.listen.generation(), 2);
    h.listen.stop();
    assert_eq!(h.backend.live_streams(), 0);
}

#[test]
fn reload_opens_the_newly_selected_device() {
    let backend = ScriptedBackend::new(Vec::new(), AfterScript::Silence);
    let mut h = harness(test_config(), backend, None, Vec::new());
    h.listen.start().expect("start");
    assert!(wait_until(LOOP_TIMEOUT, || h.backend.opens() == 1));

    h.config.update(|config| {
        config.input_device = Some("USB Mic".into());
        config.device_index = Some(5);
    });
    h.listen.poll_config();

    assert_eq!(h.listen.generation(), 2);
    assert!(wait_until(LOOP_TIMEOUT, || h.backend.opens() == 2));
    assert_eq!(
        h.backend.devices(),
        vec![
            DeviceSelection::default(),
            DeviceSelection::new(Some("USB Mic".into()), Some(5)),
        ]
    );
    h.listen.stop();
    assert_eq!(h.backend.max_live_streams(), 1);
}

#[test]
fn failed_reload_keeps_the_running_loop() {
    let backend = ScriptedBackend::new(Vec::new(), AfterScript::Silence);
    let mut h = harness(test_config(), backend, None, Vec::new());
    h.listen.start().expect("start");
    assert!(wait_until(LOOP_TIMEOUT, || h.backend.opens() == 1));

    h.config.update(|config| config.lang = "xx-XX".into());
    h.listen.poll_config();
    h.listen.poll_config();

    assert_eq!(h.listen.generation(), 1);
    assert_eq!(h.listen.config().lang, "en-US");
    assert_eq!(h.listen.status(), ListenerStatus::Running);
    assert_eq!(h.sink.count("error"), 1);
    assert!(matches!(
        h.sink.events().last(),
        Some(ListenerEvent::Error { fatal: false, .. })
    ));
    assert_eq!(h.backend.opens(), 1);
    h.listen.stop();
}

#[test]
fn reload_before_start_only_swaps_config() {
    let backend = ScriptedBackend::new(Vec::new(), AfterScript::Stall);
    let mut h = harness(test_config(), backend, None, Vec::new());
    let config = ListenerConfig {
        wake_word: "hey computer".into(),
        ..test_config()
    };
    h.listen.reload_with(config).expect("reload");
    assert_eq!(h.listen.generation(), 0);
    assert_eq!(h.listen.status(), ListenerStatus::Stopped);
    assert_eq!(h.backend.opens(), 0);
}

#[test]
fn stop_request_ends_run() {
    let backend = ScriptedBackend::new(Vec::new(), AfterScript::Silence);
    let mut h = harness(test_config(), backend, None, Vec::new());
    let handle = h.listen.handle();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        handle.request_stop();
    });
    h.listen.run().expect("clean stop");
    stopper.join().expect("join");
    assert_eq!(h.listen.status(), ListenerStatus::Stopped);
}

#[test]
fn sleep_and_awaken_are_reported_in_status() {
    let backend = ScriptedBackend::new(Vec::new(), AfterScript::Silence);
    let mut h = harness(test_config(), backend, None, Vec::new());
    let handle = h.listen.handle();
    assert_eq!(handle.status(), ListenerStatus::Stopped);
    h.listen.start().expect("start");
    handle.sleep();
    assert_eq!(handle.status(), ListenerStatus::Sleeping);
    handle.awaken();
    assert_eq!(handle.status(), ListenerStatus::Running);
    h.listen.stop();
}

#[test]
fn audio_output_mutes_only_when_configured() {
    let backend = ScriptedBackend::new(Vec::new(), AfterScript::Stall);
    let config = ListenerConfig {
        mute_during_output: true,
        ..test_config()
    };
    let h = harness(config, backend, None, Vec::new());
    let handle = h.listen.handle();
    handle.audio_output_started();
    handle.audio_output_started();
    assert!(handle.is_muted());
    handle.audio_output_ended();
    assert!(!handle.is_muted());

    let quiet_output = harness(
        test_config(),
        ScriptedBackend::new(Vec::new(), AfterScript::Stall),
        None,
        Vec::new(),
    );
    let handle = quiet_output.listen.handle();
    handle.audio_output_started();
    assert!(!handle.is_muted());
}
