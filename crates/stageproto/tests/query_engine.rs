//! Query engine behavior against a scripted in-process session.
//!
//! The fake transport answers each send by recording a reply into the same
//! correlator the engine waits on, optionally after a delay, the way the
//! UDP listener would.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use stageproto::topics::{device, song, track};
use stageproto::{
    Correlator, OscArg, Payload, QueryEngine, QueryResult, SessionSnapshot, TrackSnapshot,
    Transport, TransportError,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_millis(150);

type Answer = dyn Fn(&str, &[OscArg]) -> Option<Payload> + Send + Sync;

struct ScriptedSession {
    correlator: Arc<Correlator>,
    answer: Box<Answer>,
    delay: Duration,
    sent: Mutex<Vec<(String, Vec<OscArg>)>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedSession {
    fn new(
        correlator: Arc<Correlator>,
        delay: Duration,
        answer: impl Fn(&str, &[OscArg]) -> Option<Payload> + Send + Sync + 'static,
    ) -> Self {
        Self {
            correlator,
            answer: Box::new(answer),
            delay,
            sent: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn sent_topics(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }
}

#[async_trait]
impl Transport for ScriptedSession {
    async fn send(&self, topic: &str, args: &[OscArg]) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push((topic.to_string(), args.to_vec()));

        let Some(reply) = (self.answer)(topic, args) else {
            return Ok(());
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let correlator = Arc::clone(&self.correlator);
        let in_flight = Arc::clone(&self.in_flight);
        let delay = self.delay;
        let topic = topic.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            correlator.record(&topic, reply);
        });
        Ok(())
    }
}

/// Transport whose sends always fail, like an unreachable host.
struct Unreachable;

#[async_trait]
impl Transport for Unreachable {
    async fn send(&self, topic: &str, _args: &[OscArg]) -> Result<(), TransportError> {
        Err(TransportError::Send {
            topic: topic.to_string(),
            target: SocketAddr::from(([127, 0, 0, 1], 9)),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        })
    }
}

fn engine_with(
    delay: Duration,
    answer: impl Fn(&str, &[OscArg]) -> Option<Payload> + Send + Sync + 'static,
) -> (QueryEngine, Arc<ScriptedSession>) {
    let correlator = Arc::new(Correlator::new());
    let session = Arc::new(ScriptedSession::new(correlator.clone(), delay, answer));
    let engine = QueryEngine::new(session.clone(), correlator, TIMEOUT);
    (engine, session)
}

fn track_names() -> [&'static str; 3] {
    ["Drums", "Bass", "Keys"]
}

/// A three-track session that answers everything.
fn full_session(topic: &str, args: &[OscArg]) -> Option<Payload> {
    let idx = args.first().cloned();
    let with_idx = |value: OscArg| idx.clone().map(|i| vec![i, value]);
    let track_no = idx.as_ref().and_then(OscArg::as_i64).unwrap_or(0) as usize;

    match topic {
        song::TEMPO => Some(vec![OscArg::Float(124.0)]),
        song::NUM_TRACKS => Some(vec![OscArg::Int(3)]),
        song::NUM_SCENES => Some(vec![OscArg::Int(8)]),
        song::SIGNATURE_NUMERATOR => Some(vec![OscArg::Int(4)]),
        song::SIGNATURE_DENOMINATOR => Some(vec![OscArg::Int(4)]),
        track::NAME => with_idx(OscArg::Str(track_names().get(track_no)?.to_string())),
        track::VOLUME => with_idx(OscArg::Float(0.85)),
        track::PANNING => with_idx(OscArg::Float(0.0)),
        track::MUTE => with_idx(OscArg::Int(0)),
        track::SOLO => with_idx(OscArg::Int(0)),
        track::ARM => with_idx(OscArg::Int(1)),
        _ => None,
    }
}

#[tokio::test]
async fn session_info_is_assembled_from_song_queries() {
    let (engine, _) = engine_with(Duration::ZERO, full_session);
    let info = engine.get_session_info().await;
    assert_eq!(
        info,
        SessionSnapshot {
            tempo: Some(124.0),
            num_tracks: Some(3),
            num_scenes: Some(8),
            signature_numerator: Some(4),
            signature_denominator: Some(4),
        }
    );
}

#[tokio::test]
async fn track_count_timeout_yields_empty_list() {
    let (engine, session) = engine_with(Duration::ZERO, |topic, args| {
        if topic == song::NUM_TRACKS {
            None
        } else {
            full_session(topic, args)
        }
    });

    let tracks = engine.get_all_tracks().await;
    assert!(tracks.is_empty());
    // No per-track queries were guessed at
    assert_eq!(session.sent_topics(), vec![song::NUM_TRACKS.to_string()]);
}

#[tokio::test]
async fn all_tracks_in_index_order() {
    let (engine, _) = engine_with(Duration::from_millis(2), full_session);
    let tracks = engine.get_all_tracks().await;

    let names: Vec<_> = tracks.iter().map(|t| t.name.clone()).collect();
    assert_eq!(
        names,
        vec![
            Some("Drums".to_string()),
            Some("Bass".to_string()),
            Some("Keys".to_string())
        ]
    );
    assert_eq!(tracks[1].index, 1);
    assert_eq!(tracks[1].arm, Some(true));
    assert_eq!(tracks[1].mute, Some(false));
}

#[tokio::test]
async fn one_missing_field_leaves_the_rest() {
    let (engine, _) = engine_with(Duration::ZERO, |topic, args| {
        if topic == track::VOLUME {
            None
        } else {
            full_session(topic, args)
        }
    });

    let snapshot = engine.get_track_info(1).await;
    assert_eq!(snapshot.name.as_deref(), Some("Bass"));
    assert_eq!(snapshot.volume, None);
    assert_eq!(snapshot.panning, Some(0.0));
    assert_eq!(snapshot.mute, Some(false));
    assert_eq!(snapshot.solo, Some(false));
    assert_eq!(snapshot.arm, Some(true));
}

#[tokio::test]
async fn nonexistent_track_is_all_unknown() {
    let (engine, _) = engine_with(Duration::ZERO, full_session);
    let snapshot = engine.get_track_info(7).await;
    assert_eq!(snapshot.name, None);
    // Other fields still answer for any index in this fake
    assert_eq!(snapshot.volume, Some(0.85));
}

#[tokio::test]
async fn silent_session_leaves_every_track_field_unknown() {
    let (engine, _) = engine_with(Duration::ZERO, |_, _| None);
    let snapshot = engine.get_track_info(2).await;
    assert_eq!(
        snapshot,
        TrackSnapshot {
            index: 2,
            ..TrackSnapshot::default()
        }
    );
}

#[tokio::test]
async fn stale_reply_is_cleared_before_sending() {
    let (engine, _) = engine_with(Duration::ZERO, |_, _| None);
    engine
        .correlator()
        .record(song::TEMPO, vec![OscArg::Float(99.0)]);

    let result = engine.query(song::TEMPO, &[], Duration::from_millis(30)).await;
    assert_eq!(result, QueryResult::Timeout);
}

#[tokio::test]
async fn failed_send_surfaces_as_timeout() {
    let engine = QueryEngine::new(
        Arc::new(Unreachable),
        Arc::new(Correlator::new()),
        TIMEOUT,
    );
    assert_eq!(engine.tempo().await, None);
    assert!(engine.get_all_tracks().await.is_empty());
}

#[tokio::test]
async fn overlapping_queries_on_one_topic_do_not_swap() {
    let (engine, session) = engine_with(Duration::from_millis(20), full_session);
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for i in 0..3 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let reply = engine
                .query_echoed(track::NAME, &[OscArg::Int(i)], Duration::from_secs(1))
                .await;
            (i, reply.arg(1).and_then(OscArg::as_str).map(String::from))
        }));
    }

    for handle in handles {
        let (i, name) = handle.await.unwrap();
        assert_eq!(name.as_deref(), Some(track_names()[i as usize]));
    }
    assert_eq!(session.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn clip_slots_keep_empty_slots() {
    let (engine, _) = engine_with(Duration::ZERO, |topic, args| match topic {
        track::CLIP_NAMES => {
            let mut reply = args.to_vec();
            reply.extend([OscArg::Str("Intro".into()), OscArg::Nil, OscArg::Str("Drop".into())]);
            Some(reply)
        }
        _ => None,
    });

    let slots = engine.get_clip_slots(2).await;
    let names: Vec<_> = slots.iter().map(|c| (c.slot, c.name.as_deref())).collect();
    assert_eq!(names, vec![(0, Some("Intro")), (1, None), (2, Some("Drop"))]);

    assert!(engine.get_clip_slots(9).await.len() == 3);
}

#[tokio::test]
async fn unanswered_clip_query_is_empty() {
    let (engine, _) = engine_with(Duration::ZERO, |_, _| None);
    assert!(engine.get_clip_slots(0).await.is_empty());
    assert!(engine.get_devices(0).await.is_empty());
}

#[tokio::test]
async fn device_params_pair_names_with_values() {
    let (engine, _) = engine_with(Duration::ZERO, |topic, args| {
        let mut reply = args.to_vec();
        match topic {
            track::DEVICE_NAMES => reply.extend([OscArg::Str("EQ Eight".into())]),
            device::PARAMETER_NAMES => reply.extend([
                OscArg::Str("Device On".into()),
                OscArg::Str("Gain".into()),
                OscArg::Str("Freq".into()),
            ]),
            // One value short of the names
            device::PARAMETER_VALUES => {
                reply.extend([OscArg::Float(1.0), OscArg::Float(0.333333)])
            }
            _ => return None,
        }
        Some(reply)
    });

    let devices = engine.get_devices(0).await;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].name, "EQ Eight");

    let params = engine.get_device_params(0, 0).await;
    let values: Vec<_> = params.iter().map(|p| (p.name.as_str(), p.value)).collect();
    assert_eq!(
        values,
        vec![("Device On", Some(1.0)), ("Gain", Some(0.3333)), ("Freq", None)]
    );
}
