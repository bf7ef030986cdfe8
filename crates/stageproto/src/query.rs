//! Session Query Engine: ask one thing, wait a bounded time, get an answer
//! or [`QueryResult::Timeout`].
//!
//! Replies are correlated by topic only, so two requests in flight on the
//! same topic would race for one slot. The engine rules that out itself:
//! each topic has an async lock held from clear through send to await, and
//! index-scoped queries only accept replies that echo the request's indices.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::correlator::{Correlator, QueryResult};
use crate::osc::{OscArg, Payload};
use crate::snapshot::{
    name_of, round4, ClipSnapshot, DeviceSnapshot, ParameterSnapshot, SessionSnapshot,
    TrackSnapshot,
};
use crate::topics::{device, song, track};
use crate::transport::Transport;

pub struct QueryEngine {
    transport: Arc<dyn Transport>,
    correlator: Arc<Correlator>,
    timeout: Duration,
    topic_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl QueryEngine {
    /// `timeout` is the per-query wait used by the composite queries.
    pub fn new(transport: Arc<dyn Transport>, correlator: Arc<Correlator>, timeout: Duration) -> Self {
        Self {
            transport,
            correlator,
            timeout,
            topic_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Send `args` to `topic` and take whatever reply arrives on that topic.
    pub async fn query(&self, topic: &str, args: &[OscArg], timeout: Duration) -> QueryResult {
        self.issue(topic, args, timeout, |_| true).await
    }

    /// Like [`query`](Self::query), but only accept a reply whose leading
    /// arguments echo `index_args`. Others are discarded until the deadline.
    pub async fn query_echoed(
        &self,
        topic: &str,
        index_args: &[OscArg],
        timeout: Duration,
    ) -> QueryResult {
        self.issue(topic, index_args, timeout, |payload| echoes(index_args, payload))
            .await
    }

    async fn issue<F>(&self, topic: &str, args: &[OscArg], timeout: Duration, accept: F) -> QueryResult
    where
        F: Fn(&Payload) -> bool,
    {
        let lock = self.topic_lock(topic);
        let _serialized = lock.lock().await;

        self.correlator.clear(topic);

        if let Err(e) = self.transport.send(topic, args).await {
            warn!(topic, error = %e, "query send failed, reporting as timeout");
            return QueryResult::Timeout;
        }

        let result = self.correlator.await_matching(topic, timeout, accept).await;
        if result.is_timeout() {
            debug!(topic, ?args, ?timeout, "no reply");
        }
        result
    }

    fn topic_lock(&self, topic: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .topic_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(topic.to_string()).or_default())
    }

    /// Current song tempo, if the session answers.
    pub async fn tempo(&self) -> Option<f64> {
        self.query(song::TEMPO, &[], self.timeout)
            .await
            .arg(0)
            .and_then(OscArg::as_f64)
    }

    /// Number of tracks, if the session answers.
    pub async fn num_tracks(&self) -> Option<i64> {
        self.song_int(song::NUM_TRACKS).await
    }

    pub async fn get_session_info(&self) -> SessionSnapshot {
        SessionSnapshot {
            tempo: self.tempo().await,
            num_tracks: self.num_tracks().await,
            num_scenes: self.song_int(song::NUM_SCENES).await,
            signature_numerator: self.song_int(song::SIGNATURE_NUMERATOR).await,
            signature_denominator: self.song_int(song::SIGNATURE_DENOMINATOR).await,
        }
    }

    /// Mixer state of one track. Each field is fetched on its own and stays
    /// `None` when its query times out.
    pub async fn get_track_info(&self, index: i32) -> TrackSnapshot {
        TrackSnapshot {
            index,
            name: self.track_field(track::NAME, index).await.and_then(|a| name_of(&a)),
            volume: self.track_field(track::VOLUME, index).await.and_then(|a| a.as_f64()),
            panning: self.track_field(track::PANNING, index).await.and_then(|a| a.as_f64()),
            mute: self.track_field(track::MUTE, index).await.and_then(|a| a.as_bool()),
            solo: self.track_field(track::SOLO, index).await.and_then(|a| a.as_bool()),
            arm: self.track_field(track::ARM, index).await.and_then(|a| a.as_bool()),
        }
    }

    /// Value of a `[track, value]` reply.
    async fn track_field(&self, topic: &str, index: i32) -> Option<OscArg> {
        self.query_echoed(topic, &[OscArg::Int(index)], self.timeout)
            .await
            .arg(1)
            .cloned()
    }

    /// Every track, one after another. Empty if the track count is unknown.
    pub async fn get_all_tracks(&self) -> Vec<TrackSnapshot> {
        let Some(count) = self.num_tracks().await else {
            return Vec::new();
        };

        let count = i32::try_from(count.max(0)).unwrap_or(0);
        let mut tracks = Vec::with_capacity(count as usize);
        for index in 0..count {
            tracks.push(self.get_track_info(index).await);
        }
        tracks
    }

    /// Clip slots of a track. Empty if the track does not answer.
    pub async fn get_clip_slots(&self, track_index: i32) -> Vec<ClipSnapshot> {
        let reply = self
            .query_echoed(track::CLIP_NAMES, &[OscArg::Int(track_index)], self.timeout)
            .await;

        reply
            .tail(1)
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(slot, arg)| ClipSnapshot {
                slot,
                name: name_of(arg),
            })
            .collect()
    }

    pub async fn get_devices(&self, track_index: i32) -> Vec<DeviceSnapshot> {
        let reply = self
            .query_echoed(track::DEVICE_NAMES, &[OscArg::Int(track_index)], self.timeout)
            .await;

        reply
            .tail(1)
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(index, arg)| DeviceSnapshot {
                index,
                name: name_of(arg).unwrap_or_default(),
            })
            .collect()
    }

    /// Parameters of one device. Names drive the list; a value is `None`
    /// when the value reply is missing or shorter than the name reply.
    pub async fn get_device_params(&self, track_index: i32, device_index: i32) -> Vec<ParameterSnapshot> {
        let idx = [OscArg::Int(track_index), OscArg::Int(device_index)];

        let names = self
            .query_echoed(device::PARAMETER_NAMES, &idx, self.timeout)
            .await;
        let Some(names) = names.tail(2) else {
            return Vec::new();
        };

        let values = self
            .query_echoed(device::PARAMETER_VALUES, &idx, self.timeout)
            .await;
        let values = values.tail(2).unwrap_or_default();

        names
            .iter()
            .enumerate()
            .map(|(index, name)| ParameterSnapshot {
                index,
                name: name_of(name).unwrap_or_default(),
                value: values.get(index).and_then(OscArg::as_f64).map(round4),
            })
            .collect()
    }

    async fn song_int(&self, topic: &str) -> Option<i64> {
        self.query(topic, &[], self.timeout)
            .await
            .arg(0)
            .and_then(OscArg::as_i64)
    }
}

/// Whether `payload` starts with the request's index arguments.
/// Numeric arguments compare by value so `Int(1)` matches `Float(1.0)`.
fn echoes(prefix: &[OscArg], payload: &Payload) -> bool {
    payload.len() >= prefix.len()
        && prefix
            .iter()
            .zip(payload.iter())
            .all(|(sent, got)| match (sent.as_i64(), got.as_i64()) {
                (Some(a), Some(b)) => a == b,
                _ => sent == got,
            })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_prefix_matching() {
        let payload = vec![OscArg::Int(2), OscArg::Int(0), OscArg::Str("Gain".into())];
        assert!(echoes(&[OscArg::Int(2)], &payload));
        assert!(echoes(&[OscArg::Int(2), OscArg::Int(0)], &payload));
        assert!(!echoes(&[OscArg::Int(1)], &payload));
        assert!(echoes(&[], &payload));
        assert!(!echoes(&[OscArg::Int(2)], &vec![]));
        assert!(echoes(&[OscArg::Int(3)], &vec![OscArg::Float(3.0)]));
    }
}
