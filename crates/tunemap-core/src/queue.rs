//! Pure index arithmetic over an ordered list of localities.
//!
//! The audio engine sees one linear queue: every locality's tracks,
//! concatenated in order.  Items are addressed by a composite id
//! `"<locality_id>:<track_id>"` because track ids are only unique inside
//! their locality.  Nothing here does I/O.

use serde::{Deserialize, Serialize};
use tunemap_proto::protocol::{Locality, Track};

/// One entry of the engine queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub url: String,
    pub title: String,
    pub artist: String,
    pub artwork: Option<String>,
}

impl QueueItem {
    pub fn new(locality: &Locality, track: &Track) -> Self {
        Self {
            id: composite_id(&locality.locality_id, &track.track_id),
            url: track.preview_url.clone(),
            title: track.name.clone(),
            artist: track.artists.join(", "),
            artwork: track.cover.best().map(str::to_string),
        }
    }
}

/// `(locality index, track index)` into the session's locality list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueuePosition {
    pub locality: usize,
    pub track: usize,
}

impl QueuePosition {
    pub fn new(locality: usize, track: usize) -> Self {
        Self { locality, track }
    }
}

pub fn composite_id(locality_id: &str, track_id: &str) -> String {
    format!("{locality_id}:{track_id}")
}

/// Split a composite id into `(locality_id, track_id)`.  Locality ids never
/// contain `:`, so the first separator is the boundary.
pub fn split_composite_id(id: &str) -> Option<(&str, &str)> {
    id.split_once(':')
}

pub fn create_queue(localities: &[Locality]) -> Vec<QueueItem> {
    localities
        .iter()
        .flat_map(|locality| {
            locality
                .tracks
                .iter()
                .map(move |track| QueueItem::new(locality, track))
        })
        .collect()
}

/// Offset of `(locality_index, track_index)` in the flattened queue.
/// An empty list yields 0; callers must not address an empty queue.
pub fn calculate_flat_index(
    locality_index: usize,
    track_index: usize,
    localities: &[Locality],
) -> usize {
    localities
        .iter()
        .take(locality_index)
        .map(|l| l.tracks.len())
        .sum::<usize>()
        + track_index
}

pub fn track_count(localities: &[Locality]) -> usize {
    localities.iter().map(|l| l.tracks.len()).sum()
}

/// First occurrence of `track_id` in locality-then-track order.
pub fn try_restore_position(localities: &[Locality], track_id: &str) -> Option<QueuePosition> {
    localities.iter().enumerate().find_map(|(li, locality)| {
        locality
            .tracks
            .iter()
            .position(|t| t.track_id == track_id)
            .map(|ti| QueuePosition::new(li, ti))
    })
}

/// Resolve a composite id against the locality list.
pub fn find_position(localities: &[Locality], id: &str) -> Option<QueuePosition> {
    let (locality_id, track_id) = split_composite_id(id)?;
    let li = localities
        .iter()
        .position(|l| l.locality_id == locality_id)?;
    let ti = localities[li]
        .tracks
        .iter()
        .position(|t| t.track_id == track_id)?;
    Some(QueuePosition::new(li, ti))
}

pub fn track_at<'a>(localities: &'a [Locality], pos: QueuePosition) -> Option<&'a Track> {
    localities.get(pos.locality)?.tracks.get(pos.track)
}

// ── traversal ─────────────────────────────────────────────────────────────────
//
// All four wrap around the ends of the list.  Every locality is assumed to
// hold at least one track; `None` means there is nothing to move to.

pub fn next_track(pos: QueuePosition, localities: &[Locality]) -> Option<QueuePosition> {
    let current = localities.get(pos.locality)?;
    if pos.track + 1 < current.tracks.len() {
        return Some(QueuePosition::new(pos.locality, pos.track + 1));
    }
    Some(QueuePosition::new((pos.locality + 1) % localities.len(), 0))
}

pub fn previous_track(pos: QueuePosition, localities: &[Locality]) -> Option<QueuePosition> {
    localities.get(pos.locality)?;
    if pos.track > 0 {
        return Some(QueuePosition::new(pos.locality, pos.track - 1));
    }
    let li = (pos.locality + localities.len() - 1) % localities.len();
    let last = localities[li].tracks.len().checked_sub(1)?;
    Some(QueuePosition::new(li, last))
}

pub fn next_locality(pos: QueuePosition, localities: &[Locality]) -> Option<QueuePosition> {
    localities.get(pos.locality)?;
    Some(QueuePosition::new((pos.locality + 1) % localities.len(), 0))
}

pub fn previous_locality(pos: QueuePosition, localities: &[Locality]) -> Option<QueuePosition> {
    localities.get(pos.locality)?;
    let li = (pos.locality + localities.len() - 1) % localities.len();
    Some(QueuePosition::new(li, 0))
}
