//! Playback session and map-grid engines for the tunemap client.
//!
//! Two single-owner event loops live here:
//!
//! - [`session::SessionController`]: the cross-locality player session,
//!   kept in lockstep with an external [`engine::AudioEngine`] queue.
//! - [`viewport::MapViewportController`]: camera/lock state driving the
//!   grid-cached [`fetch::FetchCoordinator`].
//!
//! Everything outside the process (REST API, audio engine, location fixes,
//! reverse geocoding) is reached through the traits in [`api`], [`engine`],
//! [`location`] and [`geocode`].

pub mod api;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod geocode;
pub mod grid;
pub mod location;
pub mod queue;
pub mod session;
pub mod timer;
pub mod viewport;
