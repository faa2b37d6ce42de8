use anyhow::Result;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::RwLock;
use serenity::model::id::GuildId;
use songbird::{
    input::{HttpRequest, Input},
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, TrackEvent,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    audio::queue::SongQueue,
    sources::{ExtractionAdapter, Song, YtDlp},
};

/// Per-guild queues and the track currently playing in each guild.
///
/// Cloning is cheap and every clone shares the same state, which is what the
/// track-end handler relies on to advance the queue.
#[derive(Clone)]
pub struct AudioPlayer {
    queues: Arc<DashMap<GuildId, Arc<RwLock<SongQueue>>>>,
    current_tracks: Arc<DashMap<GuildId, TrackHandle>>,
    extraction: Arc<ExtractionAdapter<YtDlp>>,
    http: reqwest::Client,
    max_queue_size: usize,
    volume: f32,
}

impl AudioPlayer {
    pub fn new(extractor: Arc<YtDlp>, max_queue_size: usize, volume: f32) -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            current_tracks: Arc::new(DashMap::new()),
            extraction: Arc::new(ExtractionAdapter::new(extractor)),
            http: reqwest::Client::new(),
            max_queue_size,
            volume,
        }
    }

    /// Adds a song to the guild queue without starting playback.
    pub fn enqueue(&self, guild_id: GuildId, song: Song) -> Result<()> {
        let queue = self.get_or_create_queue(guild_id);
        let mut q = queue.write();
        q.push(song)
    }

    pub fn queue_len(&self, guild_id: GuildId) -> usize {
        self.queues
            .get(&guild_id)
            .map(|queue| queue.read().len())
            .unwrap_or(0)
    }

    /// Plays the next queued song and returns it. Songs whose stream cannot be
    /// resolved are skipped. Returns `None` when the queue ran out.
    pub async fn play_next(&self, guild_id: GuildId, handler: Arc<Mutex<Call>>) -> Result<Option<Song>> {
        loop {
            let next_song = {
                let queue = self.get_or_create_queue(guild_id);
                let mut q = queue.write();
                q.next()
            };

            let Some(song) = next_song else {
                self.current_tracks.remove(&guild_id);
                debug!("Cola vacía en guild {}", guild_id);
                return Ok(None);
            };

            let stream = match self.extraction.resolve(song.url.clone(), false).next().await {
                Some(Ok(stream)) => stream,
                Some(Err(e)) => {
                    warn!("❌ No se pudo resolver el stream de {}: {}", song.url, e);
                    continue;
                }
                None => {
                    warn!("❌ No se encontró stream para {}", song.url);
                    continue;
                }
            };

            info!("🎵 Reproduciendo: {}", song.display_title());
            let input = Input::from(HttpRequest::new(self.http.clone(), stream.url.clone()));

            let track_handle = {
                let mut call = handler.lock().await;
                call.play_input(input)
            };
            let _ = track_handle.set_volume(self.volume);

            track_handle
                .add_event(
                    Event::Track(TrackEvent::End),
                    TrackEndHandler {
                        player: self.clone(),
                        guild_id,
                        handler: handler.clone(),
                    },
                )
                .map_err(|e| anyhow::anyhow!("Error al agregar event handler: {}", e))?;

            self.current_tracks.insert(guild_id, track_handle);
            return Ok(Some(Song { url: song.url, ..stream }));
        }
    }

    /// Returns `false` when nothing was playing.
    pub async fn pause(&self, guild_id: GuildId) -> Result<bool> {
        let Some(track) = self.current_track(guild_id) else {
            return Ok(false);
        };

        track.pause()?;
        info!("⏸️ Reproducción pausada en guild {}", guild_id);
        Ok(true)
    }

    pub async fn resume(&self, guild_id: GuildId) -> Result<bool> {
        let Some(track) = self.current_track(guild_id) else {
            return Ok(false);
        };

        track.play()?;
        info!("▶️ Reproducción reanudada en guild {}", guild_id);
        Ok(true)
    }

    /// Stops the current track; the track-end handler moves on to the next
    /// song.
    pub fn skip(&self, guild_id: GuildId) -> bool {
        match self.current_track(guild_id) {
            Some(track) => {
                let _ = track.stop();
                info!("⏭️ Canción saltada en guild {}", guild_id);
                true
            }
            None => false,
        }
    }

    /// Clears the queue and stops the current track.
    pub fn stop(&self, guild_id: GuildId) {
        if let Some(queue) = self.queues.get(&guild_id) {
            queue.write().clear();
        }

        if let Some((_, track)) = self.current_tracks.remove(&guild_id) {
            let _ = track.stop();
        }

        info!("⏹️ Reproducción detenida en guild {}", guild_id);
    }

    pub fn shuffle(&self, guild_id: GuildId) {
        let queue = self.get_or_create_queue(guild_id);
        let mut q = queue.write();
        q.shuffle();
    }

    pub async fn is_playing(&self, guild_id: GuildId) -> bool {
        matches!(self.play_mode(guild_id).await, Some(PlayMode::Play))
    }

    pub async fn is_paused(&self, guild_id: GuildId) -> bool {
        matches!(self.play_mode(guild_id).await, Some(PlayMode::Pause))
    }

    async fn play_mode(&self, guild_id: GuildId) -> Option<PlayMode> {
        let track = self.current_track(guild_id)?;
        track.get_info().await.ok().map(|info| info.playing)
    }

    fn current_track(&self, guild_id: GuildId) -> Option<TrackHandle> {
        self.current_tracks.get(&guild_id).map(|track| track.clone())
    }

    fn get_or_create_queue(&self, guild_id: GuildId) -> Arc<RwLock<SongQueue>> {
        self.queues
            .entry(guild_id)
            .or_insert_with(|| Arc::new(RwLock::new(SongQueue::new(self.max_queue_size))))
            .clone()
    }
}

/// Advances the queue when a track ends, was skipped or was stopped.
struct TrackEndHandler {
    player: AudioPlayer,
    guild_id: GuildId,
    handler: Arc<Mutex<Call>>,
}

#[async_trait::async_trait]
impl VoiceEventHandler for TrackEndHandler {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        debug!("Canción terminada en guild {}, reproduciendo la siguiente", self.guild_id);

        if let Err(e) = self
            .player
            .play_next(self.guild_id, self.handler.clone())
            .await
        {
            error!("Error al reproducir la siguiente canción: {:?}", e);
        }

        None
    }
}
