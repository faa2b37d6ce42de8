use anyhow::Result;
use rand::seq::SliceRandom;
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::sources::Song;

/// Per-guild song queue.
///
/// Songs are taken from the back: the most recently pushed song plays first.
/// Resolvers that push whole playlists therefore push them last-track-first.
#[derive(Debug)]
pub struct SongQueue {
    items: VecDeque<Song>,
    max_size: usize,
}

impl SongQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    /// Adds a song, failing when the queue is full.
    pub fn push(&mut self, song: Song) -> Result<()> {
        if self.items.len() >= self.max_size {
            anyhow::bail!("La cola está llena (máximo {} canciones)", self.max_size);
        }

        debug!("➕ Agregado a la cola: {}", song.display_title());
        self.items.push_back(song);
        Ok(())
    }

    /// Takes the next song to play.
    pub fn next(&mut self) -> Option<Song> {
        let next = self.items.pop_back();
        match &next {
            Some(song) => info!("➡️ Siguiente en la cola: {}", song.display_title()),
            None => info!("📭 Cola vacía, nada que reproducir"),
        }
        next
    }

    pub fn shuffle(&mut self) {
        let mut rng = rand::thread_rng();
        self.items.make_contiguous().shuffle(&mut rng);
        info!("🔀 Cola mezclada");
    }

    pub fn clear(&mut self) {
        self.items.clear();
        info!("🗑️ Cola limpiada");
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}
