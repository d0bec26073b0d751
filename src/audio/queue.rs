use std::{collections::VecDeque, fmt, time::Duration};
use tracing::{debug, info};

use crate::sources::Song;

/// Respuesta fija cuando se pide quitar la canción que está sonando
pub const SKIP_CURRENT_REPLY: &str = "usa /skip, tontito...";

/// Resultado de [`SongQueue::remove`]
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    /// La posición 1 es la canción actual: hay que detenerla
    SkipCurrent,
    Removed(Song),
    NothingToRemove,
}

impl fmt::Display for RemoveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoveOutcome::SkipCurrent => f.write_str(SKIP_CURRENT_REPLY),
            RemoveOutcome::Removed(song) => f.write_str(song.title()),
            RemoveOutcome::NothingToRemove => f.write_str("*zzZZZzzz...* (no hay nada que quitar)"),
        }
    }
}

/// Cola FIFO de canciones con un slot aparte para la que está sonando.
///
/// The song being opened sits in `pending` until the stream starts or fails.
/// `len() + pending + current` never exceeds `max_songs`; batches that do not
/// fit are truncated instead of rejected.
#[derive(Debug)]
pub struct SongQueue {
    items: VecDeque<Song>,
    pending: Option<Song>,
    current: Option<Song>,
    max_songs: usize,
}

impl SongQueue {
    pub fn new(max_songs: usize) -> Self {
        Self {
            items: VecDeque::new(),
            pending: None,
            current: None,
            max_songs,
        }
    }

    /// Espacio libre contando la canción actual y la que se está abriendo
    pub fn remaining(&self) -> usize {
        self.max_songs.saturating_sub(self.items.len() + self.occupied_slots())
    }

    fn occupied_slots(&self) -> usize {
        usize::from(self.pending.is_some()) + usize::from(self.current.is_some())
    }

    /// Agrega canciones respetando la capacidad. Con `front` solo entra la
    /// primera, delante de todas.
    pub fn enqueue(&mut self, songs: Vec<Song>, front: bool) -> usize {
        let remaining = self.remaining();
        if remaining == 0 || songs.is_empty() {
            debug!("Cola sin espacio o lote vacío, nada que agregar");
            return 0;
        }

        if front {
            if let Some(song) = songs.into_iter().next() {
                info!("⏫ Siguiente en la cola: {}", song.title());
                self.items.push_front(song);
                return 1;
            }
            return 0;
        }

        let to_add = songs.len().min(remaining);
        self.items.extend(songs.into_iter().take(to_add));
        info!("➕ Agregadas {} canciones a la cola", to_add);
        to_add
    }

    /// Saca la cabeza de la cola (FIFO). Sigue ocupando lugar como
    /// pendiente hasta que se llame a [`settle_pending`](Self::settle_pending).
    pub fn pop_next(&mut self) -> Option<Song> {
        let song = self.items.pop_front()?;
        self.pending = Some(song.clone());
        Some(song)
    }

    /// Termina la apertura en curso: la canción abierta pasa a ser la actual,
    /// o se libera el lugar si no se pudo abrir
    pub fn settle_pending(&mut self, opened: Option<Song>) {
        self.pending = None;
        if opened.is_some() {
            self.current = opened;
        }
    }

    pub fn pending(&self) -> Option<&Song> {
        self.pending.as_ref()
    }

    /// Descarta las primeras `n - 1` canciones; la actual la detiene quien llama
    pub fn skip(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        let dropped = (n - 1).min(self.items.len());
        self.items.drain(..dropped);
        info!("⏭️ Descartadas {} canciones de la cola", dropped);
        dropped
    }

    /// Quita la canción en la posición `position` (1 = la actual)
    pub fn remove(&mut self, position: usize) -> RemoveOutcome {
        if position <= 1 {
            return RemoveOutcome::SkipCurrent;
        }
        if position > self.items.len() + 1 {
            return RemoveOutcome::NothingToRemove;
        }

        match self.items.remove(position - 2) {
            Some(song) => {
                debug!("❌ Canción eliminada en posición {}", position);
                RemoveOutcome::Removed(song)
            }
            None => RemoveOutcome::NothingToRemove,
        }
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.pending = None;
        self.current = None;
        info!("🗑️ Cola limpiada");
    }

    pub fn set_current(&mut self, song: Option<Song>) {
        self.current = song;
    }

    pub fn current(&self) -> Option<&Song> {
        self.current.as_ref()
    }

    /// Cambia la capacidad; si la cola ya no entra se recorta por el final
    pub fn set_max_songs(&mut self, max_songs: usize) {
        self.max_songs = max_songs;

        let keep = max_songs.saturating_sub(self.occupied_slots());
        if self.items.len() > keep {
            info!("✂️ Cola recortada de {} a {} canciones", self.items.len(), keep);
            self.items.truncate(keep);
        }
    }

    pub fn max_songs(&self) -> usize {
        self.max_songs
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Song> {
        self.items.iter()
    }

    pub fn total_duration(&self) -> Duration {
        let queued: Duration = self.items.iter().filter_map(Song::duration).sum();
        queued + self.current.as_ref().and_then(Song::duration).unwrap_or_default()
    }
}
