//! Playback state machine.
//!
//! `transition` is pure: given the current state and an event it returns the
//! next state plus the side effects the session has to run. The session owns
//! the only instance and is the only caller.

use super::pipeline::StreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    /// Buscando la canción y abriendo el stream
    Buffering,
    Playing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// Se sacó la cabeza de la cola para reproducirla
    Dequeued,
    /// La búsqueda por título de una canción sin url falló
    LookupFailed,
    StreamOpened,
    StreamOpenFailed(String),
    /// Fin natural del stream (o `stop`)
    StreamEnded,
    StreamErrored(StreamError),
    /// Teardown: se vacía todo sin avanzar
    Reset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEffect {
    AnnounceNowPlaying,
    NotifyOpenFailure(String),
    NotifyStreamError(String),
    DeleteNowPlaying,
    ClearCurrent,
    Advance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: PlaybackState,
    pub effects: Vec<PlaybackEffect>,
}

impl Transition {
    fn to(next: PlaybackState, effects: Vec<PlaybackEffect>) -> Self {
        Self { next, effects }
    }

    fn stay(state: PlaybackState) -> Self {
        Self { next: state, effects: Vec::new() }
    }

    pub fn advances(&self) -> bool {
        self.effects.contains(&PlaybackEffect::Advance)
    }
}

pub fn transition(state: PlaybackState, event: PlaybackEvent) -> Transition {
    use PlaybackEffect::*;
    use PlaybackState::*;

    match (state, event) {
        (Idle, PlaybackEvent::Dequeued) => Transition::to(Buffering, vec![]),

        (Buffering, PlaybackEvent::StreamOpened) => Transition::to(Playing, vec![AnnounceNowPlaying]),
        (Buffering, PlaybackEvent::LookupFailed) => Transition::to(Idle, vec![Advance]),
        (Buffering, PlaybackEvent::StreamOpenFailed(error)) => {
            Transition::to(Idle, vec![NotifyOpenFailure(error), Advance])
        }

        (Playing, PlaybackEvent::StreamEnded) => {
            Transition::to(Idle, vec![DeleteNowPlaying, ClearCurrent, Advance])
        }
        (Playing, PlaybackEvent::StreamErrored(error)) => {
            let mut effects = Vec::with_capacity(4);
            // El cierre prematuro es lo esperado al hacer teardown
            if !error.premature_close {
                effects.push(NotifyStreamError(error.message));
            }
            effects.extend([DeleteNowPlaying, ClearCurrent, Advance]);
            Transition::to(Idle, effects)
        }

        (_, PlaybackEvent::Reset) => Transition::to(Idle, vec![DeleteNowPlaying, ClearCurrent]),

        // Eventos tardíos de un stream que ya no está activo
        (state, _) => Transition::stay(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::PlaybackEffect::*;
    use super::PlaybackState::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn happy_path_cycle() {
        let t = transition(Idle, PlaybackEvent::Dequeued);
        assert_eq!(t.next, Buffering);
        assert!(t.effects.is_empty());

        let t = transition(Buffering, PlaybackEvent::StreamOpened);
        assert_eq!(t, Transition::to(Playing, vec![AnnounceNowPlaying]));

        let t = transition(Playing, PlaybackEvent::StreamEnded);
        assert_eq!(t, Transition::to(Idle, vec![DeleteNowPlaying, ClearCurrent, Advance]));
    }

    #[test]
    fn open_failure_notifies_and_advances() {
        let t = transition(Buffering, PlaybackEvent::StreamOpenFailed("403".into()));
        assert_eq!(t.next, Idle);
        assert_eq!(t.effects, vec![NotifyOpenFailure("403".into()), Advance]);
    }

    #[test]
    fn lookup_failure_advances_silently() {
        let t = transition(Buffering, PlaybackEvent::LookupFailed);
        assert_eq!(t.effects, vec![Advance]);
    }

    #[test]
    fn premature_close_is_not_reported() {
        let benign = StreamError { message: "closed".into(), premature_close: true };
        let t = transition(Playing, PlaybackEvent::StreamErrored(benign));
        assert_eq!(t.effects, vec![DeleteNowPlaying, ClearCurrent, Advance]);

        let real = StreamError { message: "decode".into(), premature_close: false };
        let t = transition(Playing, PlaybackEvent::StreamErrored(real));
        assert_eq!(t.effects[0], NotifyStreamError("decode".into()));
        assert!(t.advances());
    }

    #[test]
    fn stale_events_are_ignored() {
        assert_eq!(transition(Idle, PlaybackEvent::StreamEnded), Transition::stay(Idle));
        assert_eq!(transition(Buffering, PlaybackEvent::StreamEnded), Transition::stay(Buffering));
        assert_eq!(transition(Playing, PlaybackEvent::Dequeued), Transition::stay(Playing));
    }

    #[test]
    fn reset_never_advances() {
        for state in [Idle, Buffering, Playing] {
            let t = transition(state, PlaybackEvent::Reset);
            assert_eq!(t.next, Idle);
            assert!(!t.advances());
        }
    }
}
