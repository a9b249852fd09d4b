use chunklift_protocol::UploadStatus;

use crate::TransferError;

/// Named transitions of an upload session.
///
/// Every mutation of a session's lifecycle goes through one of these; the
/// session forwards each applied event to its subscriber, if any.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started,
    ChunkSucceeded { index: usize, bytes: u64 },
    ChunkFailed {
        index: usize,
        attempt: u32,
        error: String,
    },
    AllChunksDone,
    Paused,
    Resumed,
    Cancelled,
    Failed { error: String },
}

impl SessionEvent {
    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::ChunkSucceeded { .. } => "chunk_succeeded",
            Self::ChunkFailed { .. } => "chunk_failed",
            Self::AllChunksDone => "all_chunks_done",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::Cancelled => "cancelled",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Returns the status reached by applying `event` in `current`.
///
/// Terminal states accept nothing. Chunks already in flight may settle
/// while the session is paused, so chunk events and completion are legal
/// from `Paused` as well as `Running`.
pub fn next_status(
    current: UploadStatus,
    event: &SessionEvent,
) -> Result<UploadStatus, TransferError> {
    use SessionEvent as E;
    use UploadStatus as S;

    let next = match (current, event) {
        (S::Completed | S::Failed | S::Cancelled, _) => None,

        (_, E::Cancelled) => Some(S::Cancelled),
        (_, E::Failed { .. }) => Some(S::Failed),

        (S::Created, E::Started) => Some(S::Running),
        (S::Created, E::Paused) => Some(S::Created),
        (S::Created, E::Resumed) => Some(S::Created),

        (S::Running, E::Paused) => Some(S::Paused),
        (S::Running, E::Resumed) => Some(S::Running),
        (S::Running, E::ChunkSucceeded { .. } | E::ChunkFailed { .. }) => Some(S::Running),
        (S::Running, E::AllChunksDone) => Some(S::Completed),

        (S::Paused, E::Paused) => Some(S::Paused),
        (S::Paused, E::Resumed) => Some(S::Running),
        (S::Paused, E::ChunkSucceeded { .. } | E::ChunkFailed { .. }) => Some(S::Paused),
        (S::Paused, E::AllChunksDone) => Some(S::Completed),

        _ => None,
    };

    next.ok_or(TransferError::InvalidTransition {
        from: current,
        event: event.name(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionEvent as E;
    use UploadStatus as S;

    fn ok(from: S, event: E) -> S {
        next_status(from, &event).unwrap()
    }

    #[test]
    fn happy_path() {
        let s = ok(S::Created, E::Started);
        assert_eq!(s, S::Running);
        let s = ok(s, E::ChunkSucceeded { index: 0, bytes: 10 });
        assert_eq!(s, S::Running);
        assert_eq!(ok(s, E::AllChunksDone), S::Completed);
    }

    #[test]
    fn pause_resume_cycle() {
        let s = ok(S::Running, E::Paused);
        assert_eq!(s, S::Paused);
        assert_eq!(ok(s, E::ChunkSucceeded { index: 1, bytes: 1 }), S::Paused);
        assert_eq!(ok(s, E::Resumed), S::Running);
    }

    #[test]
    fn pause_before_start_keeps_created() {
        // The paused flag carries it; `Started` then lands in `Running`.
        assert_eq!(ok(S::Created, E::Paused), S::Created);
        assert_eq!(ok(S::Created, E::Resumed), S::Created);
        assert!(next_status(S::Paused, &E::Started).is_err());
    }

    #[test]
    fn cancel_and_fail_from_any_live_state() {
        for from in [S::Created, S::Running, S::Paused] {
            assert_eq!(ok(from, E::Cancelled), S::Cancelled);
            assert_eq!(ok(from, E::Failed { error: "x".into() }), S::Failed);
        }
    }

    #[test]
    fn terminal_states_reject_everything() {
        for from in [S::Completed, S::Failed, S::Cancelled] {
            for event in [E::Started, E::Resumed, E::Paused, E::Cancelled, E::AllChunksDone] {
                assert!(next_status(from, &event).is_err(), "{from:?} accepted {event:?}");
            }
        }
    }

    #[test]
    fn created_rejects_chunk_events() {
        assert!(next_status(S::Created, &E::ChunkSucceeded { index: 0, bytes: 1 }).is_err());
        assert!(next_status(S::Created, &E::AllChunksDone).is_err());
    }

    #[test]
    fn error_names_event() {
        let err = next_status(S::Cancelled, &E::Resumed).unwrap_err();
        assert_eq!(err.to_string(), "invalid transition from Cancelled on resumed");
    }
}
