//! Lifecycle seam for the long-running feed components the binary
//! supervises: today the vendor ingestion pair (websocket session plus
//! backfill loop), with the same surface left open for future feeds.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Start/stop/health surface a supervised feed component exposes.
pub trait FeedEngine: Send + Sync {
    fn start(&self) -> EngineResult<()>;
    fn stop(&self) -> EngineResult<()>;
    fn health(&self) -> FeedHealth;
}

/// Where a feed component sits in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedState {
    /// Constructed; nothing spawned yet.
    Idle,
    /// Spawning tasks and dialing the vendor.
    Starting,
    /// Streaming and backfilling normally.
    Live,
    /// Still running, but the current session or cycle is erroring.
    Degraded,
    /// Shut down, on request or after giving up.
    Stopped,
}

impl FeedState {
    pub fn label(self) -> &'static str {
        match self {
            FeedState::Idle => "idle",
            FeedState::Starting => "starting",
            FeedState::Live => "live",
            FeedState::Degraded => "degraded",
            FeedState::Stopped => "stopped",
        }
    }
}

/// Point-in-time state of a component plus an operator-facing note.
#[derive(Clone, Debug)]
pub struct FeedHealth {
    pub state: FeedState,
    pub note: Option<String>,
}

impl FeedHealth {
    pub fn idle() -> Self {
        Self {
            state: FeedState::Idle,
            note: None,
        }
    }

    pub fn starting() -> Self {
        Self {
            state: FeedState::Starting,
            note: None,
        }
    }

    pub fn live(note: impl Into<String>) -> Self {
        Self {
            state: FeedState::Live,
            note: Some(note.into()),
        }
    }

    pub fn degraded(note: impl Into<String>) -> Self {
        Self {
            state: FeedState::Degraded,
            note: Some(note.into()),
        }
    }

    pub fn stopped(note: impl Into<String>) -> Self {
        Self {
            state: FeedState::Stopped,
            note: Some(note.into()),
        }
    }

    pub fn is_live(&self) -> bool {
        self.state == FeedState::Live
    }
}

impl Default for FeedHealth {
    fn default() -> Self {
        Self::idle()
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("feed engine already started")]
    AlreadyStarted,
    #[error("feed engine not started")]
    NotStarted,
    #[error("feed engine startup failed: {source}")]
    Startup {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl EngineError {
    pub fn startup(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        EngineError::Startup {
            source: source.into(),
        }
    }
}
