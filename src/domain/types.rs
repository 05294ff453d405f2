//! Shared domain enumerations aligned with persisted database enums.

use serde::{Deserialize, Serialize};

/// Lifecycle of a capture record.
///
/// `Queued` is initial; `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "capture_status", rename_all = "snake_case")]
pub enum CaptureStatus {
    Queued,
    Rendering,
    Hashing,
    Storing,
    Recording,
    Succeeded,
    Failed,
}

impl CaptureStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CaptureStatus::Queued => "queued",
            CaptureStatus::Rendering => "rendering",
            CaptureStatus::Hashing => "hashing",
            CaptureStatus::Storing => "storing",
            CaptureStatus::Recording => "recording",
            CaptureStatus::Succeeded => "succeeded",
            CaptureStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CaptureStatus::Succeeded | CaptureStatus::Failed)
    }

    /// Position in the pipeline. Terminal states share the highest rank so a
    /// terminal record can never be replaced by another state.
    pub fn rank(self) -> i16 {
        match self {
            CaptureStatus::Queued => 0,
            CaptureStatus::Rendering => 1,
            CaptureStatus::Hashing => 2,
            CaptureStatus::Storing => 3,
            CaptureStatus::Recording => 4,
            CaptureStatus::Succeeded | CaptureStatus::Failed => 5,
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: CaptureStatus) -> bool {
        use CaptureStatus::*;

        matches!(
            (self, next),
            (Queued, Rendering)
                | (Rendering, Hashing)
                | (Rendering, Failed)
                | (Hashing, Storing)
                | (Storing, Recording)
                | (Storing, Failed)
                | (Recording, Succeeded)
                | (Recording, Failed)
        )
    }

    /// Whether a persisted record in state `self` may be overwritten by a
    /// write carrying `next`. Same-state rewrites are allowed for
    /// non-terminal states (attempt bookkeeping); terminal states are final.
    pub fn accepts_write_of(self, next: CaptureStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }
}

impl TryFrom<&str> for CaptureStatus {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "queued" => Ok(CaptureStatus::Queued),
            "rendering" => Ok(CaptureStatus::Rendering),
            "hashing" => Ok(CaptureStatus::Hashing),
            "storing" => Ok(CaptureStatus::Storing),
            "recording" => Ok(CaptureStatus::Recording),
            "succeeded" => Ok(CaptureStatus::Succeeded),
            "failed" => Ok(CaptureStatus::Failed),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "artifact_format", rename_all = "snake_case")]
pub enum ArtifactFormat {
    Pdf,
    Png,
}

impl ArtifactFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactFormat::Pdf => "pdf",
            ArtifactFormat::Png => "png",
        }
    }

    pub fn extension(self) -> &'static str {
        self.as_str()
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ArtifactFormat::Pdf => "application/pdf",
            ArtifactFormat::Png => "image/png",
        }
    }
}

impl TryFrom<&str> for ArtifactFormat {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(ArtifactFormat::Pdf),
            "png" => Ok(ArtifactFormat::Png),
            _ => Err(()),
        }
    }
}

/// Page readiness signal the renderer waits for before producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    Load,
    DomContentLoaded,
    #[default]
    NetworkIdle,
}

impl WaitStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            WaitStrategy::Load => "load",
            WaitStrategy::DomContentLoaded => "dom_content_loaded",
            WaitStrategy::NetworkIdle => "network_idle",
        }
    }
}

impl TryFrom<&str> for WaitStrategy {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "load" => Ok(WaitStrategy::Load),
            "dom_content_loaded" | "domcontentloaded" => Ok(WaitStrategy::DomContentLoaded),
            "network_idle" | "networkidle" => Ok(WaitStrategy::NetworkIdle),
            _ => Err(()),
        }
    }
}

/// Failure classification carried on FAILED records and dead letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    TransientRender,
    PermanentRender,
    StoreConflict,
    StoreWrite,
    LedgerWrite,
    IntegrityMismatch,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::TransientRender => "transient_render",
            ErrorKind::PermanentRender => "permanent_render",
            ErrorKind::StoreConflict => "store_conflict",
            ErrorKind::StoreWrite => "store_write",
            ErrorKind::LedgerWrite => "ledger_write",
            ErrorKind::IntegrityMismatch => "integrity_mismatch",
        }
    }
}

impl TryFrom<&str> for ErrorKind {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "validation" => Ok(ErrorKind::Validation),
            "transient_render" => Ok(ErrorKind::TransientRender),
            "permanent_render" => Ok(ErrorKind::PermanentRender),
            "store_conflict" => Ok(ErrorKind::StoreConflict),
            "store_write" => Ok(ErrorKind::StoreWrite),
            "ledger_write" => Ok(ErrorKind::LedgerWrite),
            "integrity_mismatch" => Ok(ErrorKind::IntegrityMismatch),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_allowed() {
        let path = [
            CaptureStatus::Queued,
            CaptureStatus::Rendering,
            CaptureStatus::Hashing,
            CaptureStatus::Storing,
            CaptureStatus::Recording,
            CaptureStatus::Succeeded,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{:?} -> {:?} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn failure_only_reachable_from_retrying_steps() {
        assert!(CaptureStatus::Rendering.can_transition_to(CaptureStatus::Failed));
        assert!(CaptureStatus::Storing.can_transition_to(CaptureStatus::Failed));
        assert!(CaptureStatus::Recording.can_transition_to(CaptureStatus::Failed));
        assert!(!CaptureStatus::Queued.can_transition_to(CaptureStatus::Failed));
        assert!(!CaptureStatus::Hashing.can_transition_to(CaptureStatus::Failed));
    }

    #[test]
    fn terminal_states_never_accept_writes() {
        for next in [
            CaptureStatus::Rendering,
            CaptureStatus::Failed,
            CaptureStatus::Succeeded,
        ] {
            assert!(!CaptureStatus::Succeeded.accepts_write_of(next));
            assert!(!CaptureStatus::Failed.accepts_write_of(next));
        }
        assert!(CaptureStatus::Rendering.accepts_write_of(CaptureStatus::Rendering));
        assert!(!CaptureStatus::Storing.accepts_write_of(CaptureStatus::Rendering));
    }

    #[test]
    fn format_parsing_is_case_insensitive() {
        assert_eq!(ArtifactFormat::try_from("PDF"), Ok(ArtifactFormat::Pdf));
        assert_eq!(ArtifactFormat::try_from(" png "), Ok(ArtifactFormat::Png));
        assert!(ArtifactFormat::try_from("jpeg").is_err());
    }
}
