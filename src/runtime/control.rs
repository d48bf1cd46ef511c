//! Status reports for the CLI and tests
//!
//! Serializable snapshots of the manager and its participants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ParticipantId, ScriptId};
use super::lifecycle::Phase;

/// Manager status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerStatus {
    /// Number of tracked (non-closed) participants
    pub count: usize,

    /// Whether `dispose()` has started
    pub disposed: bool,

    /// Synthetic name reservations currently held
    pub reserved_names: usize,

    /// One entry per tracked participant
    pub participants: Vec<ParticipantSummary>,
}

impl ManagerStatus {
    /// Number of tracked participants in `phase`
    pub fn in_phase(&self, phase: Phase) -> usize {
        self.participants
            .iter()
            .filter(|summary| summary.phase == phase)
            .count()
    }
}

/// Summary of a participant for display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSummary {
    /// Participant ID
    pub id: ParticipantId,

    /// Assigned name
    pub name: String,

    /// Requested name
    pub desired_name: String,

    /// Script identifier
    pub script: ScriptId,

    /// Phase at the time of the snapshot
    pub phase: Phase,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes() {
        let status = ManagerStatus {
            count: 1,
            disposed: false,
            reserved_names: 1,
            participants: vec![ParticipantSummary {
                id: ParticipantId::new(),
                name: "Guard".to_string(),
                desired_name: "Guard".to_string(),
                script: ScriptId::new("patrol"),
                phase: Phase::Live,
                created_at: Utc::now(),
            }],
        };

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["count"], 1);
        assert_eq!(json["participants"][0]["phase"], "Live");
        assert_eq!(status.in_phase(Phase::Live), 1);
        assert_eq!(status.in_phase(Phase::Pending), 0);
    }
}
