use crate::models::AlertStatus;

/// Confidence cut-offs for the initial lifecycle status.
#[derive(Debug, Clone, Copy)]
pub struct TriageClassifier {
    pub approve_at: f64,
    pub pending_at: f64,
}

impl Default for TriageClassifier {
    fn default() -> Self {
        Self {
            approve_at: 0.9,
            pending_at: 0.5,
        }
    }
}

impl TriageClassifier {
    pub fn new(approve_at: f64, pending_at: f64) -> Self {
        Self {
            approve_at,
            pending_at,
        }
    }

    pub fn classify(&self, confidence: f64) -> AlertStatus {
        if confidence >= self.approve_at {
            AlertStatus::Approved
        } else if confidence >= self.pending_at {
            AlertStatus::Pending
        } else {
            AlertStatus::Rejected
        }
    }
}
