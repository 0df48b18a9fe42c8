pub mod alert;
pub mod candidate;

pub use alert::{Alert, AlertStatus, ImpactLevel, Location, Priority, AUTOMATED_CREATOR};
pub use candidate::{Candidate, CandidateLocation, UpdateVerdict};
