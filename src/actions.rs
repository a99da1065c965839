use crate::session::PollResult;

/// Messages sent from the poll loop to its consumer
#[derive(Debug, Clone)]
pub enum Action {
    /// A poll cycle finished; one entry per submitted session
    PollCompleted(PollResult),
    /// Sessions dropped from the registry; their trackers were discarded
    SessionsEvicted(Vec<String>),
}
