use crate::models::request::{RequestEvent, RequestStatus};

pub const INITIAL_STATUS: RequestStatus = RequestStatus::Draft;

/// Outgoing edges of the request lifecycle. Forward progress is linear;
/// every non-terminal state except DELIVERED may also cancel.
pub fn allowed_transitions(from: RequestStatus) -> &'static [RequestStatus] {
    use RequestStatus::*;

    match from {
        Draft => &[Submitted, Cancelled],
        Submitted => &[Assigned, Cancelled],
        Assigned => &[PickedUp, Cancelled],
        PickedUp => &[Delivered, Cancelled],
        Delivered => &[Completed],
        Completed | Cancelled => &[],
    }
}

pub fn can_transition(from: RequestStatus, to: RequestStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

/// Same predicate over raw status strings. Unknown values have no edges.
pub fn can_transition_str(from: &str, to: &str) -> bool {
    match (from.parse::<RequestStatus>(), to.parse::<RequestStatus>()) {
        (Ok(from), Ok(to)) => can_transition(from, to),
        _ => false,
    }
}

pub fn is_terminal(status: RequestStatus) -> bool {
    allowed_transitions(status).is_empty()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayError {
    pub position: usize,
    pub from: RequestStatus,
    pub to: RequestStatus,
}

/// Folds an event log over the initial state, failing at the first event
/// whose edge is not in the table.
pub fn replay(events: &[RequestEvent]) -> Result<RequestStatus, ReplayError> {
    events
        .iter()
        .enumerate()
        .try_fold(INITIAL_STATUS, |current, (position, event)| {
            if can_transition(current, event.event_type) {
                Ok(event.event_type)
            } else {
                Err(ReplayError {
                    position,
                    from: current,
                    to: event.event_type,
                })
            }
        })
}
