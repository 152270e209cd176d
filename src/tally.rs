use serde::{Deserialize, Serialize};

use crate::models::{EventKind, Rating, StatusEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    pub fn event(&self) -> EventKind {
        match self {
            Decision::Accept => EventKind::InitiallyAccepted,
            Decision::Reject => EventKind::InitiallyRejected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub up_votes: u32,
    pub down_votes: u32,
    /// Share of all contributors who voted up; reported, not decisive.
    pub up_votes_percentage: f64,
    pub decision: Decision,
}

/// Counts the votes in a status history. Net-positive votes accept.
pub fn tally(statuses: &[StatusEvent], contributor_count: usize) -> Tally {
    let count = |rating: Rating| {
        statuses
            .iter()
            .filter(|status| status.event == EventKind::VoteAdded && status.rating == Some(rating))
            .count() as u32
    };
    let up_votes = count(Rating::Up);
    let down_votes = count(Rating::Down);
    let up_votes_percentage = 100.0 * f64::from(up_votes) / contributor_count.max(1) as f64;
    let decision = if up_votes > down_votes {
        Decision::Accept
    } else {
        Decision::Reject
    };

    Tally {
        up_votes,
        down_votes,
        up_votes_percentage,
        decision,
    }
}

impl Tally {
    /// The `votesCalculated` marker carrying this tally's counts.
    pub fn to_event(&self) -> StatusEvent {
        let mut event = StatusEvent::new(EventKind::VotesCalculated);
        event.up_votes = Some(self.up_votes);
        event.down_votes = Some(self.down_votes);
        event.up_votes_percentage = Some(self.up_votes_percentage);
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(up: usize, down: usize) -> Vec<StatusEvent> {
        let mut statuses = vec![StatusEvent::new(EventKind::Applied)];
        statuses.extend((0..up).map(|i| {
            StatusEvent::new(EventKind::VoteAdded)
                .by(format!("up-{i}"))
                .with_rating(Rating::Up)
        }));
        statuses.extend((0..down).map(|i| {
            StatusEvent::new(EventKind::VoteAdded)
                .by(format!("down-{i}"))
                .with_rating(Rating::Down)
        }));
        statuses
    }

    #[test]
    fn net_positive_votes_accept() {
        let result = tally(&history(3, 1), 5);
        assert_eq!(result.up_votes, 3);
        assert_eq!(result.down_votes, 1);
        assert!((result.up_votes_percentage - 60.0).abs() < 1e-9);
        assert_eq!(result.decision, Decision::Accept);
    }

    #[test]
    fn even_split_rejects() {
        let result = tally(&history(2, 2), 4);
        assert_eq!(result.decision, Decision::Reject);
    }

    #[test]
    fn no_contributors_does_not_divide_by_zero() {
        let result = tally(&history(1, 0), 0);
        assert!((result.up_votes_percentage - 100.0).abs() < 1e-9);
        assert_eq!(result.decision, Decision::Accept);
    }

    #[test]
    fn tally_is_deterministic() {
        let statuses = history(4, 3);
        assert_eq!(tally(&statuses, 9), tally(&statuses, 9));
    }

    #[test]
    fn non_vote_events_are_ignored() {
        let mut statuses = history(0, 0);
        let mut stray = StatusEvent::new(EventKind::Accepted);
        stray.rating = Some(Rating::Up);
        statuses.push(stray);
        let result = tally(&statuses, 3);
        assert_eq!(result.up_votes, 0);
        assert_eq!(result.decision, Decision::Reject);
    }
}
