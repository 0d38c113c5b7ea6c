use std::convert::TryFrom;
use tokio::time::Duration;

/// Tunables for a node. Every `None` falls back to the documented default.
#[derive(Clone, Default)]
pub struct RaftOptions {
    /// Lower bound of the randomized election timeout. Default 150ms.
    pub election_timeout_min: Option<Duration>,
    /// Upper bound of the randomized election timeout. Default 300ms.
    pub election_timeout_max: Option<Duration>,
    /// Leader heartbeat period. Must stay below `election_timeout_min`. Default 50ms.
    pub heartbeat_interval: Option<Duration>,
    /// Max entries per AppendEntries batch. Default 5.
    pub append_entries_batch_size: Option<usize>,
    /// Publish `TestEvent`s for test observation. Default off.
    pub publish_testing_events: bool,
}

pub(crate) struct RaftOptionsValidated {
    pub(crate) election_timeout_min: Duration,
    pub(crate) election_timeout_max: Duration,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) append_entries_batch_size: usize,
    pub(crate) publish_testing_events: bool,
}

impl RaftOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.heartbeat_interval >= self.election_timeout_min {
            return Err("Heartbeat interval must be less than the minimum election timeout");
        }
        if self.election_timeout_min > self.election_timeout_max {
            return Err("Minimum election timeout must not exceed the maximum");
        }
        if self.append_entries_batch_size == 0 {
            return Err("AppendEntries batch size must be at least 1");
        }

        Ok(())
    }
}

impl TryFrom<RaftOptions> for RaftOptionsValidated {
    type Error = &'static str;

    fn try_from(options: RaftOptions) -> Result<Self, Self::Error> {
        let values = RaftOptionsValidated {
            election_timeout_min: options.election_timeout_min.unwrap_or(Duration::from_millis(150)),
            election_timeout_max: options.election_timeout_max.unwrap_or(Duration::from_millis(300)),
            heartbeat_interval: options.heartbeat_interval.unwrap_or(Duration::from_millis(50)),
            append_entries_batch_size: options.append_entries_batch_size.unwrap_or(5),
            publish_testing_events: options.publish_testing_events,
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let validated = RaftOptionsValidated::try_from(RaftOptions::default()).unwrap();

        assert_eq!(validated.election_timeout_min, Duration::from_millis(150));
        assert_eq!(validated.election_timeout_max, Duration::from_millis(300));
        assert_eq!(validated.heartbeat_interval, Duration::from_millis(50));
        assert_eq!(validated.append_entries_batch_size, 5);
        assert!(!validated.publish_testing_events);
    }

    #[test]
    fn heartbeat_must_undercut_election_timeout() {
        let options = RaftOptions {
            heartbeat_interval: Some(Duration::from_millis(150)),
            ..RaftOptions::default()
        };

        assert!(RaftOptionsValidated::try_from(options).is_err());
    }

    #[test]
    fn inverted_timeout_range_is_rejected() {
        let options = RaftOptions {
            election_timeout_min: Some(Duration::from_millis(400)),
            election_timeout_max: Some(Duration::from_millis(300)),
            ..RaftOptions::default()
        };

        assert!(RaftOptionsValidated::try_from(options).is_err());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let options = RaftOptions {
            append_entries_batch_size: Some(0),
            ..RaftOptions::default()
        };

        assert!(RaftOptionsValidated::try_from(options).is_err());
    }
}
