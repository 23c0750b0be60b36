//! Message filtering: match rules on NMEA0183 and NMEA2000 traffic plus
//! time based throttling, combined into per-publisher filter sets.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::FilterConfig;
use crate::envelope::Envelope;

/// What to do with a message matched by a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Select,
    Discard,
}

/// Passes one message per period per (PGN, source) tuple.
#[derive(Debug)]
struct TimeGate {
    period: Duration,
    last_pass: HashMap<(u32, u8), Instant>,
}

impl TimeGate {
    fn new(period: Duration) -> Self {
        Self {
            period,
            last_pass: HashMap::new(),
        }
    }

    fn check(&mut self, pgn: u32, sa: u8, now: Instant) -> bool {
        match self.last_pass.get_mut(&(pgn, sa)) {
            Some(last) => {
                if now.duration_since(*last) >= self.period {
                    *last = now;
                    true
                } else {
                    false
                }
            }
            None => {
                self.last_pass.insert((pgn, sa), now);
                true
            }
        }
    }
}

/// A single configured filter.
#[derive(Debug)]
pub enum Filter {
    Nmea0183 {
        name: String,
        action: FilterAction,
        talkers: Vec<String>,
        formatters: Vec<String>,
    },
    Nmea2000 {
        name: String,
        action: FilterAction,
        sources: Vec<u8>,
        pgns: Vec<u32>,
        manufacturer_id: Option<u16>,
        time_gate: Option<TimeGate>,
    },
}

impl Filter {
    /// Build from configuration. Returns `None` for a filter with no
    /// usable criteria, which the original treats as disabled.
    pub fn from_config(config: &FilterConfig) -> Option<Filter> {
        let action = if config.action == "select" {
            FilterAction::Select
        } else {
            FilterAction::Discard
        };
        match config.kind.as_str() {
            "nmea0183" => {
                if config.talkers.is_empty() && config.formatters.is_empty() {
                    warn!("filter {}: neither talker nor formatter set, disabled", config.name);
                    return None;
                }
                Some(Filter::Nmea0183 {
                    name: config.name.clone(),
                    action,
                    talkers: config.talkers.iter().map(|t| t.to_uppercase()).collect(),
                    formatters: config.formatters.iter().map(|f| f.to_uppercase()).collect(),
                })
            }
            "nmea2000" | "nmea2000_time" => {
                if config.sources.is_empty()
                    && config.pgns.is_empty()
                    && config.manufacturer_id.is_none()
                {
                    warn!("filter {}: no criteria set, disabled", config.name);
                    return None;
                }
                let time_gate = if config.kind == "nmea2000_time" {
                    if config.period_ms == 0 {
                        warn!("filter {}: time filter without period, disabled", config.name);
                        return None;
                    }
                    Some(TimeGate::new(Duration::from_millis(config.period_ms)))
                } else {
                    None
                };
                Some(Filter::Nmea2000 {
                    name: config.name.clone(),
                    action,
                    sources: config.sources.clone(),
                    pgns: config.pgns.clone(),
                    manufacturer_id: config.manufacturer_id,
                    time_gate,
                })
            }
            other => {
                warn!("filter {}: unknown kind '{}', disabled", config.name, other);
                None
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Filter::Nmea0183 { name, .. } => name,
            Filter::Nmea2000 { name, .. } => name,
        }
    }

    /// Whether the message matches this filter's criteria.
    fn matches(&self, envelope: &Envelope) -> bool {
        match self {
            Filter::Nmea0183 {
                talkers,
                formatters,
                ..
            } => {
                let Some(sentence) = envelope.sentence() else {
                    return false;
                };
                let talker_ok =
                    talkers.is_empty() || talkers.iter().any(|t| t == sentence.talker());
                let formatter_ok =
                    formatters.is_empty() || formatters.iter().any(|f| f == sentence.formatter());
                talker_ok && formatter_ok
            }
            Filter::Nmea2000 {
                sources,
                pgns,
                manufacturer_id,
                ..
            } => {
                let Some(msg) = envelope.n2k() else {
                    return false;
                };
                let source_ok = sources.is_empty() || sources.contains(&msg.sa);
                let pgn_ok = pgns.is_empty() || pgns.contains(&msg.pgn);
                let mfg_ok = match manufacturer_id {
                    Some(id) => msg.manufacturer_code() == Some(*id),
                    None => true,
                };
                source_ok && pgn_ok && mfg_ok
            }
        }
    }

    /// Resolve the action for a matched message. A select time filter
    /// passes only one message per period per (PGN, source).
    fn resolve(&mut self, envelope: &Envelope, now: Instant) -> FilterAction {
        match self {
            Filter::Nmea0183 { action, .. } => *action,
            Filter::Nmea2000 {
                action, time_gate, ..
            } => match time_gate {
                Some(gate) => {
                    let (pgn, sa) = envelope
                        .n2k()
                        .map(|m| (m.pgn, m.sa))
                        .unwrap_or((0, 0));
                    if gate.check(pgn, sa, now) {
                        *action
                    } else {
                        // outside the window the message is dropped
                        FilterAction::Discard
                    }
                }
                None => *action,
            },
        }
    }
}

/// The ordered filters attached to a publisher or connection.
#[derive(Debug, Default)]
pub struct FilterSet {
    filters: Vec<Filter>,
}

impl FilterSet {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self { filters }
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Decide whether to drop a message.
    ///
    /// With `filter_select` false, a message is dropped only when a
    /// matching filter resolves to discard. With `filter_select` true,
    /// only messages a filter selects pass.
    pub fn discards(&mut self, envelope: &Envelope, filter_select: bool, now: Instant) -> bool {
        for filter in &mut self.filters {
            if filter.matches(envelope) {
                let action = filter.resolve(envelope, now);
                debug!("filter {} matched, action {:?}", filter.name(), action);
                return action == FilterAction::Discard;
            }
        }
        // no filter matched
        filter_select
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmea0183::Nmea0183Msg;
    use nmea2k::Nmea2000Msg;

    fn n2k_env(pgn: u32, sa: u8) -> Envelope {
        Envelope::Raw2000(Nmea2000Msg::new(pgn, 2, sa, 255, vec![0; 8]))
    }

    fn sentence_env(raw: &[u8]) -> Envelope {
        Envelope::Sentence0183(Nmea0183Msg::parse(raw, false).unwrap())
    }

    fn filter_config(kind: &str, action: &str) -> FilterConfig {
        FilterConfig {
            name: "test".to_string(),
            kind: kind.to_string(),
            action: action.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_discard_filter_blocks_matching_pgn() {
        let mut config = filter_config("nmea2000", "discard");
        config.pgns = vec![129025];
        let mut set = FilterSet::new(vec![Filter::from_config(&config).unwrap()]);
        let now = Instant::now();
        assert!(set.discards(&n2k_env(129025, 3), false, now));
        assert!(!set.discards(&n2k_env(129026, 3), false, now));
    }

    #[test]
    fn test_select_semantics() {
        let mut config = filter_config("nmea2000", "select");
        config.pgns = vec![129025];
        let mut set = FilterSet::new(vec![Filter::from_config(&config).unwrap()]);
        let now = Instant::now();
        // filter_select = true: only selected messages pass
        assert!(!set.discards(&n2k_env(129025, 3), true, now));
        assert!(set.discards(&n2k_env(129026, 3), true, now));
        // filter_select = false: unmatched messages pass too
        assert!(!set.discards(&n2k_env(129026, 3), false, now));
    }

    #[test]
    fn test_0183_filter_on_talker_and_formatter() {
        let mut config = filter_config("nmea0183", "discard");
        config.talkers = vec!["GP".to_string()];
        config.formatters = vec!["RMC".to_string()];
        let mut set = FilterSet::new(vec![Filter::from_config(&config).unwrap()]);
        let now = Instant::now();
        assert!(set.discards(&sentence_env(b"$GPRMC,1,2,3"), false, now));
        assert!(!set.discards(&sentence_env(b"$GPGLL,1,2,3"), false, now));
        assert!(!set.discards(&sentence_env(b"$HCRMC,1,2,3"), false, now));
    }

    #[test]
    fn test_0183_filter_without_criteria_is_disabled() {
        let config = filter_config("nmea0183", "discard");
        assert!(Filter::from_config(&config).is_none());
    }

    #[test]
    fn test_time_filter_throttles_per_pgn_source() {
        let mut config = filter_config("nmea2000_time", "select");
        config.pgns = vec![129025];
        config.period_ms = 1000;
        let mut set = FilterSet::new(vec![Filter::from_config(&config).unwrap()]);
        let start = Instant::now();
        // first message passes, repeats inside the window are dropped
        assert!(!set.discards(&n2k_env(129025, 3), true, start));
        assert!(set.discards(&n2k_env(129025, 3), true, start + Duration::from_millis(500)));
        // an independent source has its own window
        assert!(!set.discards(&n2k_env(129025, 4), true, start + Duration::from_millis(500)));
        // after the period the tuple passes again
        assert!(!set.discards(&n2k_env(129025, 3), true, start + Duration::from_millis(1500)));
    }

    #[test]
    fn test_0183_filter_ignores_n2k_messages() {
        let mut config = filter_config("nmea0183", "discard");
        config.talkers = vec!["GP".to_string()];
        let mut set = FilterSet::new(vec![Filter::from_config(&config).unwrap()]);
        assert!(!set.discards(&n2k_env(129025, 3), false, Instant::now()));
    }
}
