//! Auxiliary annotation stream, versioned separately from the document.
//!
//! Each accepted, non-empty delta bumps the auxiliary version by one and
//! its events are kept (tagged with that version) so readers can catch up
//! on annotations independently of steps.

use std::collections::{BTreeMap, VecDeque};

use crate::protocol::{Annotation, AnnotationEvent, SyncError};

#[derive(Debug)]
pub struct AnnotationLog {
    current: BTreeMap<u64, Annotation>,
    events: VecDeque<(u64, AnnotationEvent)>,
    version: u64,
    floor: u64,
    max_events: usize,
}

impl AnnotationLog {
    pub fn new(max_events: usize) -> Self {
        Self {
            current: BTreeMap::new(),
            events: VecDeque::new(),
            version: 0,
            floor: 0,
            max_events,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn floor(&self) -> u64 {
        self.floor
    }

    /// Live annotations ordered by id.
    pub fn annotations(&self) -> Vec<Annotation> {
        self.current.values().cloned().collect()
    }

    /// Apply a delta. Returns the (possibly unchanged) auxiliary version.
    pub fn apply(&mut self, delta: Vec<AnnotationEvent>) -> u64 {
        if delta.is_empty() {
            return self.version;
        }
        self.version += 1;
        for event in delta {
            match &event {
                AnnotationEvent::Create { id, from, to, text } => {
                    self.current.insert(
                        *id,
                        Annotation {
                            id: *id,
                            from: *from,
                            to: *to,
                            text: text.clone(),
                        },
                    );
                }
                AnnotationEvent::Delete { id } => {
                    if self.current.remove(id).is_none() {
                        log::debug!("Delete of unknown annotation {id}");
                    }
                }
            }
            self.events.push_back((self.version, event));
        }
        self.trim();
        self.version
    }

    /// Events accepted after auxiliary version `since`.
    pub fn since(&self, since: u64) -> Result<Vec<AnnotationEvent>, SyncError> {
        if since > self.version {
            return Err(SyncError::InvalidVersion {
                requested: since,
                current: self.version,
            });
        }
        if since < self.floor {
            return Err(SyncError::HistoryUnavailable {
                requested: since,
                floor: self.floor,
            });
        }
        let start = self.events.partition_point(|(v, _)| *v <= since);
        Ok(self.events.range(start..).map(|(_, e)| e.clone()).collect())
    }

    fn trim(&mut self) {
        while self.events.len() > self.max_events {
            let Some(oldest) = self.events.front().map(|(v, _)| *v) else {
                break;
            };
            while self.events.front().is_some_and(|(v, _)| *v == oldest) {
                self.events.pop_front();
            }
            self.floor = oldest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(id: u64, text: &str) -> AnnotationEvent {
        AnnotationEvent::Create {
            id,
            from: 0,
            to: 1,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_create_and_delete() {
        let mut log = AnnotationLog::new(100);
        assert_eq!(log.apply(vec![create(1, "one"), create(2, "two")]), 1);
        assert_eq!(log.apply(vec![AnnotationEvent::Delete { id: 1 }]), 2);

        let live = log.annotations();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].text, "two");
    }

    #[test]
    fn test_empty_delta_keeps_version() {
        let mut log = AnnotationLog::new(100);
        assert_eq!(log.apply(Vec::new()), 0);
    }

    #[test]
    fn test_since_is_per_version() {
        let mut log = AnnotationLog::new(100);
        log.apply(vec![create(1, "a")]);
        log.apply(vec![create(2, "b")]);

        assert_eq!(log.since(0).unwrap().len(), 2);
        assert_eq!(log.since(1).unwrap(), vec![create(2, "b")]);
        assert!(log.since(2).unwrap().is_empty());
        assert!(matches!(log.since(3), Err(SyncError::InvalidVersion { .. })));
    }

    #[test]
    fn test_trim_raises_floor() {
        let mut log = AnnotationLog::new(1);
        log.apply(vec![create(1, "a")]);
        log.apply(vec![create(2, "b")]);

        assert_eq!(log.floor(), 1);
        assert!(matches!(
            log.since(0),
            Err(SyncError::HistoryUnavailable { requested: 0, floor: 1 })
        ));
        // Trimming the event log never touches the live set.
        assert_eq!(log.annotations().len(), 2);
    }
}
