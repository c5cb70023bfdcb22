//! Alignment of receiver and counter epochs on a second-of-day grid.

use log::{info, warn};
use thiserror::Error;

use crate::counter::CounterLog;
use crate::measurement::ReceiverMeasurement;
use crate::SECS_PER_DAY;

pub const HAS_COUNTER: u8 = 0x01;
pub const HAS_RECEIVER: u8 = 0x02;
pub const DUPLICATE_COUNTER: u8 = 0x04;
pub const DUPLICATE_RECEIVER: u8 = 0x08;
pub const MATCHED: u8 = HAS_COUNTER | HAS_RECEIVER;

#[derive(Debug, Error)]
pub enum Error {
    /// Downstream fitting requires time-ordered data; a PC clock that
    /// jumps around beyond simple steps cannot be processed.
    #[error("matched measurement pairs are not monotonically ordered")]
    NotMonotonic,
}

/// One slot of the pairing array: UTC second-of-day `i` holds the
/// counter reading and receiver epoch stamped at that second, as
/// indices into the owning collections.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeasurementPair {
    pub flags: u8,
    /// Index into the counter log's measurements
    pub counter: Option<usize>,
    /// Index into the receiver's measurements
    pub receiver: Option<usize>,
}

impl MeasurementPair {
    pub fn is_matched(&self) -> bool {
        self.flags & MATCHED == MATCHED
    }
}

/// Pairs each receiver epoch with the counter reading of the same PC
/// second.
///
/// An array indexed by second-of-day replaces a search. This flags
/// gaps in either record, tolerates the PC clock stepping forward (a
/// gap) and absorbs backward steps: data with a timestamp already seen
/// keeps the first reading and marks the slot duplicate.
pub fn pair_measurements(
    measurements: &[ReceiverMeasurement],
    counter: &CounterLog,
) -> Result<Vec<MeasurementPair>, Error> {
    let mut pairs = vec![MeasurementPair::default(); SECS_PER_DAY as usize];

    for (i, cm) in counter.measurements.iter().enumerate() {
        let t = cm.tod() as usize;
        if t >= pairs.len() {
            continue;
        }
        if pairs[t].flags & HAS_COUNTER != 0 {
            pairs[t].flags |= DUPLICATE_COUNTER;
            warn!("duplicate counter measurement {:02}:{:02}:{:02}", cm.hh, cm.mm, cm.ss);
        } else {
            pairs[t].flags |= HAS_COUNTER;
            pairs[t].counter = Some(i);
        }
    }

    // Receiver messages are sometimes buffered for a few seconds and
    // arrive with duplicate timestamps; the first one wins.
    for (i, rm) in measurements.iter().enumerate() {
        let t = rm.pc_tod() as usize;
        if t >= pairs.len() {
            continue;
        }
        if pairs[t].flags & HAS_RECEIVER != 0 {
            pairs[t].flags |= DUPLICATE_RECEIVER;
            warn!(
                "duplicate receiver measurement {:02}:{:02}:{:02}",
                rm.pc_hh, rm.pc_mm, rm.pc_ss
            );
        } else {
            pairs[t].flags |= HAS_RECEIVER;
            pairs[t].receiver = Some(i);
        }
    }

    let matched = pairs.iter().filter(|p| p.is_matched()).count();
    info!("{} matched measurements", matched);

    // Downstream algorithms require time-ordered data.
    let mut last_tod: Option<u32> = None;
    for pair in pairs.iter().filter(|p| p.is_matched()) {
        let tod = measurements[pair.receiver.unwrap()].pc_tod();
        if let Some(last) = last_tod {
            if tod < last {
                return Err(Error::NotMonotonic);
            }
        }
        last_tod = Some(tod);
    }

    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::CounterMeasurement;

    fn counter_log(tods: &[u32]) -> CounterLog {
        CounterLog {
            measurements: tods
                .iter()
                .map(|&t| CounterMeasurement {
                    hh: (t / 3600) as u8,
                    mm: ((t % 3600) / 60) as u8,
                    ss: (t % 60) as u8,
                    rdg: 1.0e-6,
                })
                .collect(),
        }
    }

    fn rx_measurements(tods: &[u32]) -> Vec<ReceiverMeasurement> {
        tods.iter()
            .map(|&t| {
                let mut m = ReceiverMeasurement::new();
                m.pc_hh = (t / 3600) as u8;
                m.pc_mm = ((t % 3600) / 60) as u8;
                m.pc_ss = (t % 60) as u8;
                m
            })
            .collect()
    }

    #[test]
    fn matches_and_gaps() {
        let cntr = counter_log(&[10, 11, 12, 14]);
        let rx = rx_measurements(&[11, 12, 13]);
        let pairs = pair_measurements(&rx, &cntr).unwrap();

        assert!(!pairs[10].is_matched()); // no receiver
        assert!(pairs[11].is_matched());
        assert!(pairs[12].is_matched());
        assert!(!pairs[13].is_matched()); // no counter
        assert!(!pairs[14].is_matched());
        assert_eq!(pairs.iter().filter(|p| p.is_matched()).count(), 2);
        assert_eq!(pairs[11].receiver, Some(0));
        assert_eq!(pairs[11].counter, Some(1));
    }

    #[test]
    fn backward_step_flags_one_duplicate() {
        // counter clock steps back 10 s mid-file: second 20 repeats
        let mut tods: Vec<u32> = (10..=20).collect();
        tods.extend(11..=20); // replay after the step back
        let cntr = counter_log(&tods);
        let rx = rx_measurements(&[15]);
        let pairs = pair_measurements(&rx, &cntr).unwrap();

        // every replayed slot keeps its first reading and is flagged
        for t in 11..=20 {
            assert!(pairs[t].flags & DUPLICATE_COUNTER != 0);
        }
        assert!(pairs[10].flags & DUPLICATE_COUNTER == 0);
        // the engine does not abort
        assert!(pairs[15].is_matched());
    }

    #[test]
    fn brief_backward_step_single_duplicate() {
        // the clock steps back 10 s for a single reading before being
        // disciplined forward again: exactly one slot is flagged
        let mut tods: Vec<u32> = (0..=50).collect();
        tods.push(41);
        tods.extend(51..=60);
        let cntr = counter_log(&tods);
        let pairs = pair_measurements(&[], &cntr).unwrap();
        let flagged: Vec<usize> = (0..86_400)
            .filter(|&t| pairs[t].flags & DUPLICATE_COUNTER != 0)
            .collect();
        assert_eq!(flagged, vec![41]);
    }

    #[test]
    fn duplicate_receiver_keeps_first() {
        let cntr = counter_log(&[30]);
        let rx = rx_measurements(&[30, 30]);
        let pairs = pair_measurements(&rx, &cntr).unwrap();
        assert!(pairs[30].flags & DUPLICATE_RECEIVER != 0);
        assert_eq!(pairs[30].receiver, Some(0));
    }

    #[test]
    fn out_of_range_seconds_ignored() {
        let cntr = counter_log(&[86_399]);
        let rx = rx_measurements(&[86_399]);
        let pairs = pair_measurements(&rx, &cntr).unwrap();
        assert!(pairs[86_399].is_matched());
    }
}
