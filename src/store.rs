//! Per-constellation ephemeris store.

use std::sync::Arc;

use log::debug;

use crate::ephemeris::Ephemeris;
use crate::SECS_PER_DAY;

/// Time-ordered ephemeris store for one constellation.
///
/// Two orderings are maintained on insertion: the full list ordered by
/// t0c (the order navigation files are written in) and a per-SVN list,
/// also t0c-ordered, for nearest-ephemeris lookup. Entries are shared
/// between the two, so a week-rollover rotation of the list never
/// touches the per-SVN index.
#[derive(Debug, Clone)]
pub struct Store {
    /// All ephemerides, ordered by t0c
    list: Vec<Arc<Ephemeris>>,
    /// Per-SVN ephemerides, each list ordered by t0c
    by_sv: Vec<Vec<Arc<Ephemeris>>>,
}

impl Store {
    /// Allocates a store for SVNs 1..=max_svn.
    pub fn new(max_svn: u8) -> Self {
        Self {
            list: Vec::new(),
            by_sv: vec![Vec::new(); max_svn as usize + 1],
        }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// All ephemerides in t0c order.
    pub fn iter(&self) -> impl Iterator<Item = &Ephemeris> {
        self.list.iter().map(|e| e.as_ref())
    }

    /// Adds an ephemeris, keeping both orderings. Duplicates, keyed on
    /// (SVN, t0e), are silently dropped. Returns false on a duplicate
    /// or an out-of-range SVN.
    pub fn add(&mut self, eph: Ephemeris) -> bool {
        let svn = eph.svn() as usize;
        if svn == 0 || svn >= self.by_sv.len() {
            return false;
        }
        if self.by_sv[svn].iter().any(|e| e.t0e() == eph.t0e()) {
            debug!("duplicate ephemeris svn={} toe={}", svn, eph.t0e());
            return false;
        }

        let eph = Arc::new(eph);
        let pos = self
            .list
            .iter()
            .position(|e| eph.t0c() < e.t0c())
            .unwrap_or(self.list.len());
        self.list.insert(pos, eph.clone());

        let pos = self.by_sv[svn]
            .iter()
            .position(|e| eph.t0c() < e.t0c())
            .unwrap_or(self.by_sv[svn].len());
        self.by_sv[svn].insert(pos, eph);
        true
    }

    /// Ephemeris nearest in time for the given SVN at GPS time of week
    /// `tow`: smallest non-negative (t0e - tow) within 0.1 day, with
    /// t0e - tow < -5 days treated as one week ahead. Ephemerides with
    /// an accuracy above `max_ura` metres are never returned.
    pub fn nearest(&self, svn: u8, tow: f64, max_ura: f64) -> Option<&Ephemeris> {
        let candidates = self.by_sv.get(svn as usize)?;
        let mut best: Option<(&Arc<Ephemeris>, f64)> = None;
        for eph in candidates {
            if eph.accuracy() > max_ura {
                continue;
            }
            let mut dt = eph.t0e() - tow;
            if dt < -5.0 * SECS_PER_DAY as f64 {
                dt += 7.0 * SECS_PER_DAY as f64;
            }
            if dt >= 0.0 && dt.abs() < 0.1 * SECS_PER_DAY as f64 {
                match best {
                    Some((_, bdt)) if dt.abs() >= bdt => {},
                    _ => best = Some((eph, dt.abs())),
                }
            }
        }
        best.map(|(e, _)| e.as_ref())
    }

    /// Detects a week rollover in the t0c-ordered list (consecutive t0c
    /// differing by more than 5 days) and rotates the leading block to
    /// the end, so the list is time-ordered within the observation day.
    /// Returns true if a rotation was performed.
    pub fn fix_week_rollovers(&mut self) -> bool {
        if self.list.len() <= 1 {
            return false;
        }
        let mut t0c_last = self.list[0].t0c();
        for i in 1..self.list.len() {
            let t0c = self.list[i].t0c();
            if t0c - t0c_last > 5.0 * SECS_PER_DAY as f64 {
                debug!("week rollover detected in ephemeris list");
                self.list.rotate_left(i);
                return true;
            }
            t0c_last = t0c;
        }
        false
    }

    /// Drops every ephemeris.
    pub fn clear(&mut self) {
        self.list.clear();
        for l in self.by_sv.iter_mut() {
            l.clear();
        }
    }
}
