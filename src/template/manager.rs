//! Template Manager: the time-indexed, history-preserving store of
//! (Options) Templates that decides, per Transport Session type, what
//! modifications are legal at a given Export Time (spec §4.1-§4.3,
//! grounded on `include/libfds/template_mgr.h` and `template_manager.c`).

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ie::{null_iemgr, IeManagerRef};
use crate::template::garbage::GarbageList;
use crate::template::snapshot::{RecFlags, Snapshot};
use crate::template::{Template, TemplateType};

/// Transport Session type a manager is bound to. Each type gates a
/// different combination of history access, withdrawal acceptance, and
/// Export Time ordering (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    Udp,
    Tcp,
    Sctp,
    /// Templates replayed from an FDS file rather than received live.
    File,
}

impl SessionType {
    /// UDP does not carry reliable delivery, so Template Withdrawal
    /// messages are meaningless and therefore rejected (original design
    /// doc: "in case of export over UDP, withdrawal requests are not
    /// accepted").
    fn accepts_withdrawals(self) -> bool {
        !matches!(self, SessionType::Udp)
    }

    /// TCP is ordered and reliable: Export Time may never move backwards,
    /// and since there is never reordering there is no need to keep
    /// snapshot history around.
    fn history_enabled(self) -> bool {
        !matches!(self, SessionType::Tcp)
    }

    fn requires_monotonic_time(self) -> bool {
        matches!(self, SessionType::Tcp)
    }
}

struct HistoryEntry {
    snapshot: Arc<Snapshot>,
}

/// Time-indexed, history-preserving Template store for one Transport
/// Session (spec §4.1).
pub struct TemplateManager {
    session_type: SessionType,
    /// Ascending by `start_time`; the last entry is the current snapshot.
    history: Vec<HistoryEntry>,
    current_time: Option<u32>,
    udp_lifetime_data: u16,
    udp_lifetime_opts: u16,
    snapshot_timeout: u16,
    iemgr: IeManagerRef,
    garbage: GarbageList,
}

impl TemplateManager {
    pub fn new(session_type: SessionType) -> Self {
        TemplateManager {
            session_type,
            history: Vec::new(),
            current_time: None,
            udp_lifetime_data: 0,
            udp_lifetime_opts: 0,
            snapshot_timeout: 0,
            iemgr: null_iemgr(),
            garbage: GarbageList::new(),
        }
    }

    pub fn session_type(&self) -> SessionType {
        self.session_type
    }

    /// Resets to a freshly created manager's state, preserving
    /// configuration (timeouts, IE manager) but discarding time context
    /// and all templates/snapshots, which are moved to the garbage list
    /// (the `fds_tmgr_clear` operation; supplemented feature).
    pub fn clear(&mut self) {
        for entry in self.history.drain(..) {
            self.garbage.push_snapshot(entry.snapshot);
        }
        self.current_time = None;
    }

    /// UDP-only: configures the lifetime (in seconds) newly added/redefined
    /// Data and Options Templates receive. `0` disables expiry.
    pub fn set_udp_timeouts(&mut self, data: u16, opts: u16) -> Result<()> {
        if self.session_type != SessionType::Udp {
            return Err(Error::argument("UDP timeouts only apply to UDP sessions"));
        }
        self.udp_lifetime_data = data;
        self.udp_lifetime_opts = opts;
        Ok(())
    }

    /// How many seconds of snapshot history remain queryable via
    /// [`TemplateManager::template_get_at`]/[`TemplateManager::set_time`]
    /// moving into the past. `0` disables history.
    pub fn set_snapshot_timeout(&mut self, timeout: u16) {
        self.snapshot_timeout = timeout;
    }

    /// Rebinds every template's IE definitions to a new source. This is
    /// expensive by design: every template in every retained snapshot is
    /// re-parsed from its raw wire bytes against the new source, and the
    /// old copies are moved to the garbage list (spec §4.1, `set_iemgr`).
    pub fn set_iemgr(&mut self, iemgr: IeManagerRef) -> Result<()> {
        let mut new_history = Vec::with_capacity(self.history.len());
        for entry in &self.history {
            let mut fresh = Snapshot::new(entry.snapshot.start_time);
            fresh.editable = false;
            for (id, old) in entry.snapshot.iter() {
                let flags = entry.snapshot.flags_of(id).unwrap_or(RecFlags::empty());
                let lifetime = 0;
                let (mut parsed, _) =
                    Template::parse(old.template_type, &old.raw, old.first_seen, 0, &iemgr)?;
                parsed.last_seen = old.last_seen;
                parsed.end_of_life = old.end_of_life;
                parsed.has_flow_key = old.has_flow_key;
                parsed.flow_key = old.flow_key;
                fresh.insert(id, Arc::new(parsed), flags, lifetime);
            }
            new_history.push(HistoryEntry {
                snapshot: Arc::new(fresh),
            });
        }

        for entry in self.history.drain(..) {
            self.garbage.push_snapshot(entry.snapshot);
        }
        self.history = new_history;
        self.current_time = None;
        self.iemgr = iemgr;
        Ok(())
    }

    /// The entry covering `current_time`, not necessarily the newest one in
    /// `history`: a backward `set_time` within the retained window points
    /// `current_time` at an older span without disturbing later entries
    /// (spec §4.1).
    fn current_index(&self) -> Option<usize> {
        self.current_time.and_then(|t| self.snapshot_index_for_time(t))
    }

    fn snapshot_index_for_time(&self, time: u32) -> Option<usize> {
        // history is sorted ascending by start_time; find the last entry
        // whose start_time <= time.
        self.history
            .iter()
            .rposition(|entry| entry.snapshot.start_time <= time)
    }

    /// After a backward `set_time`, makes sure some entry's span actually
    /// covers `t`; if `t` predates every retained snapshot, splices a fresh
    /// empty one in at the front so lookups at `t` see "no templates"
    /// instead of silently falling through to a later snapshot (spec §4.1).
    fn ensure_backward_coverage(&mut self, t: u32) {
        if self.snapshot_index_for_time(t).is_some() {
            return;
        }
        let pos = self.history.partition_point(|e| e.snapshot.start_time < t);
        self.history.insert(pos, HistoryEntry {
            snapshot: Arc::new(Snapshot::new(t)),
        });
    }

    /// Moves every `DESTROY` flag present in `new_idx`'s snapshot away from
    /// `old_idx`'s, so exactly one entry in the chain ever claims ownership
    /// of a given template's destruction after a copy-on-write fork (spec
    /// §4.1: "all Delete flags move to S'").
    fn migrate_destroy_flags(&mut self, old_idx: usize, new_idx: usize) {
        let ids: Vec<u16> = self.history[new_idx]
            .snapshot
            .iter()
            .filter(|(id, _)| {
                self.history[new_idx]
                    .snapshot
                    .flags_of(*id)
                    .unwrap_or(RecFlags::empty())
                    .contains(RecFlags::DESTROY)
            })
            .map(|(id, _)| id)
            .collect();
        if ids.is_empty() {
            return;
        }
        let prev = Arc::make_mut(&mut self.history[old_idx].snapshot);
        for id in ids {
            prev.revoke_destroy(id);
        }
    }

    /// Advances (or, for non-TCP sessions with history enabled, possibly
    /// rewinds) the manager's Export Time context (spec §4.1, `set_time`).
    pub fn set_time(&mut self, exp_time: u32) -> Result<()> {
        if let Some(current) = self.current_time {
            if exp_time < current {
                if self.session_type.requires_monotonic_time() {
                    return Err(Error::denied(
                        "TCP session requires non-decreasing Export Time",
                    ));
                }
                if !self.session_type.history_enabled() {
                    return Err(Error::denied("history is disabled for this session type"));
                }
                let age = current - exp_time;
                if age > u32::from(self.snapshot_timeout) {
                    return Err(Error::not_found(
                        "requested Export Time predates the retained snapshot history",
                    ));
                }
                // Time moved into the past but within the retained window:
                // reposition, synthesizing an empty snapshot if `exp_time`
                // predates every retained entry (spec §4.1).
                self.current_time = Some(exp_time);
                self.ensure_backward_coverage(exp_time);
                self.expire_old_snapshots(exp_time);
                return Ok(());
            }
        }

        self.current_time = Some(exp_time);
        self.expire_templates(exp_time);
        self.expire_old_snapshots(exp_time);
        Ok(())
    }

    fn require_time(&self) -> Result<u32> {
        self.current_time
            .ok_or_else(|| Error::argument("time context not set; call set_time first"))
    }

    /// Drops every snapshot whose `start_time` is older than the retained
    /// window, handing off any `DESTROY` ownership it held to the oldest
    /// surviving snapshot that still references the same template, or to
    /// the garbage list if none remain.
    fn expire_old_snapshots(&mut self, now: u32) {
        if !self.session_type.history_enabled() {
            return;
        }
        let cutoff = now.saturating_sub(u32::from(self.snapshot_timeout));
        while self.history.len() > 1 && self.history[0].snapshot.start_time < cutoff {
            let dropped = self.history.remove(0);
            for (id, template) in dropped.snapshot.iter() {
                let flags = dropped.snapshot.flags_of(id).unwrap_or(RecFlags::empty());
                if !flags.contains(RecFlags::DESTROY) {
                    continue;
                }
                let heir = self
                    .history
                    .iter_mut()
                    .find(|entry| entry.snapshot.get(id).is_some());
                match heir {
                    Some(_) => {
                        // Safety of hand-off: the heir snapshot's Arc is
                        // shared elsewhere once published, so the flag
                        // lives in a freshly cloned editable copy instead
                        // of mutating the shared one directly.
                        self.grant_destroy_to_heir(id);
                    }
                    None => self.garbage.push_template(template),
                }
            }
            self.garbage.push_snapshot(dropped.snapshot);
        }
    }

    fn grant_destroy_to_heir(&mut self, id: u16) {
        if let Some(idx) = self.history.iter().position(|e| e.snapshot.get(id).is_some()) {
            let entry = &mut self.history[idx];
            let mut edited = (*entry.snapshot).clone_for_edit();
            edited.grant_destroy(id);
            entry.snapshot = Arc::new(edited);
        }
    }

    /// Removes templates whose lifetime has elapsed from the current
    /// snapshot (UDP-style expiry, spec §4.1). The pre-expiry state is
    /// preserved: a new entry is linked after the unexpired one rather than
    /// mutated in place, so a historical lookup at a time before `now` still
    /// sees the template (spec §4.1, §8 scenario S5).
    fn expire_templates(&mut self, now: u32) {
        let Some(idx) = self.current_index() else { return };
        let expired = self.history[idx].snapshot.expired_at(now);
        if expired.is_empty() {
            return;
        }
        let mut edited = (*self.history[idx].snapshot).clone_for_edit();
        for id in expired {
            if let Some((flags, template)) = edited.remove(id) {
                if flags.contains(RecFlags::DESTROY) {
                    self.garbage.push_template(template);
                }
            }
        }

        if self.history[idx].snapshot.start_time == now {
            self.history[idx].snapshot = Arc::new(edited);
            return;
        }

        edited.start_time = now;
        let new_idx = idx + 1;
        self.history.insert(new_idx, HistoryEntry {
            snapshot: Arc::new(edited),
        });
        self.migrate_destroy_flags(idx, new_idx);
    }

    /// Returns the current snapshot, creating an empty one lazily if the
    /// manager has never been written to.
    fn ensure_current_editable(&mut self) -> Result<usize> {
        let now = self.require_time()?;
        if self.history.is_empty() {
            self.history.push(HistoryEntry {
                snapshot: Arc::new(Snapshot::new(now)),
            });
            return Ok(0);
        }

        let idx = match self.snapshot_index_for_time(now) {
            Some(idx) => idx,
            None => {
                // `now` predates every retained entry (possible after a
                // backward seek); splice a fresh one in at the front.
                self.history.insert(0, HistoryEntry {
                    snapshot: Arc::new(Snapshot::new(now)),
                });
                0
            }
        };

        if self.history[idx].snapshot.start_time == now {
            if !self.history[idx].snapshot.editable {
                let cloned = (*self.history[idx].snapshot).clone_for_edit();
                self.history[idx].snapshot = Arc::new(cloned);
            }
            return Ok(idx);
        }

        // `now` falls inside the span `idx` covers but has no entry of its
        // own yet: fork a fresh editable snapshot and splice it in right
        // after `idx`, preserving ascending order and leaving `idx` (and
        // anything newer) untouched (copy-on-write, spec §4.1/§9).
        let mut fresh = (*self.history[idx].snapshot).clone_for_edit();
        fresh.start_time = now;
        let new_idx = idx + 1;
        self.history.insert(new_idx, HistoryEntry {
            snapshot: Arc::new(fresh),
        });
        self.migrate_destroy_flags(idx, new_idx);
        Ok(new_idx)
    }

    fn edit_current(&mut self) -> Result<&mut Snapshot> {
        let idx = self.ensure_current_editable()?;
        Ok(Arc::make_mut(&mut self.history[idx].snapshot))
    }

    /// Returns the current snapshot as a frozen (no longer editable in
    /// place) handle safe to retain past further mutation (spec §4.1
    /// `fds_tmgr_snapshot_get`).
    pub fn snapshot_get(&mut self) -> Result<Arc<Snapshot>> {
        let idx = self.ensure_current_editable()?;
        Arc::get_mut(&mut self.history[idx].snapshot)
            .map(|s| s.editable = false)
            .unwrap_or(());
        Ok(Arc::clone(&self.history[idx].snapshot))
    }

    /// Number of templates in the current snapshot, or `0` if none has
    /// been created yet. Unlike [`TemplateManager::snapshot_get`], this
    /// never mutates or requires a time context.
    pub fn current_len(&self) -> u16 {
        self.current_index()
            .map(|idx| self.history[idx].snapshot.len())
            .unwrap_or(0)
    }

    pub fn template_get(&self, id: u16) -> Result<Arc<Template>> {
        self.require_time()?;
        let idx = self.current_index().ok_or_else(|| Error::not_found("no templates defined"))?;
        self.history[idx]
            .snapshot
            .get(id)
            .ok_or_else(|| Error::not_found(format!("template {id} not found")))
    }

    /// Historical, non-mutating lookup at an arbitrary past Export Time
    /// still within the retained window (supplemented feature).
    pub fn template_get_at(&self, id: u16, time: u32) -> Result<Arc<Template>> {
        let idx = self
            .snapshot_index_for_time(time)
            .ok_or_else(|| Error::not_found("no snapshot covers the requested time"))?;
        self.history[idx]
            .snapshot
            .get(id)
            .ok_or_else(|| Error::not_found(format!("template {id} not found at time {time}")))
    }

    fn default_lifetime(&self, template_type: TemplateType) -> u32 {
        if self.session_type != SessionType::Udp {
            return 0;
        }
        match template_type {
            TemplateType::Data => u32::from(self.udp_lifetime_data),
            TemplateType::Options => u32::from(self.udp_lifetime_opts),
        }
    }

    /// Adds (or refreshes) a template from its raw IPFIX wire bytes (spec
    /// §4.1, §4.5). Bit-identical redefinitions are treated as a no-op
    /// refresh that preserves ownership flags; non-identical redefinitions
    /// hand destruction of the superseded template to the garbage list if
    /// no older snapshot still needs it.
    pub fn template_add(&mut self, template_type: TemplateType, raw: &[u8]) -> Result<()> {
        let now = self.require_time()?;
        let lifetime = self.default_lifetime(template_type);
        let (parsed, _) = Template::parse(template_type, raw, now, lifetime, &self.iemgr)?;
        let id = parsed.id;

        let existing = {
            let idx = self.current_index();
            idx.and_then(|i| self.history[i].snapshot.get(id))
        };

        if let Some(existing) = &existing {
            if **existing == parsed {
                // Bit-identical refresh: just bump the deadline in place.
                let snap = self.edit_current()?;
                snap.set_lifetime(id, if lifetime > 0 { Some(now + lifetime) } else { None });
                return Ok(());
            }
        }

        let had_destroy = existing.is_some()
            && self
                .current_index()
                .and_then(|i| self.history[i].snapshot.flags_of(id))
                .map(|f| f.contains(RecFlags::DESTROY))
                .unwrap_or(false);

        let snap = self.edit_current()?;
        let mut flags = RecFlags::empty();
        if existing.is_none() {
            flags.insert(RecFlags::CREATE);
        }
        if existing.is_none() || had_destroy {
            flags.insert(RecFlags::DESTROY);
        }
        if lifetime > 0 {
            flags.insert(RecFlags::TIMEOUT);
        }

        if let Some((old_flags, old_template)) = snap.remove(id) {
            if old_flags.contains(RecFlags::DESTROY) && !had_destroy {
                // Defensive: remove() already returned ownership info; drop
                // the stale copy immediately since nothing older references
                // the current (editable, unshared) snapshot's own record.
                drop(old_template);
            }
        }
        snap.insert(id, Arc::new(parsed), flags, now + lifetime);
        Ok(())
    }

    /// Withdraws a single template (spec §4.1, `fds_tmgr_template_withdraw`).
    /// `expected` restricts the withdrawal to a specific template type
    /// unless `None`.
    pub fn template_withdraw(&mut self, id: u16, expected: Option<TemplateType>) -> Result<()> {
        self.require_time()?;
        if !self.session_type.accepts_withdrawals() {
            return Err(Error::denied("withdrawals are not accepted on this session type"));
        }

        let current_type = {
            let idx = self.current_index().ok_or_else(|| Error::not_found("template not found"))?;
            self.history[idx]
                .snapshot
                .get(id)
                .ok_or_else(|| Error::not_found(format!("template {id} not found")))?
                .template_type
        };
        if let Some(expected) = expected {
            if expected != current_type {
                return Err(Error::argument("template type mismatch on withdrawal"));
            }
        }

        let snap = self.edit_current()?;
        if let Some((flags, template)) = snap.remove(id) {
            if flags.contains(RecFlags::DESTROY) {
                self.hand_off_or_garbage(id, flags, template);
            }
        }
        Ok(())
    }

    pub fn template_withdraw_all(&mut self, expected: Option<TemplateType>) -> Result<()> {
        self.require_time()?;
        if !self.session_type.accepts_withdrawals() {
            return Err(Error::denied("withdrawals are not accepted on this session type"));
        }

        let idx = self.current_index().ok_or_else(|| Error::not_found("no templates defined"))?;
        let ids: Vec<u16> = self.history[idx]
            .snapshot
            .iter()
            .filter(|(_, t)| expected.map(|e| e == t.template_type).unwrap_or(true))
            .map(|(id, _)| id)
            .collect();

        for id in ids {
            self.template_withdraw(id, None)?;
        }
        Ok(())
    }

    /// Removes a template from the _entire_ retained history, not just the
    /// current snapshot (spec §4.1's `fds_tmgr_template_remove`: expensive,
    /// ignores the usual session-type policy).
    pub fn template_remove(&mut self, id: u16, expected: Option<TemplateType>) -> Result<()> {
        for i in 0..self.history.len() {
            if let Some(existing) = self.history[i].snapshot.get(id) {
                if let Some(expected) = expected {
                    if existing.template_type != expected {
                        continue;
                    }
                }
                let mut edited = (*self.history[i].snapshot).clone_for_edit();
                if let Some((flags, template)) = edited.remove(id) {
                    if flags.contains(RecFlags::DESTROY) {
                        self.garbage.push_template(template);
                    }
                }
                self.history[i].snapshot = Arc::new(edited);
            }
        }
        Ok(())
    }

    fn hand_off_or_garbage(&mut self, id: u16, _flags: RecFlags, template: Arc<Template>) {
        let heir = self
            .history
            .iter()
            .position(|entry| entry.snapshot.get(id).is_some());
        match heir {
            Some(_) => self.grant_destroy_to_heir(id),
            None => self.garbage.push_template(template),
        }
    }

    /// Assigns a flow key to a template, propagating forward to newer
    /// snapshots carrying an un-redefined copy of the same template id
    /// (spec §4.1, `fds_tmgr_template_set_fkey`).
    pub fn template_set_fkey(&mut self, id: u16, key: u64) -> Result<()> {
        self.require_time()?;
        let start = self
            .current_index()
            .ok_or_else(|| Error::not_found("template not found"))?;
        if self.history[start].snapshot.get(id).is_none() {
            return Err(Error::not_found(format!("template {id} not found")));
        }

        let base_raw = self.history[start].snapshot.get(id).unwrap().raw.clone();
        for i in start..self.history.len() {
            let same = self.history[i]
                .snapshot
                .get(id)
                .map(|t| t.raw == base_raw)
                .unwrap_or(false);
            if !same {
                continue;
            }
            let mut edited = (*self.history[i].snapshot).clone_for_edit();
            if let Some(t) = edited.get(id) {
                let mut fresh = (*t).clone();
                fresh.has_flow_key = true;
                fresh.flow_key = Some(key);
                let flags = edited.flags_of(id).unwrap_or(RecFlags::empty());
                let lifetime = 0;
                edited.insert(id, Arc::new(fresh), flags, lifetime);
            }
            self.history[i].snapshot = Arc::new(edited);
        }
        Ok(())
    }

    /// Takes ownership of all garbage accumulated so far, leaving the
    /// manager's internal list empty.
    pub fn garbage_get(&mut self) -> GarbageList {
        std::mem::take(&mut self.garbage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_template_bytes(id: u16) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&id.to_be_bytes());
        body.extend_from_slice(&1u16.to_be_bytes());
        body.extend_from_slice(&8u16.to_be_bytes());
        body.extend_from_slice(&4u16.to_be_bytes());
        body
    }

    #[test]
    fn add_then_get_round_trips() {
        let mut mgr = TemplateManager::new(SessionType::Sctp);
        mgr.set_time(10).unwrap();
        mgr.template_add(TemplateType::Data, &data_template_bytes(300)).unwrap();
        let t = mgr.template_get(300).unwrap();
        assert_eq!(t.id, 300);
    }

    #[test]
    fn udp_rejects_withdrawals() {
        let mut mgr = TemplateManager::new(SessionType::Udp);
        mgr.set_time(10).unwrap();
        mgr.template_add(TemplateType::Data, &data_template_bytes(300)).unwrap();
        let err = mgr.template_withdraw(300, None).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Denied);
    }

    #[test]
    fn tcp_rejects_time_going_backwards() {
        let mut mgr = TemplateManager::new(SessionType::Tcp);
        mgr.set_time(100).unwrap();
        let err = mgr.set_time(50).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Denied);
    }

    #[test]
    fn sctp_allows_bounded_history_rewind() {
        let mut mgr = TemplateManager::new(SessionType::Sctp);
        mgr.set_snapshot_timeout(30);
        mgr.set_time(100).unwrap();
        mgr.template_add(TemplateType::Data, &data_template_bytes(300)).unwrap();
        // 90 predates the template's introduction at 100: the rewind must
        // succeed (within the retained window) but find nothing yet.
        mgr.set_time(90).unwrap();
        assert!(mgr.template_get(300).is_err());
        mgr.set_time(100).unwrap();
        assert!(mgr.template_get(300).is_ok());
    }

    #[test]
    fn template_get_at_sees_pre_expiry_state_after_expiry() {
        let mut mgr = TemplateManager::new(SessionType::Udp);
        mgr.set_udp_timeouts(15, 0).unwrap();
        mgr.set_snapshot_timeout(30);
        mgr.set_time(1000).unwrap();
        mgr.template_add(TemplateType::Data, &data_template_bytes(300)).unwrap();
        mgr.set_time(1015).unwrap();
        assert!(mgr.template_get(300).is_err(), "template should have expired by 1015");
        assert!(
            mgr.template_get_at(300, 1005).is_ok(),
            "a historical view at 1005 must still see the pre-expiry template"
        );
    }

    #[test]
    fn backward_seek_inserts_empty_snapshot_before_earliest_entry() {
        let mut mgr = TemplateManager::new(SessionType::Sctp);
        mgr.set_snapshot_timeout(60);
        mgr.set_time(500).unwrap();
        mgr.template_add(TemplateType::Data, &data_template_bytes(300)).unwrap();
        mgr.set_time(470).unwrap();
        assert!(mgr.template_get(300).is_err());
        // Writing at the rewound time must not disturb the later entry.
        mgr.template_add(TemplateType::Data, &data_template_bytes(301)).unwrap();
        assert!(mgr.template_get(301).is_ok());
        mgr.set_time(500).unwrap();
        assert!(mgr.template_get(300).is_ok());
        assert!(mgr.template_get_at(301, 470).is_ok());
    }

    #[test]
    fn withdraw_then_get_not_found() {
        let mut mgr = TemplateManager::new(SessionType::Sctp);
        mgr.set_time(10).unwrap();
        mgr.template_add(TemplateType::Data, &data_template_bytes(300)).unwrap();
        mgr.template_withdraw(300, None).unwrap();
        assert!(mgr.template_get(300).is_err());
    }

    #[test]
    fn redefining_identical_template_preserves_first_seen() {
        let mut mgr = TemplateManager::new(SessionType::Sctp);
        mgr.set_time(10).unwrap();
        let bytes = data_template_bytes(300);
        mgr.template_add(TemplateType::Data, &bytes).unwrap();
        mgr.set_time(20).unwrap();
        mgr.template_add(TemplateType::Data, &bytes).unwrap();
        let t = mgr.template_get(300).unwrap();
        assert_eq!(t.first_seen, 10);
    }

    #[test]
    fn clear_preserves_config_but_drops_templates() {
        let mut mgr = TemplateManager::new(SessionType::Udp);
        mgr.set_udp_timeouts(30, 60).unwrap();
        mgr.set_time(10).unwrap();
        mgr.template_add(TemplateType::Data, &data_template_bytes(300)).unwrap();
        mgr.clear();
        assert!(mgr.template_get(300).is_err());
        assert_eq!(mgr.udp_lifetime_data, 30);
    }
}
