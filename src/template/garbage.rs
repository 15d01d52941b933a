//! Garbage List: deferred destruction of snapshots and templates that may
//! still be referenced by a caller holding an older snapshot handle (spec
//! §4.1, §9).
//!
//! The original design is an append-only list of `(opaque pointer,
//! destructor function)` pairs. In Rust the destructor is just "drop the
//! `Arc`", so rather than model a closed set of opaque payloads behind a
//! boxed function pointer, the garbage list holds a closed enum of the two
//! owned reference-counted types that ever need deferred destruction —
//! consistent with design note §9's preference for tagged enums over a
//! trait-object/erased-callback seam when the variant set is fixed.

use std::sync::Arc;

use crate::template::snapshot::Snapshot;
use crate::template::Template;

enum Item {
    Snapshot(Arc<Snapshot>),
    Template(Arc<Template>),
}

/// Append-only collection of snapshots/templates withheld from destruction
/// because the manager cannot prove no caller still references them.
/// Calling [`GarbageList::collect`] drops everything accumulated so far.
#[derive(Default)]
pub struct GarbageList {
    items: Vec<Item>,
}

impl GarbageList {
    pub fn new() -> Self {
        GarbageList::default()
    }

    pub fn push_snapshot(&mut self, snapshot: Arc<Snapshot>) {
        self.items.push(Item::Snapshot(snapshot));
    }

    pub fn push_template(&mut self, template: Arc<Template>) {
        self.items.push(Item::Template(template));
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Drops every accumulated item, running its destructor (an `Arc`
    /// drop, which frees the value once this was the last reference).
    pub fn collect(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_collect_empties_the_list() {
        let mut gc = GarbageList::new();
        gc.push_snapshot(Arc::new(Snapshot::new(0)));
        assert_eq!(gc.len(), 1);
        gc.collect();
        assert!(gc.is_empty());
    }

    #[test]
    fn collect_drops_the_last_reference() {
        let template = Arc::new({
            let iemgr = crate::ie::null_iemgr();
            let mut body = Vec::new();
            body.extend_from_slice(&300u16.to_be_bytes());
            body.extend_from_slice(&1u16.to_be_bytes());
            body.extend_from_slice(&8u16.to_be_bytes());
            body.extend_from_slice(&4u16.to_be_bytes());
            Template::parse(crate::template::TemplateType::Data, &body, 0, 0, &iemgr)
                .unwrap()
                .0
        });
        let weak = Arc::downgrade(&template);

        let mut gc = GarbageList::new();
        gc.push_template(template);
        gc.collect();

        assert!(weak.upgrade().is_none());
    }
}
