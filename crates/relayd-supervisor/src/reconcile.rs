use relayd_core::{StreamDescriptor, StreamId};
use std::collections::{BTreeMap, BTreeSet};

/// Actions needed to move the tracked set to the desired set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
	pub added: Vec<StreamDescriptor>,
	pub removed: Vec<StreamId>,
	/// Tracked streams whose descriptor fields changed.
	pub updated: Vec<StreamDescriptor>,
}

impl ReconcilePlan {
	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
	}
}

/// Diffs by stream ID. The result does not depend on the order of `desired`,
/// and applying it then planning again with the same input yields an empty plan.
pub fn plan(tracked: &BTreeMap<StreamId, StreamDescriptor>, desired: &[StreamDescriptor]) -> ReconcilePlan {
	let mut wanted: BTreeMap<&StreamId, &StreamDescriptor> = BTreeMap::new();
	for desc in desired {
		wanted.insert(&desc.id, desc);
	}

	let mut out = ReconcilePlan::default();
	for (id, desc) in &wanted {
		match tracked.get(*id) {
			None => out.added.push((*desc).clone()),
			Some(current) if current != *desc => out.updated.push((*desc).clone()),
			Some(_) => {}
		}
	}

	let wanted_ids: BTreeSet<&StreamId> = wanted.keys().copied().collect();
	out.removed = tracked
		.keys()
		.filter(|id| !wanted_ids.contains(id))
		.cloned()
		.collect();
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	fn desc(name: &str, source: &str, token: &str) -> StreamDescriptor {
		StreamDescriptor::new(name, source, token)
	}

	fn tracked(list: &[StreamDescriptor]) -> BTreeMap<StreamId, StreamDescriptor> {
		list.iter().map(|d| (d.id.clone(), d.clone())).collect()
	}

	#[test]
	fn adds_removes_and_updates() {
		let a = desc("a", "rtmp://a", "t");
		let b = desc("b", "rtmp://b", "t");
		let c = desc("c", "rtmp://c", "t");
		let b2 = desc("b", "rtmp://b", "new-token");

		let p = plan(&tracked(&[a.clone(), b]), &[b2.clone(), c.clone()]);
		assert_eq!(p.added, vec![c]);
		assert_eq!(p.removed, vec![a.id]);
		assert_eq!(p.updated, vec![b2]);
	}

	#[test]
	fn second_pass_is_empty() {
		let desired = vec![desc("a", "rtmp://a", "t"), desc("b", "rtmp://b", "t")];
		let first = plan(&BTreeMap::new(), &desired);
		assert_eq!(first.added.len(), 2);

		let now = tracked(&first.added);
		assert!(plan(&now, &desired).is_empty());
	}

	#[test]
	fn order_does_not_matter() {
		let a = desc("a", "rtmp://a", "t");
		let b = desc("b", "rtmp://b", "t");
		let forward = plan(&BTreeMap::new(), &[a.clone(), b.clone()]);
		let backward = plan(&BTreeMap::new(), &[b, a]);
		assert_eq!(forward, backward);
	}

	#[test]
	fn refetched_descriptor_keeps_its_id() {
		let original = desc("News", "rtmp://x", "t");
		let refetched = desc(" News", "rtmp://x ", "t");
		assert!(plan(&tracked(&[original]), &[refetched]).is_empty());
	}
}
