use std::collections::{BTreeMap, HashSet};

use crate::membership::types::{ReplicaAddress, ReplicaId};

/// Lowest-id rule: the leader is the smallest id among the members this node can
/// currently reach, counting itself.
///
/// Members whose id is unknown cannot take part and are simply absent from
/// `members`. The result is never worse than `self_id`.
pub fn elect_leader(
    members: &BTreeMap<ReplicaId, ReplicaAddress>,
    self_id: ReplicaId,
    reachable: &HashSet<ReplicaId>,
) -> ReplicaId {
    members
        .keys()
        .copied()
        .filter(|id| reachable.contains(id))
        .chain(std::iter::once(self_id))
        .min()
        .unwrap_or(self_id)
}
