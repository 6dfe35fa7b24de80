//! The release-path grouping algorithm shared by every fleet-backed
//! handler's `release`.
//!
//! Grounded on `original_source/.../ec2_fleet_handler.py::
//! _group_instances_by_ec2_fleet_from_mapping` (resource_mapping first
//! pass) and `_group_instances_by_ec2_fleet` (the AWS-lookup fallback),
//! and the structurally identical `spot_fleet_handler.py` counterparts.
//! Chunk size and pass ordering match the Python source: resource_mapping
//! hits first, then an unattributed-instance AWS lookup in chunks of 50,
//! with anything left over falling into the "no-fleet" bucket.

use std::collections::HashMap;

use hostbroker_domain::{InstanceId, ResourceId, ResourceMappingHint};

use crate::instance_adapter::DescribedInstance;

pub const DESCRIBE_CHUNK_SIZE: usize = 50;

/// Result of the pure (no I/O) first pass over `resource_mapping`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupedIds {
    pub by_resource: HashMap<ResourceId, Vec<InstanceId>>,
    pub no_fleet: Vec<InstanceId>,
    /// Instances absent from `resource_mapping` entirely — the caller must
    /// resolve these via an AWS tag/fleet-membership lookup before the
    /// grouping is complete.
    pub needs_lookup: Vec<InstanceId>,
}

/// First pass: attribute instances using caller-supplied `resource_mapping`
/// hints. `resource_id.is_some() && desired_capacity > 0` attributes to
/// that resource; `resource_id.is_none() || desired_capacity == 0`
/// attributes to "no-fleet"; an instance absent from `mapping` altogether
/// is deferred to [`GroupedIds::needs_lookup`].
pub fn group_by_mapping(instance_ids: &[InstanceId], mapping: &[ResourceMappingHint]) -> GroupedIds {
    let hints: HashMap<&InstanceId, &ResourceMappingHint> =
        mapping.iter().map(|h| (&h.instance_id, h)).collect();

    let mut grouped = GroupedIds::default();
    for id in instance_ids {
        match hints.get(id) {
            Some(hint) => match (&hint.resource_id, hint.desired_capacity) {
                (Some(resource_id), capacity) if capacity > 0 => {
                    grouped.by_resource.entry(resource_id.clone()).or_default().push(id.clone());
                }
                _ => grouped.no_fleet.push(id.clone()),
            },
            None => grouped.needs_lookup.push(id.clone()),
        }
    }
    grouped
}

/// Split `ids` into chunks of at most [`DESCRIBE_CHUNK_SIZE`], the maximum
/// batch size the AWS `DescribeInstances`/`ModifyFleet`-style calls accept
/// per request.
pub fn chunk(ids: &[InstanceId], size: usize) -> Vec<Vec<InstanceId>> {
    ids.chunks(size.max(1)).map(|c| c.to_vec()).collect()
}

/// Attribute `lookup` instances to an owning fleet/ASG using tag values
/// already present on each [`DescribedInstance`] (from a prior
/// `describe_instances` call). `tag_keys` are tried in order; the first
/// match wins. Instances with none of the tags fall into "no-fleet" — for
/// spot instances the caller should treat that as provisional and run
/// [`attribute_by_fleet_membership`] before accepting it, since an instance
/// can be an active fleet member without carrying the tag yet.
pub fn attribute_by_tags(
    lookup: &[InstanceId],
    described: &[DescribedInstance],
    tag_keys: &[&str],
) -> GroupedIds {
    let by_id: HashMap<&str, &DescribedInstance> =
        described.iter().map(|d| (d.instance_id.as_str(), d)).collect();

    let mut grouped = GroupedIds::default();
    for id in lookup {
        let owner = by_id
            .get(id.as_str())
            .and_then(|inst| tag_keys.iter().find_map(|key| inst.tag(key)));
        match owner {
            Some(resource_id) => {
                grouped.by_resource.entry(ResourceId::new(resource_id)).or_default().push(id.clone());
            }
            None => grouped.no_fleet.push(id.clone()),
        }
    }
    grouped
}

/// Attribute `lookup` instances using an already-resolved fleet-membership
/// map (fleet/resource id -> instance ids the cloud currently reports as
/// active members), the fallback for instances `attribute_by_tags` left
/// unattributed. Instances absent from every fleet's membership fall into
/// "no-fleet".
pub fn attribute_by_fleet_membership(
    lookup: &[InstanceId],
    membership: &HashMap<ResourceId, Vec<InstanceId>>,
) -> GroupedIds {
    let owner_by_instance: HashMap<&InstanceId, &ResourceId> = membership
        .iter()
        .flat_map(|(resource_id, ids)| ids.iter().map(move |id| (id, resource_id)))
        .collect();

    let mut grouped = GroupedIds::default();
    for id in lookup {
        match owner_by_instance.get(id) {
            Some(resource_id) => grouped.by_resource.entry((*resource_id).clone()).or_default().push(id.clone()),
            None => grouped.no_fleet.push(id.clone()),
        }
    }
    grouped
}

/// Merge a lookup-pass result into the first-pass grouping, draining
/// `needs_lookup`. After this call `needs_lookup` is always empty.
pub fn merge(base: &mut GroupedIds, lookup_result: GroupedIds) {
    for (resource_id, ids) in lookup_result.by_resource {
        base.by_resource.entry(resource_id).or_default().extend(ids);
    }
    base.no_fleet.extend(lookup_result.no_fleet);
    base.needs_lookup.clear();
}

/// Flatten a fully-resolved grouping back into the original multiset of
/// instance ids, order-independent. Used to check the round-trip law:
/// `group_by_mapping(ids, mapping) then ungroup` reproduces `ids` exactly
/// (as a multiset) whenever no `needs_lookup` remains.
pub fn ungroup(grouped: &GroupedIds) -> Vec<InstanceId> {
    let mut all: Vec<InstanceId> = grouped.by_resource.values().flatten().cloned().collect();
    all.extend(grouped.no_fleet.iter().cloned());
    all.extend(grouped.needs_lookup.iter().cloned());
    all
}
