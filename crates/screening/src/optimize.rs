// Path: crates/screening/src/optimize.rs

//! Insertion-time slot reordering.
//!
//! Before a block is persisted its slots are permuted so that fingerprints
//! sharing rare bits sit next to each other. Screening reads each query bit only
//! inside the byte range where that bit occurs, so tight clusters of rare bits
//! mean fewer bytes read per query.

use crate::bitplane::BitPlanes;
use crate::block::BlockMeta;
use molsift_telemetry::screening_metrics;
use molsift_telemetry::time::Timer;
use std::ops::Range;

/// Bit positions in the order the optimizer partitions on: priority bits
/// first, then by ascending count. Ties keep bit order.
pub fn partition_order(meta: &BlockMeta, priority: &Range<usize>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..meta.width()).collect();
    order.sort_by_key(|&bit| (!priority.contains(&bit), meta.counters[bit]));
    order
}

/// The slot permutation `perm[new_slot] = old_slot` produced by clustering on
/// `order`.
///
/// For every bit in turn, the slots not yet claimed by an earlier bit are
/// stably split into those carrying the bit, which are claimed, and the rest.
pub fn cluster_slots(planes: &BitPlanes, used: usize, order: &[usize]) -> Vec<usize> {
    cluster_tail(planes, (0..used).collect(), 0, order)
}

/// Clusters `perm[from..]` as [`cluster_slots`] does; `perm[..from]` stays put.
fn cluster_tail(planes: &BitPlanes, mut perm: Vec<usize>, from: usize, order: &[usize]) -> Vec<usize> {
    let used = perm.len();
    let mut claimed = from;
    for &bit in order {
        if claimed >= used {
            break;
        }
        let (with, without): (Vec<usize>, Vec<usize>) = perm[claimed..]
            .iter()
            .partition(|&&slot| planes.contains(bit, slot));
        if with.is_empty() {
            continue;
        }
        perm.truncate(claimed);
        claimed += with.len();
        perm.extend(with);
        perm.extend(without);
    }
    perm
}

/// Applies `perm` to the planes and mapping of a block and recomputes its slot
/// ranges. Counters are unchanged.
pub fn apply_permutation(planes: &BitPlanes, meta: &mut BlockMeta, perm: &[usize]) -> BitPlanes {
    let mut out = BitPlanes::new(planes.width(), planes.capacity());
    for bit in 0..planes.width() {
        for (new_slot, &old_slot) in perm.iter().enumerate() {
            if planes.contains(bit, old_slot) {
                // Both slots are below `used`, hence below capacity.
                let _ = out.set(bit, new_slot);
            }
        }
    }
    meta.mapping = perm
        .iter()
        .map(|&old_slot| meta.mapping.get(old_slot).copied().unwrap_or(old_slot as u32))
        .collect();
    meta.recompute_ranges(&out);
    out
}

/// Undoes the optimizer on a reloaded partition so that slot `i` again holds the
/// `i`-th inserted fingerprint and `mapping` is the identity.
pub fn restore_insertion_order(planes: &BitPlanes, meta: &mut BlockMeta) -> BitPlanes {
    let mut perm = vec![0; meta.used];
    for (slot, &order) in meta.mapping.iter().enumerate() {
        if let Some(p) = perm.get_mut(order as usize) {
            *p = slot;
        }
    }
    apply_permutation(planes, meta, &perm)
}

/// Reorders a pending block in place before it is persisted.
///
/// `published` is the slot order of a partition that was already persisted
/// and has since been resumed: its slots keep those positions and only the
/// slots appended after it are clustered, so the rewritten row leaves every
/// published slot unchanged.
pub fn optimize_block(
    planes: &mut BitPlanes,
    meta: &mut BlockMeta,
    priority: &Range<usize>,
    published: &[u32],
) {
    let _timer = Timer::new(|secs| screening_metrics().observe_optimize_duration(secs));
    let order = partition_order(meta, priority);
    let perm = if published.is_empty() {
        cluster_slots(planes, meta.used, &order)
    } else {
        let mut perm: Vec<usize> = published.iter().map(|&slot| slot as usize).collect();
        perm.extend(published.len()..meta.used);
        cluster_tail(planes, perm, published.len(), &order)
    };
    *planes = apply_permutation(planes, meta, &perm);
    tracing::debug!(
        target: "screening",
        slots = meta.used,
        kept = published.len(),
        "optimized pending block"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(width: usize, capacity: usize, fps: &[&[usize]]) -> (BitPlanes, BlockMeta) {
        let mut planes = BitPlanes::new(width, capacity);
        let mut meta = BlockMeta::empty(width);
        for (slot, bits) in fps.iter().enumerate() {
            for &bit in bits.iter() {
                planes.set(bit, slot).unwrap();
                meta.record(bit, slot as u32);
            }
            meta.mapping.push(slot as u32);
            meta.used += 1;
        }
        (planes, meta)
    }

    #[test]
    fn test_order_prefers_priority_then_rarity() {
        let (_, meta) = block(8, 8, &[&[0, 1, 4], &[0, 4], &[0, 5]]);
        // counters: bit0=3, bit1=1, bit4=2, bit5=1, others 0.
        let all = partition_order(&meta, &(0..8));
        assert_eq!(&all[..4], &[2, 3, 6, 7]);
        assert_eq!(&all[4..], &[1, 5, 4, 0]);

        let high = partition_order(&meta, &(4..8));
        assert_eq!(&high[..4], &[6, 7, 5, 4]);
        assert_eq!(&high[4..], &[2, 3, 1, 0]);
    }

    #[test]
    fn test_rare_bits_are_clustered() {
        // Bit 1 is the rarest, then bit 7 (slots 0 and 3), then bit 0.
        let (mut planes, mut meta) = block(8, 16, &[&[0, 7], &[0], &[0, 1], &[0, 7]]);
        optimize_block(&mut planes, &mut meta, &(0..8), &[]);

        assert_eq!(meta.mapping, vec![2, 0, 3, 1]);
        assert_eq!(meta.slot_range(1), Some((0, 0)));
        assert_eq!(meta.slot_range(7), Some((1, 2)));
        assert_eq!(meta.slot_range(0), Some((0, 3)));
        assert!(planes.get(7, 1).unwrap() && planes.get(7, 2).unwrap());
        assert!(!planes.get(7, 3).unwrap());
    }

    #[test]
    fn test_restore_undoes_clustering() {
        let (planes, meta) = block(8, 16, &[&[0, 7], &[0], &[0, 1], &[0, 7]]);
        let (mut shuffled, mut shuffled_meta) = (planes.clone(), meta.clone());
        optimize_block(&mut shuffled, &mut shuffled_meta, &(0..8), &[]);
        assert_ne!(shuffled, planes);

        let restored = restore_insertion_order(&shuffled, &mut shuffled_meta);
        assert_eq!(restored, planes);
        assert_eq!(shuffled_meta, meta);
    }

    #[test]
    fn test_content_is_preserved() {
        let fps: Vec<Vec<usize>> = (0..37usize)
            .map(|i| (0..16).filter(|b| (i * 7 + b * 3) % 5 == 0).collect())
            .collect();
        let refs: Vec<&[usize]> = fps.iter().map(Vec::as_slice).collect();
        let (mut planes, mut meta) = block(16, 40, &refs);
        let before: Vec<u32> = (0..16).map(|b| planes.popcount(b).unwrap()).collect();
        let original = planes.clone();

        optimize_block(&mut planes, &mut meta, &(0..16), &[]);

        let after: Vec<u32> = (0..16).map(|b| planes.popcount(b).unwrap()).collect();
        assert_eq!(before, after);
        let mut seen = meta.mapping.clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..37).collect::<Vec<u32>>());
        for (slot, &orig) in meta.mapping.iter().enumerate() {
            for bit in 0..16 {
                assert_eq!(
                    planes.get(bit, slot).unwrap(),
                    original.get(bit, orig as usize).unwrap()
                );
            }
        }
    }

    #[test]
    fn test_resumed_block_keeps_published_slots() {
        // Published as [{0, 1}, {5}] in slot order [1, 0], then resumed.
        let (mut planes, mut meta) = block(8, 8, &[&[5], &[0, 1]]);
        optimize_block(&mut planes, &mut meta, &(0..8), &[]);
        let published_planes = planes.clone();
        let published = meta.mapping.clone();

        let mut resumed_meta = meta.clone();
        let mut resumed = restore_insertion_order(&planes, &mut resumed_meta);
        for (slot, bits) in [[1usize, 6], [5, 6]].iter().enumerate() {
            let slot = slot + 2;
            for &bit in bits {
                resumed.set(bit, slot).unwrap();
                resumed_meta.record(bit, slot as u32);
            }
            resumed_meta.mapping.push(slot as u32);
            resumed_meta.used += 1;
        }
        optimize_block(&mut resumed, &mut resumed_meta, &(0..8), &published);

        assert_eq!(&resumed_meta.mapping[..2], &published[..]);
        for bit in 0..8 {
            for slot in 0..2 {
                assert_eq!(
                    resumed.get(bit, slot).unwrap(),
                    published_planes.get(bit, slot).unwrap()
                );
            }
        }
        let mut seen = resumed_meta.mapping.clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }
}
