//! Property tests for reciprocal rank fusion

use covermatch::{
    rag::fusion::{fuse, merge_fused, rrf_contribution},
    testing::doc,
    types::{Document, HierarchyTier},
};
use quickcheck_macros::quickcheck;
use std::collections::HashSet;

const K: u32 = 60;
const UNBOUNDED: usize = usize::MAX;

/// Map small integers to a shared id space so lists overlap
fn lists_from(raw: &[Vec<u8>]) -> Vec<Vec<Document>> {
    raw.iter()
        .map(|list| {
            list.iter()
                .map(|n| {
                    let id = format!("d{}", n % 12);
                    let similarity = 0.5 + (n % 5) as f32 * 0.1;
                    doc(&id, HierarchyTier::Specific, similarity)
                })
                .collect()
        })
        .collect()
}

fn ranked(ids: &[&str]) -> Vec<Document> {
    ids.iter()
        .enumerate()
        .map(|(rank, id)| doc(id, HierarchyTier::Specific, 0.9 - rank as f32 * 0.1))
        .collect()
}

#[test]
fn test_document_in_every_list_ranks_first() {
    let lists = vec![
        ranked(&["A", "B", "C"]),
        ranked(&["B", "C", "D"]),
        ranked(&["C", "A", "D"]),
    ];

    let fused = fuse(&lists, K, 15);

    assert_eq!(fused[0].id, "C");
    let expected = rrf_contribution(K, 2) + rrf_contribution(K, 1) + rrf_contribution(K, 0);
    assert!((fused[0].rrf_score - expected).abs() < 1e-12);
    assert_eq!(fused.last().map(|d| d.id.as_str()), Some("D"));
    assert_eq!(fused.len(), 4);
}

#[quickcheck]
fn prop_fusion_is_deterministic(raw: Vec<Vec<u8>>) -> bool {
    let lists = lists_from(&raw);
    fuse(&lists, K, 15) == fuse(&lists, K, 15)
}

#[quickcheck]
fn prop_list_order_does_not_matter(raw: Vec<Vec<u8>>) -> bool {
    let lists = lists_from(&raw);
    let mut reversed = lists.clone();
    reversed.reverse();

    let forward = fuse(&lists, K, UNBOUNDED);
    let backward = fuse(&reversed, K, UNBOUNDED);

    forward.len() == backward.len()
        && forward.iter().all(|a| {
            backward
                .iter()
                .find(|b| b.id == a.id)
                .map(|b| (a.rrf_score - b.rrf_score).abs() < 1e-9)
                .unwrap_or(false)
        })
}

#[quickcheck]
fn prop_output_sorted_unique_and_bounded(raw: Vec<Vec<u8>>, top_k: u8) -> bool {
    let top_k = top_k as usize;
    let fused = fuse(&lists_from(&raw), K, top_k);

    let unique: HashSet<&str> = fused.iter().map(|d| d.id.as_str()).collect();
    let sorted = fused
        .windows(2)
        .all(|pair| pair[0].rrf_score >= pair[1].rrf_score);

    fused.len() <= top_k && unique.len() == fused.len() && sorted
}

#[quickcheck]
fn prop_extra_list_never_lowers_a_score(raw: Vec<Vec<u8>>, extra: Vec<u8>) -> bool {
    let lists = lists_from(&raw);
    let before = fuse(&lists, K, UNBOUNDED);

    let mut extended = lists;
    extended.extend(lists_from(&[extra]));
    let after = fuse(&extended, K, UNBOUNDED);

    before.iter().all(|old| {
        after
            .iter()
            .find(|new| new.id == old.id)
            .map(|new| new.rrf_score >= old.rrf_score)
            .unwrap_or(false)
    })
}

#[quickcheck]
fn prop_merge_with_empty_round_is_identity(raw: Vec<Vec<u8>>) -> bool {
    let fused = fuse(&lists_from(&raw), K, 15);
    merge_fused(&fused, &[], 15) == fused
}
