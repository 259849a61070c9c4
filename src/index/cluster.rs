use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};

/// Primary id derived from an id's leading bytes; `1` for absent or empty input.
///
/// Four or more bytes are read as a little-endian `i32` and made non-negative, with
/// `i32::MIN` mapped to `1`. Shorter input uses its first byte.
pub fn generate_primary_id(bytes: Option<&[u8]>) -> i32 {
    match bytes {
        None | Some([]) => 1,
        Some(b) if b.len() >= 4 => match LittleEndian::read_i32(&b[..4]) {
            i32::MIN => 1,
            v => v.abs(),
        },
        Some(b) => i32::from(b[0]),
    }
}

/// Returns an explicit primary id when positive, otherwise one derived from `id`.
pub fn primary_id_or_generated(explicit: i32, id: Option<&[u8]>) -> i32 {
    if explicit > 0 {
        explicit
    } else {
        generate_primary_id(id)
    }
}

/// Cluster owning `primary_id` among `num_clusters`. Routing and query splitting both
/// go through this function.
pub fn cluster_of(primary_id: i32, num_clusters: usize) -> usize {
    if num_clusters == 0 {
        return 0;
    }
    primary_id.unsigned_abs() as usize % num_clusters
}

/// Index ids (and their primary ids and per-index params) destined for one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterParams<P> {
    pub index_ids: Vec<Vec<u8>>,
    pub primary_ids: Vec<i32>,
    pub params: BTreeMap<Vec<u8>, P>,
}

impl<P> Default for ClusterParams<P> {
    fn default() -> Self {
        Self {
            index_ids: Vec::new(),
            primary_ids: Vec::new(),
            params: BTreeMap::new(),
        }
    }
}

/// Groups `index_ids` by [`cluster_of`]. Primary ids come from `primary_ids` when it
/// lines up with `index_ids`, otherwise they are generated from each index id. Per-index
/// params follow their index id into its cluster.
pub fn split_index_ids_by_cluster<P: Clone>(
    index_ids: &[Vec<u8>],
    primary_ids: &[i32],
    params: &BTreeMap<Vec<u8>, P>,
    num_clusters: usize,
) -> BTreeMap<usize, ClusterParams<P>> {
    let explicit = primary_ids.len() == index_ids.len();
    let mut clusters: BTreeMap<usize, ClusterParams<P>> = BTreeMap::new();

    for (i, index_id) in index_ids.iter().enumerate() {
        let primary_id = if explicit {
            primary_ids[i]
        } else {
            generate_primary_id(Some(index_id))
        };
        let entry = clusters
            .entry(cluster_of(primary_id, num_clusters))
            .or_default();
        entry.index_ids.push(index_id.clone());
        entry.primary_ids.push(primary_id);
        if let Some(p) = params.get(index_id) {
            entry.params.insert(index_id.clone(), p.clone());
        }
    }
    clusters
}

/// Human readable rendering of an id or tag value for logs and filter descriptions.
pub fn readable_bytes(bytes: Option<&[u8]>) -> String {
    match bytes {
        None | Some([]) => "Null Buffer".to_string(),
        Some(b) if b.len() == 4 => LittleEndian::read_i32(b).to_string(),
        Some(b) => {
            let parts: Vec<String> = b.iter().map(|x| x.to_string()).collect();
            format!("{} (Bytes)", parts.join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_id_edge_cases() {
        assert_eq!(generate_primary_id(None), 1);
        assert_eq!(generate_primary_id(Some(&[])), 1);
        assert_eq!(generate_primary_id(Some(&i32::MIN.to_le_bytes())), 1);
        assert_eq!(generate_primary_id(Some(&(-42i32).to_le_bytes())), 42);
        assert_eq!(generate_primary_id(Some(&[7, 0, 0, 0, 99])), 7);
        assert_eq!(generate_primary_id(Some(&[200])), 200);
    }

    #[test]
    fn primary_id_is_deterministic() {
        let id = b"some-index".to_vec();
        assert_eq!(
            generate_primary_id(Some(&id)),
            generate_primary_id(Some(&id.clone()))
        );
        assert!(generate_primary_id(Some(&id)) > 0);
    }

    #[test]
    fn explicit_primary_id_wins_when_positive() {
        assert_eq!(primary_id_or_generated(5, Some(&[9, 0, 0, 0])), 5);
        assert_eq!(primary_id_or_generated(0, Some(&[9, 0, 0, 0])), 9);
    }

    #[test]
    fn split_groups_by_modulo() {
        let ids: Vec<Vec<u8>> = (1..=6).map(|i: i32| i.to_le_bytes().to_vec()).collect();
        let mut params = BTreeMap::new();
        params.insert(ids[1].clone(), "two");

        let clusters = split_index_ids_by_cluster(&ids, &[], &params, 3);
        assert_eq!(clusters.len(), 3);
        assert_eq!(clusters[&1].primary_ids, vec![1, 4]);
        assert_eq!(clusters[&2].primary_ids, vec![2, 5]);
        assert_eq!(clusters[&0].primary_ids, vec![3, 6]);
        assert_eq!(clusters[&2].params.get(&ids[1]), Some(&"two"));
        assert!(clusters[&0].params.is_empty());
    }

    #[test]
    fn split_uses_explicit_primary_ids_when_aligned() {
        let ids = vec![vec![1, 0, 0, 0], vec![2, 0, 0, 0]];
        let params: BTreeMap<Vec<u8>, ()> = BTreeMap::new();
        let clusters = split_index_ids_by_cluster(&ids, &[10, 10], &params, 4);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[&2].index_ids, ids);
    }

    #[test]
    fn readable_rendering() {
        assert_eq!(readable_bytes(None), "Null Buffer");
        assert_eq!(readable_bytes(Some(&5i32.to_le_bytes())), "5");
        assert_eq!(readable_bytes(Some(&[1, 2])), "1 2 (Bytes)");
    }
}
