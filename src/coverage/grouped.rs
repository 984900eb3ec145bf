//! 等位组合计数：一个 read 在某位点可能同时与多个等位一致（多个状态各走一条
//! 等位），按「该 read 牵涉的等位序号集合」整体计一次，保留歧义信息。

use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::prg::site_index;
use crate::search::SearchState;

/// 输出约定：集合内等位序号从 0 起（序号 - 1），升序去重。
pub type AlleleIdGroup = Vec<u32>;

/// 每位点一把锁；计数分散在位点粒度，避免全局互斥。
#[derive(Debug)]
pub struct GroupedAlleleCounts {
    sites: Vec<Mutex<FxHashMap<AlleleIdGroup, u64>>>,
}

/// 收集一个 read 的全部状态在每个位点牵涉的等位序号集合（0 起）。
pub fn implicated_allele_groups(states: &[SearchState]) -> FxHashMap<u32, BTreeSet<u32>> {
    let mut groups: FxHashMap<u32, BTreeSet<u32>> = FxHashMap::default();
    for state in states {
        for &(site, allele) in &state.variant_site_path {
            groups.entry(site).or_default().insert(allele - 1);
        }
    }
    groups
}

impl GroupedAlleleCounts {
    pub fn generate(number_of_sites: usize) -> Self {
        let sites = (0..number_of_sites)
            .map(|_| Mutex::new(FxHashMap::default()))
            .collect();
        Self { sites }
    }

    /// 按 read 记录：每个位点的牵涉集合整体计一次。
    pub fn record(&self, groups: &FxHashMap<u32, BTreeSet<u32>>) {
        for (&site, ids) in groups {
            let key: AlleleIdGroup = ids.iter().copied().collect();
            let mut map = self.sites[site_index(site)]
                .lock()
                .expect("grouped coverage lock poisoned");
            *map.entry(key).or_insert(0) += 1;
        }
    }

    /// 快照：每位点的 (等位集合 -> 次数) 表，集合内部有序。
    pub fn snapshot(&self) -> Vec<Vec<(AlleleIdGroup, u64)>> {
        self.sites
            .iter()
            .map(|site| {
                let map = site.lock().expect("grouped coverage lock poisoned");
                let mut entries: Vec<(AlleleIdGroup, u64)> =
                    map.iter().map(|(k, &v)| (k.clone(), v)).collect();
                entries.sort();
                entries
            })
            .collect()
    }

    /// JSON 序列化：先对全部不同集合排序编号得到稳定哈希，再给出
    /// 每位点的 {hash: count} 表与 hash -> 集合的字典。
    pub fn dump_json(&self) -> serde_json::Value {
        let snapshot = self.snapshot();

        // 稳定哈希：运行后对全部集合排序编号，与 read 处理顺序无关
        let mut all_groups: BTreeSet<AlleleIdGroup> = BTreeSet::new();
        for site in &snapshot {
            for (group, _) in site {
                all_groups.insert(group.clone());
            }
        }
        let hashes: FxHashMap<&AlleleIdGroup, usize> = all_groups
            .iter()
            .enumerate()
            .map(|(hash, group)| (group, hash))
            .collect();

        let site_counts: Vec<serde_json::Value> = snapshot
            .iter()
            .map(|site| {
                let mut object = serde_json::Map::new();
                for (group, count) in site {
                    object.insert(hashes[group].to_string(), serde_json::json!(count));
                }
                serde_json::Value::Object(object)
            })
            .collect();

        let mut allele_groups = serde_json::Map::new();
        for group in &all_groups {
            allele_groups.insert(hashes[group].to_string(), serde_json::json!(group));
        }

        serde_json::json!({
            "site_counts": site_counts,
            "allele_groups": allele_groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{SearchState, VariantSitePath, VariantSiteState};

    fn state(path: &[(u32, u32)]) -> SearchState {
        SearchState {
            sa_interval: (1, 2),
            variant_site_path: path.iter().copied().collect::<VariantSitePath>(),
            variant_site_state: VariantSiteState::Outside,
        }
    }

    #[test]
    fn two_states_give_grouped_coverage() {
        let grouped = GroupedAlleleCounts::generate(2);
        let states = vec![state(&[(5, 1), (7, 1)]), state(&[(5, 2), (7, 1)])];
        grouped.record(&implicated_allele_groups(&states));

        let snapshot = grouped.snapshot();
        assert_eq!(snapshot[0], vec![(vec![0, 1], 1)]);
        assert_eq!(snapshot[1], vec![(vec![0], 1)]);
    }

    #[test]
    fn unordered_states_give_sorted_ids() {
        let grouped = GroupedAlleleCounts::generate(2);
        let states = vec![state(&[(5, 3), (7, 2)]), state(&[(5, 1), (7, 1)])];
        grouped.record(&implicated_allele_groups(&states));

        let snapshot = grouped.snapshot();
        assert_eq!(snapshot[0], vec![(vec![0, 2], 1)]);
        assert_eq!(snapshot[1], vec![(vec![0, 1], 1)]);
    }

    #[test]
    fn single_state_single_site() {
        let grouped = GroupedAlleleCounts::generate(2);
        let states = vec![state(&[(5, 3)])];
        grouped.record(&implicated_allele_groups(&states));

        let snapshot = grouped.snapshot();
        assert_eq!(snapshot[0], vec![(vec![2], 1)]);
        assert!(snapshot[1].is_empty());
    }

    #[test]
    fn repeated_records_accumulate() {
        let grouped = GroupedAlleleCounts::generate(2);
        let first = vec![state(&[(5, 3)]), state(&[(5, 1), (7, 2)])];
        let second = vec![state(&[(5, 4)]), state(&[(5, 1), (7, 2)])];
        grouped.record(&implicated_allele_groups(&first));
        grouped.record(&implicated_allele_groups(&second));

        let snapshot = grouped.snapshot();
        assert_eq!(snapshot[0], vec![(vec![0, 2], 1), (vec![0, 3], 1)]);
        assert_eq!(snapshot[1], vec![(vec![1], 2)]);
    }

    #[test]
    fn json_hashes_are_distinct_and_cover_groups() {
        let grouped = GroupedAlleleCounts::generate(2);
        let states = vec![state(&[(5, 1)]), state(&[(5, 2)]), state(&[(7, 1)])];
        grouped.record(&implicated_allele_groups(&states));

        let json = grouped.dump_json();
        let allele_groups = json["allele_groups"].as_object().unwrap();
        assert_eq!(allele_groups.len(), 2);
        let site_counts = json["site_counts"].as_array().unwrap();
        assert_eq!(site_counts.len(), 2);
        // 每个位点引用的 hash 必须在字典里
        for site in site_counts {
            for hash in site.as_object().unwrap().keys() {
                assert!(allele_groups.contains_key(hash));
            }
        }
    }
}
