//! 逐碱基覆盖：每个等位的每个碱基位置各一个饱和计数器。
//!
//! 同一 read 的多个状态可能经过同一 (位点, 等位)；按 read 维护
//! 「该键已计入的最高下标」，只对新出现的后缀计数，避免重复计入。
//! 已知行为保留：先映射较长区间、后映射起点更早的较短区间时，
//! 后者起点前的碱基不会补计。

use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::index::PrgIndex;
use crate::prg::site_index;
use crate::search::{SearchState, VariantLocus};

/// 一个 read 内按 (位点, 等位) 记录已计入的最高碱基下标。
pub type SitesCoverageBoundaries = FxHashMap<VariantLocus, usize>;

#[derive(Debug)]
pub struct AlleleBaseCoverage {
    /// sites[位点][等位][碱基]
    sites: Vec<Vec<Vec<AtomicU32>>>,
    /// 计数上限：到达后不再自增（不回绕）
    cap: u32,
}

impl AlleleBaseCoverage {
    /// 扫描位点掩码布好结构：掩码相同的连续段即一个等位，段长即碱基数。
    pub fn generate(idx: &PrgIndex, cap: u32) -> Self {
        let mut sites: Vec<Vec<Vec<AtomicU32>>> = (0..idx.number_of_sites())
            .map(|_| Vec::new())
            .collect();

        let mut allele_size = 0usize;
        let mut last_marker = 0u32;

        for &mask_value in idx.sites_mask.iter().chain(std::iter::once(&0)) {
            if mask_value != 0 {
                allele_size += 1;
                last_marker = mask_value;
                continue;
            }
            if allele_size == 0 {
                continue;
            }
            let bases = (0..allele_size).map(|_| AtomicU32::new(0)).collect();
            sites[site_index(last_marker)].push(bases);
            allele_size = 0;
        }

        Self { sites, cap }
    }

    /// 每位点的等位碱基数（allele_sum 结构复用该形状）。
    pub fn shape(&self) -> Vec<usize> {
        self.sites.iter().map(Vec::len).collect()
    }

    fn saturating_increment(&self, slot: &AtomicU32) {
        let mut current = slot.load(Ordering::Relaxed);
        while current < self.cap {
            match slot.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// 对一个 (位点, 等位) 在 [offset, offset + max_bases) 范围内计数，
    /// 截断到等位长度；返回本次向前消费的碱基数。
    fn set_site_base_coverage(
        &self,
        boundaries: &mut SitesCoverageBoundaries,
        locus: VariantLocus,
        allele_coverage_offset: usize,
        max_bases_to_set: usize,
    ) -> usize {
        let (site, allele_id) = locus;
        let allele = &self.sites[site_index(site)][allele_id as usize - 1];

        let index_end = (allele_coverage_offset + max_bases_to_set).min(allele.len());
        let count_bases_consumed = index_end - allele_coverage_offset;

        let mut index_start = allele_coverage_offset;
        if let Some(&previous_end) = boundaries.get(&locus) {
            index_start = index_start.max(previous_end);
        }
        boundaries.insert(locus, index_end);

        for slot in &allele[index_start..index_end] {
            self.saturating_increment(slot);
        }
        count_bases_consumed
    }

    /// 对一个匹配实例（状态区间内的单个 SA 位置）记录路径上各等位的碱基覆盖。
    /// 复杂度全花在 read 起止于等位内部的情形；其余情况就是整段自增。
    fn sa_index_allele_base_coverage(
        &self,
        boundaries: &mut SitesCoverageBoundaries,
        sa_index: usize,
        read_length: usize,
        state: &SearchState,
        idx: &PrgIndex,
    ) {
        let mut consumed = 0usize;
        let mut path_iter = state.variant_site_path.iter();
        let mut last_range: Option<(usize, usize)> = None;
        let mut pending_range: Option<(usize, usize)> = None;

        let read_start = idx.fm.text_pos(sa_index);
        if idx.site_at(read_start) != 0 {
            // read 从等位内部起步：偏移从等位起点数起
            let &locus = path_iter.next().expect("path is non-empty");
            last_range = Some(idx.site_text_range(locus.0));
            let offset = idx.allele_start_offset(read_start);
            consumed += self.set_site_base_coverage(boundaries, locus, offset, read_length);
        } else {
            // 快进到第一个位点入口
            let &(site, _) = path_iter.clone().next().expect("path is non-empty");
            let range = idx.site_text_range(site);
            consumed += range.0 - read_start;
            pending_range = Some(range);
        }

        while consumed < read_length {
            let Some(&locus) = path_iter.next() else { break };
            let range = match last_range {
                Some(last) => {
                    let range = idx.site_text_range(locus.0);
                    // 两位点之间的字面段
                    consumed += range.0 - last.1 - 1;
                    range
                }
                None => pending_range.take().expect("first site range precomputed"),
            };
            last_range = Some(range);

            if consumed >= read_length {
                break;
            }
            let max_bases = read_length - consumed;
            consumed += self.set_site_base_coverage(boundaries, locus, 0, max_bases);
        }
    }

    /// 记录一个 read 的全部状态。边界表按 read 新建，跨状态防重复计数。
    pub fn record(&self, states: &[SearchState], read_length: usize, idx: &PrgIndex) {
        let mut boundaries = SitesCoverageBoundaries::default();

        for state in states {
            if state.variant_site_path.is_empty() {
                continue;
            }
            let (lo, hi) = state.sa_interval;
            for sa_index in lo..=hi {
                self.sa_index_allele_base_coverage(
                    &mut boundaries,
                    sa_index,
                    read_length,
                    state,
                    idx,
                );
            }
        }
    }

    /// 快照为普通整数数组（位点序、等位序、碱基序）。
    pub fn snapshot(&self) -> Vec<Vec<Vec<u32>>> {
        self.sites
            .iter()
            .map(|site| {
                site.iter()
                    .map(|allele| allele.iter().map(|c| c.load(Ordering::Relaxed)).collect())
                    .collect()
            })
            .collect()
    }

    pub fn dump_json(&self) -> serde_json::Value {
        serde_json::json!(self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexMeta, PrgIndex};
    use crate::prg;
    use crate::search::{vbwt_search_pattern, handle_allele_encapsulated_states};
    use crate::util::dna;

    fn build_index(raw: &[u8]) -> PrgIndex {
        let encoded = prg::encode_prg(raw).unwrap();
        PrgIndex::build(encoded, IndexMeta::default()).unwrap()
    }

    fn search(raw_read: &[u8], idx: &PrgIndex) -> Vec<SearchState> {
        let pattern = dna::encode_read(raw_read).unwrap();
        let states = vbwt_search_pattern(&pattern, idx);
        handle_allele_encapsulated_states(states, idx)
    }

    #[test]
    fn structure_matches_allele_lengths() {
        let idx = build_index(b"a5g6t6aa5c");
        let coverage = AlleleBaseCoverage::generate(&idx, u32::MAX);
        let snapshot = coverage.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0], vec![vec![0], vec![0], vec![0, 0]]);
    }

    #[test]
    fn crossing_read_covers_allele_bases() {
        let idx = build_index(b"aca5g6t5gcatt");
        let coverage = AlleleBaseCoverage::generate(&idx, u32::MAX);
        let states = search(b"atgca", &idx);
        coverage.record(&states, 5, &idx);

        let snapshot = coverage.snapshot();
        // t 分支计 1，g 分支不计
        assert_eq!(snapshot[0], vec![vec![0], vec![1]]);
    }

    #[test]
    fn mid_allele_start_uses_offset() {
        // read 从第三等位第二个碱基起步
        let idx = build_index(b"a5g6t6aaaa5c");
        let coverage = AlleleBaseCoverage::generate(&idx, u32::MAX);
        let states = search(b"aaac", &idx);
        coverage.record(&states, 4, &idx);

        let snapshot = coverage.snapshot();
        assert_eq!(snapshot[0], vec![vec![0], vec![0], vec![0, 1, 1, 1]]);
    }

    #[test]
    fn no_double_count_on_overlapping_states() {
        let idx = build_index(b"aca5g6t5gcatt");
        let coverage = AlleleBaseCoverage::generate(&idx, u32::MAX);

        let states = search(b"atgca", &idx);
        // 人为重复同一状态：同一 read 内不得重复计数
        let doubled: Vec<SearchState> = states.iter().chain(states.iter()).cloned().collect();
        coverage.record(&doubled, 5, &idx);

        let snapshot = coverage.snapshot();
        assert_eq!(snapshot[0], vec![vec![0], vec![1]]);
    }

    #[test]
    fn counter_saturates_at_cap() {
        let idx = build_index(b"aca5g6t5gcatt");
        let coverage = AlleleBaseCoverage::generate(&idx, 3);
        let states = search(b"atgca", &idx);
        for _ in 0..10 {
            coverage.record(&states, 5, &idx);
        }
        let snapshot = coverage.snapshot();
        assert_eq!(snapshot[0][1], vec![3]);
    }

    #[test]
    fn two_site_read_covers_both_sites() {
        let idx = build_index(b"gct5c6g6t5ag7t8c7ta");
        let coverage = AlleleBaseCoverage::generate(&idx, u32::MAX);
        let states = search(b"ctcagtt", &idx);
        coverage.record(&states, 7, &idx);

        let snapshot = coverage.snapshot();
        assert_eq!(snapshot[0], vec![vec![1], vec![0], vec![0]]);
        assert_eq!(snapshot[1], vec![vec![1], vec![0]]);
    }
}
