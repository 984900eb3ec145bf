//! 变异感知反向搜索（vBWT search）。
//!
//! 普通反向搜索每步用 rank 查询把 SA 区间缩小一格；vBWT 在每次消费碱基之前，
//! 先解析当前区间内可见的全部变异标记：
//! - 在位点出口边界（文本序靠右的奇数标记）命中 -> 反向即将进入位点，
//!   按等位基因扇出新状态并在路径前端记录 (位点, 等位)；
//! - 在位点入口边界命中 -> 离开位点，坍缩到入口的单点区间；
//! - 命中分隔标记 -> 跳到位点入口，必要时补记刚走完的等位序号。
//! 标记解析产生的新状态与原状态一起参与随后的碱基扩展，扩展后区间失效
//! （lo - 1 == hi）的状态被丢弃。

use std::collections::VecDeque;

use crate::index::fm::SaInterval;
use crate::index::PrgIndex;
use crate::kmer::KmerIndex;
use crate::prg::Marker;

/// (位点边界标记值, 1 起等位序号)。
pub type VariantLocus = (u32, u32);

/// 已穿越位点的记录，前端为最近进入（文本序最靠左）的位点。
pub type VariantSitePath = VecDeque<VariantLocus>;

/// 路径仍为空时用于区分标记处理方式的两态标志。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantSiteState {
    Outside,
    Within,
}

/// 一条与 read 一致的图路径候选：匹配区间 + 已记录的位点路径。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchState {
    pub sa_interval: SaInterval,
    pub variant_site_path: VariantSitePath,
    pub variant_site_state: VariantSiteState,
}

impl SearchState {
    pub fn new(sa_interval: SaInterval) -> Self {
        Self {
            sa_interval,
            variant_site_path: VariantSitePath::new(),
            variant_site_state: VariantSiteState::Outside,
        }
    }
}

/// 边界标记在当前语境下的定位信息。
struct SiteBoundaryMarkerInfo {
    is_start_boundary: bool,
    marker_sa_index: usize,
    marker_char: u32,
}

/// 定位一个边界标记出现：由它右侧后缀的 SA 下标经 LF 映射求得标记自身的
/// SA 下标，再与成对出现的另一侧比较文本位置，判断入口还是出口。
fn site_boundary_marker_info(
    marker_char: u32,
    sa_right_of_marker: usize,
    idx: &PrgIndex,
) -> SiteBoundaryMarkerInfo {
    let first_sa_index = idx.fm.marker_first_sa_index(marker_char);
    let offset = idx.fm.marker_rank(marker_char, sa_right_of_marker);
    let marker_sa_index = first_sa_index + offset;

    let marker_text_idx = idx.fm.text_pos(marker_sa_index);
    let other_marker_text_idx = if marker_sa_index == first_sa_index {
        idx.fm.text_pos(first_sa_index + 1)
    } else {
        idx.fm.text_pos(first_sa_index)
    };

    SiteBoundaryMarkerInfo {
        is_start_boundary: marker_text_idx <= other_marker_text_idx,
        marker_sa_index,
        marker_char,
    }
}

/// 分隔标记出现处对应的等位序号：紧跟标记之后的文本位置落在该等位内。
fn allele_id_at_separator(allele_marker_sa_index: usize, idx: &PrgIndex) -> u32 {
    let internal_allele_text_index = idx.fm.text_pos(allele_marker_sa_index) - 1;
    idx.allele_at(internal_allele_text_index)
}

/// 反向进入位点：每个分隔标记出现各生成一个状态（坍缩为单点区间），
/// 外加位点出口边界自身的一个状态（对应最后一个等位）。
fn entering_site_search_states(
    boundary: &SiteBoundaryMarkerInfo,
    current: &SearchState,
    idx: &PrgIndex,
) -> Vec<SearchState> {
    let (first, last) = idx.fm.allele_marker_interval(boundary.marker_char);
    let mut new_states = Vec::with_capacity(last - first + 2);

    for allele_marker_sa_index in first..=last {
        let allele_id = allele_id_at_separator(allele_marker_sa_index, idx);
        let mut state = current.clone();
        state.sa_interval = (allele_marker_sa_index, allele_marker_sa_index);
        state.variant_site_state = VariantSiteState::Within;
        state
            .variant_site_path
            .push_front((boundary.marker_char, allele_id));
        new_states.push(state);
    }

    // 分隔标记的完整 SA 区间不含位点出口，末位等位单独补一个状态
    let final_allele_id = (last - first + 1) as u32 + 1;
    let mut state = current.clone();
    state.sa_interval = (boundary.marker_sa_index, boundary.marker_sa_index);
    state.variant_site_state = VariantSiteState::Within;
    state
        .variant_site_path
        .push_front((boundary.marker_char, final_allele_id));
    new_states.push(state);

    new_states
}

/// 反向离开位点：坍缩到位点入口边界的单点区间。
/// 路径为空且未确认曾在位点内时，按「从位点内部起始比对」的约定补记等位 1。
fn exiting_site_search_state(
    boundary: &SiteBoundaryMarkerInfo,
    current: &SearchState,
) -> SearchState {
    let mut state = current.clone();

    let check_required = state.variant_site_state != VariantSiteState::Within;
    if check_required && state.variant_site_path.is_empty() {
        state.variant_site_path.push_front((boundary.marker_char, 1));
    }

    state.sa_interval = (boundary.marker_sa_index, boundary.marker_sa_index);
    state.variant_site_state = VariantSiteState::Outside;
    state
}

/// 命中分隔标记：当前等位走完，跳到位点入口边界。
/// 位点路径尚未记录本位点时（从等位内部起始比对），用等位掩码补记刚走完的
/// 等位序号；已记录过的路径不重复记录。
fn process_allele_marker(
    site: u32,
    sa_right_of_marker: usize,
    current: &SearchState,
    idx: &PrgIndex,
) -> SearchState {
    let first_sa_index = idx.fm.marker_first_sa_index(site);
    let second_sa_index = first_sa_index + 1;

    // 两个边界出现在 SA 中相邻；文本位置较小者为位点入口
    let boundary_start_sa_index =
        if idx.fm.text_pos(first_sa_index) < idx.fm.text_pos(second_sa_index) {
            first_sa_index
        } else {
            second_sa_index
        };

    let mut state = current.clone();

    let check_required = state.variant_site_state != VariantSiteState::Within;
    if check_required && state.variant_site_path.is_empty() {
        let allele_id = idx.allele_at(idx.fm.text_pos(sa_right_of_marker));
        state.variant_site_path.push_front((site, allele_id));
    }

    state.sa_interval = (boundary_start_sa_index, boundary_start_sa_index);
    state.variant_site_state = VariantSiteState::Outside;
    state
}

/// 处理一个状态区间内可见的全部标记，返回派生出的新状态。
fn process_markers_search_state(current: &SearchState, idx: &PrgIndex) -> Vec<SearchState> {
    let markers = idx.fm.markers_in_interval(current.sa_interval);
    if markers.is_empty() {
        return Vec::new();
    }

    let mut derived = Vec::new();
    for (sa_right_of_marker, marker_char) in markers {
        match Marker::from_raw(marker_char) {
            Some(Marker::SiteBoundary { site }) => {
                let boundary = site_boundary_marker_info(site, sa_right_of_marker, idx);
                if boundary.is_start_boundary {
                    derived.push(exiting_site_search_state(&boundary, current));
                } else {
                    derived.extend(entering_site_search_states(&boundary, current, idx));
                }
            }
            Some(Marker::AlleleSeparator { site }) => {
                derived.push(process_allele_marker(site, sa_right_of_marker, current, idx));
            }
            None => unreachable!("marker position table holds non-marker symbol"),
        }
    }
    derived
}

/// 标记解析：原状态全部保留，派生状态追加其后。
fn process_markers_search_states(states: &[SearchState], idx: &PrgIndex) -> Vec<SearchState> {
    let mut out = states.to_vec();
    for state in states {
        out.extend(process_markers_search_state(state, idx));
    }
    out
}

/// 标准反向扩展一个碱基；失效区间的状态被丢弃。
fn search_base_backwards(base: u8, states: Vec<SearchState>, idx: &PrgIndex) -> Vec<SearchState> {
    states
        .into_iter()
        .filter_map(|mut state| {
            let next = idx.fm.extend_with_base(base, state.sa_interval)?;
            state.sa_interval = next;
            Some(state)
        })
        .collect()
}

/// 消费一个 read 碱基：先解析标记，再做碱基扩展。
pub fn process_read_char_search_states(
    base: u8,
    states: &[SearchState],
    idx: &PrgIndex,
) -> Vec<SearchState> {
    let post_markers = process_markers_search_states(states, idx);
    search_base_backwards(base, post_markers, idx)
}

/// 对一段模式做完整 vBWT 搜索（kmer 预计算的主入口）。
/// 首个碱基从全区间做普通扩展——空匹配没有「当前位置」，标记解析无意义；
/// 其后每个碱基经 process_read_char_search_states。
/// 返回未经内含等位拆分的原始状态集。
pub fn vbwt_search_pattern(pattern: &[u8], idx: &PrgIndex) -> Vec<SearchState> {
    let mut iter = pattern.iter().rev();
    let first = match iter.next() {
        Some(&b) => b,
        None => return Vec::new(),
    };

    let initial = match idx.fm.extend_with_base(first, idx.fm.full_interval()) {
        Some(interval) => SearchState::new(interval),
        None => return Vec::new(),
    };

    let mut states = vec![initial];
    for &base in iter {
        states = process_read_char_search_states(base, &states, idx);
        if states.is_empty() {
            break;
        }
    }
    states
}

/// 把一个空路径状态按文本位置拆分：位点内位置按连续相同 (位点, 等位) 段
/// 归并成带路径的状态，位点外的连续段保持无路径。
fn handle_allele_encapsulated_state(state: &SearchState, idx: &PrgIndex) -> Vec<SearchState> {
    debug_assert!(state.variant_site_path.is_empty());

    let (lo, hi) = state.sa_interval;
    let mut out: Vec<SearchState> = Vec::new();
    let mut run: Option<(u32, u32, usize, usize)> = None; // (site, allele, run_lo, run_hi)

    for sa_index in lo..=hi {
        let text_pos = idx.fm.text_pos(sa_index);
        let site = idx.site_at(text_pos);
        let allele = idx.allele_at(text_pos);

        match run {
            Some((s, a, run_lo, _)) if s == site && a == allele => {
                run = Some((s, a, run_lo, sa_index));
            }
            _ => {
                if let Some(r) = run.take() {
                    out.push(run_to_state(r));
                }
                run = Some((site, allele, sa_index, sa_index));
            }
        }
    }
    if let Some(r) = run {
        out.push(run_to_state(r));
    }
    out
}

fn run_to_state((site, allele, lo, hi): (u32, u32, usize, usize)) -> SearchState {
    if site == 0 {
        SearchState::new((lo, hi))
    } else {
        SearchState {
            sa_interval: (lo, hi),
            variant_site_path: VariantSitePath::from([(site, allele)]),
            variant_site_state: VariantSiteState::Within,
        }
    }
}

/// 内含等位收尾：read 全部消费完后，仍无路径的状态需要逐位置重审——
/// 完全落在某个等位内部而从未触碰边界标记的匹配，必须在此补上位点归属。
pub fn handle_allele_encapsulated_states(
    states: Vec<SearchState>,
    idx: &PrgIndex,
) -> Vec<SearchState> {
    let mut out = Vec::with_capacity(states.len());
    for state in states {
        if state.variant_site_path.is_empty() {
            out.extend(handle_allele_encapsulated_state(&state, idx));
        } else {
            out.push(state);
        }
    }
    out
}

/// 以 read 末端 K 碱基的预计算结果为锚点，反向扩展剩余 L-K 个碱基。
/// kmer 不在索引中视为「无比对」，返回空集。
pub fn search_read_backwards(
    read: &[u8],
    kmer: &[u8],
    kmer_index: &KmerIndex,
    idx: &PrgIndex,
) -> Vec<SearchState> {
    let entry = match kmer_index.get(kmer) {
        Some(entry) => entry,
        None => return Vec::new(),
    };
    if entry.states.is_empty() {
        return Vec::new();
    }

    let mut states = entry.states.clone();
    for &base in read[..read.len() - kmer.len()].iter().rev() {
        states = process_read_char_search_states(base, &states, idx);
        if states.is_empty() {
            return states;
        }
    }

    // 纯参考锚点且扩展途中未进入任何位点时，逐位置重审必然无果，直接跳过
    let untouched = states.iter().all(|s| s.variant_site_path.is_empty());
    if entry.nonvariant && read.len() == kmer.len() && untouched {
        return states;
    }
    handle_allele_encapsulated_states(states, idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexMeta, PrgIndex};
    use crate::prg;
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

    fn paths(states: &[SearchState]) -> Vec<Vec<VariantLocus>> {
        let mut out: Vec<Vec<VariantLocus>> = states
            .iter()
            .map(|s| s.variant_site_path.iter().copied().collect())
            .collect();
        out.sort();
        out
    }

    #[test]
    fn read_crossing_second_allele() {
        // read 走 t 分支：位点 5 的等位 2
        let idx = build_index(b"aca5g6t5gcatt");
        let states = search(b"atgca", &idx);
        assert_eq!(states.len(), 1);
        assert_eq!(paths(&states), vec![vec![(5, 2)]]);
        let (lo, hi) = states[0].sa_interval;
        assert_eq!(lo, hi);
        assert_eq!(idx.fm.text_pos(lo), 2);
    }

    #[test]
    fn read_crossing_first_allele() {
        let idx = build_index(b"aca5g6t5gcatt");
        let states = search(b"aggca", &idx);
        assert_eq!(paths(&states), vec![vec![(5, 1)]]);
    }

    #[test]
    fn read_spanning_third_allele() {
        // 三等位位点，read 覆盖第三个等位 aa
        let idx = build_index(b"a5g6t6aa5c");
        let states = search(b"aac", &idx);
        assert_eq!(paths(&states), vec![vec![(5, 3)]]);
    }

    #[test]
    fn read_through_two_sites() {
        let idx = build_index(b"gct5c6g6t5ag7t8c7ta");
        let states = search(b"ctcagtt", &idx);
        assert_eq!(states.len(), 1);
        // 路径前端是文本序更靠左的位点
        assert_eq!(paths(&states), vec![vec![(5, 1), (7, 1)]]);
    }

    #[test]
    fn search_soundness_on_nonvariant_read() {
        // 无变异重叠的 read：vBWT 与忽略标记的朴素反向搜索区间一致
        let idx = build_index(b"aca5g6t5gcatt");
        let pattern = dna::encode_read(b"catt").unwrap();
        let plain = idx.fm.backward_search(&pattern).unwrap();

        let states = vbwt_search_pattern(&pattern, &idx);
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].sa_interval, plain);
        assert!(states[0].variant_site_path.is_empty());
    }

    #[test]
    fn unmatched_read_yields_no_states() {
        let idx = build_index(b"aca5g6t5gcatt");
        let states = search(b"ttttt", &idx);
        assert!(states.is_empty());
    }

    #[test]
    fn encapsulated_read_gets_site_attribution() {
        // read 完全落在等位 1 内部，不触碰任何边界标记
        let idx = build_index(b"gct5cccc6g6t5ag");
        let states = search(b"ccc", &idx);
        assert!(!states.is_empty());
        for state in &states {
            assert_eq!(
                state.variant_site_path.iter().copied().collect::<Vec<_>>(),
                vec![(5, 1)]
            );
        }
    }

    #[test]
    fn encapsulation_totality() {
        // 每个最终状态要么有路径，要么整个区间位点掩码为 0
        let idx = build_index(b"gct5c6g6t5ac7cc8a7tt");
        for read in [&b"ct"[..], b"cc", b"ac", b"tt", b"gc"] {
            let states = search(read, &idx);
            for state in states {
                let (lo, hi) = state.sa_interval;
                if state.variant_site_path.is_empty() {
                    for sa_index in lo..=hi {
                        assert_eq!(idx.site_at(idx.fm.text_pos(sa_index)), 0);
                    }
                }
            }
        }
    }

    #[test]
    fn mid_allele_start_records_allele_on_exit() {
        // read 从等位 2 内部开始，向左越过分隔标记离开位点
        let idx = build_index(b"gct5c6gg6t5aa");
        let states = search(b"ctgg", &idx);
        assert_eq!(paths(&states), vec![vec![(5, 2)]]);
    }
}
