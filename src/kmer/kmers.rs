//! kmer 枚举：找出所有可能作为「覆盖变异位点的 read」末端锚点的 K 长 kmer。
//!
//! 思路沿用保守的可达窗口：从每个位点的右边界向右延伸 R-1 碱基（落入别的
//! 位点则贯穿到其远端边界），窗口合并后自右向左扫描。锚点左侧 K 距离内有
//! 位点时，把扫过的区域拆成字面段与按序等位列表，用混合进制计数器迭代枚举
//! 全部字面路径（不递归），再取每条路径的所有 K 窗口去重。
//! 每个被穿越位点至少消费一个碱基，因此距离按「每位点一碱基」计数是安全的
//! 过近似。

use std::collections::{BTreeSet, VecDeque};

use rustc_hash::FxHashMap;

use crate::index::PrgIndex;
use crate::prg::Marker;

/// 区域部件：一个字面段（单元素）或一个位点的按序等位列表。
type RegionParts = Vec<Vec<Vec<u8>>>;

/// 每个位点边界标记的两个文本位置 (入口, 出口)。
fn boundary_marker_index_pairs(idx: &PrgIndex) -> Vec<(usize, usize)> {
    let mut first_seen: FxHashMap<u32, usize> = FxHashMap::default();
    let mut pairs = Vec::new();

    for &mp in &idx.prg_marker_positions {
        let mp = mp as usize;
        let symbol = idx.encoded_prg[mp];
        if let Some(Marker::SiteBoundary { site }) = Marker::from_raw(symbol) {
            match first_seen.remove(&site) {
                Some(start) => pairs.push((start, mp)),
                None => {
                    first_seen.insert(site, mp);
                }
            }
        }
    }
    pairs
}

/// 从位点内部（或边界上）的位置向右找所在位点的出口边界。
/// 入参必须位于某个位点范围内，已校验的 PRG 上必然找得到。
fn find_site_end_boundary(within_site_index: usize, idx: &PrgIndex) -> usize {
    let last_prg_index = idx.encoded_prg.len() - 1;
    let start_rank = idx
        .prg_marker_positions
        .partition_point(|&p| (p as usize) < within_site_index);

    for &mp in &idx.prg_marker_positions[start_rank..] {
        let mp = mp as usize;
        let symbol = idx.encoded_prg[mp];
        if !matches!(Marker::from_raw(symbol), Some(Marker::SiteBoundary { .. })) {
            continue;
        }
        if mp == last_prg_index {
            return mp;
        }
        // 入口边界的下一个位置落在等位内，出口边界则否
        if idx.allele_mask[mp + 1] != 0 {
            continue;
        }
        return mp;
    }
    0
}

/// 位点可达窗口的右端：出口边界 + R - 1，落入位点时贯穿到该位点出口。
fn kmer_region_end_index(end_marker_index: usize, max_read_size: usize, idx: &PrgIndex) -> usize {
    let last_prg_index = idx.encoded_prg.len() - 1;
    let mut end_index = (end_marker_index + max_read_size - 1).min(last_prg_index);

    let within_site = idx.allele_mask[end_index] > 0 || idx.encoded_prg[end_index] > 4;
    if within_site {
        end_index = find_site_end_boundary(end_index, idx);
    }
    end_index
}

fn kmer_region_ranges(max_read_size: usize, idx: &PrgIndex) -> Vec<(usize, usize)> {
    boundary_marker_index_pairs(idx)
        .into_iter()
        .map(|(start, end)| (start, kmer_region_end_index(end, max_read_size, idx)))
        .collect()
}

/// 合并有重叠（含相接）的窗口。
fn combine_overlapping_regions(mut ranges: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    ranges.sort_unstable();
    let mut reduced: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());

    for range in ranges {
        match reduced.last_mut() {
            Some(last) if range.0 <= last.1 => {
                last.1 = last.1.max(range.1);
            }
            _ => reduced.push(range),
        }
    }
    reduced
}

/// 从锚点向左收集 kmer 可及的位点出口边界（front 为最左）。
/// 距离按字面碱基数加每个已穿越位点一个碱基保守计数。
fn sites_inrange_left(start_index: usize, kmer_size: usize, idx: &PrgIndex) -> VecDeque<usize> {
    let positions = &idx.prg_marker_positions;
    let mut marker_count = positions.partition_point(|&p| (p as usize) < start_index);

    // rank 不含锚点自身；锚点恰为出口边界时要把它算进扫描
    let at_end_boundary = idx.encoded_prg[start_index] > 4
        && (start_index == idx.encoded_prg.len() - 1 || idx.allele_mask[start_index + 1] == 0)
        && idx.encoded_prg[start_index] % 2 == 1;
    if at_end_boundary {
        marker_count += 1;
    }

    let mut inrange_sites: VecDeque<usize> = VecDeque::new();
    let mut last_marker_index = 0usize;
    let mut handled_sites = 0usize;
    let mut intersite_size = 0usize;

    for &mp in positions[..marker_count].iter().rev() {
        let marker_index = mp as usize;

        if inrange_sites.is_empty() {
            // 第一个标记：锚点与它之间全是字面碱基
            intersite_size = start_index - marker_index;
            if intersite_size + handled_sites + 1 > kmer_size {
                break;
            }
            // 锚点若在位点内部，最近的标记可能是分隔符，归一化到出口边界
            inrange_sites.push_front(find_site_end_boundary(marker_index, idx));
            last_marker_index = marker_index;
            continue;
        }

        let marker = Marker::from_raw(idx.encoded_prg[marker_index])
            .expect("marker position table holds non-marker symbol");
        let last_was_boundary = idx.encoded_prg[last_marker_index] % 2 == 1;

        match marker {
            Marker::AlleleSeparator { .. } => {
                last_marker_index = marker_index;
            }
            Marker::SiteBoundary { .. } if last_was_boundary => {
                // 上一个标记是某位点入口，说明本标记是更左位点的出口：中间是位点间字面段
                intersite_size += last_marker_index - marker_index - 1;
                if intersite_size + handled_sites + 1 > kmer_size {
                    break;
                }
                inrange_sites.push_front(marker_index);
                last_marker_index = marker_index;
            }
            Marker::SiteBoundary { .. } => {
                // 入口边界：又穿越了一个位点
                handled_sites += 1;
                last_marker_index = marker_index;
            }
        }
    }
    inrange_sites
}

/// 取位点的按序等位列表。入参为该位点的出口边界。
fn site_ordered_alleles(end_boundary_index: usize, idx: &PrgIndex) -> Vec<Vec<u8>> {
    let boundary_marker = idx.encoded_prg[end_boundary_index];

    let mut site_alleles: Vec<Vec<u8>> = Vec::new();
    let mut allele: Vec<u8> = Vec::new();

    let mut i = end_boundary_index;
    loop {
        i -= 1;
        let current = idx.encoded_prg[i];
        if current == boundary_marker || (current > 4 && current % 2 == 0) {
            allele.reverse();
            site_alleles.push(std::mem::take(&mut allele));
            if current == boundary_marker {
                break;
            }
            continue;
        }
        allele.push(current as u8);
    }

    site_alleles.reverse();
    site_alleles
}

/// 出口边界右侧直到下一个标记（或文本末尾）的字面段。
fn nonvariant_region_after(end_boundary_index: usize, idx: &PrgIndex) -> Vec<u8> {
    let last_prg_index = idx.encoded_prg.len() - 1;
    if end_boundary_index + 1 > last_prg_index {
        return Vec::new();
    }

    let pos_rank = idx
        .prg_marker_positions
        .partition_point(|&p| (p as usize) <= end_boundary_index);
    let region_end = match idx.prg_marker_positions.get(pos_rank) {
        Some(&next) => next as usize - 1,
        None => last_prg_index,
    };

    (end_boundary_index + 1..=region_end)
        .map(|i| idx.encoded_prg[i] as u8)
        .collect()
}

/// 最左可达位点入口之前的字面段（最多 K+1 碱基，遇标记截断）。
fn pre_site_part(first_site_end_boundary: usize, kmer_size: usize, idx: &PrgIndex) -> Vec<u8> {
    let boundary_marker = idx.encoded_prg[first_site_end_boundary];
    let (site_start, _) = idx.site_text_range(boundary_marker);
    if site_start == 0 {
        return Vec::new();
    }

    let lower = site_start.saturating_sub(kmer_size + 1);
    let mut part: Vec<u8> = Vec::new();
    for i in (lower..site_start).rev() {
        let symbol = idx.encoded_prg[i];
        if symbol > 4 {
            break;
        }
        part.push(symbol as u8);
    }
    part.reverse();
    part
}

/// 最右可达位点出口之后的区域：字面段与后续位点交替，K+1 碱基预算内截止。
fn add_post_site_regions(
    region_parts: &mut RegionParts,
    last_site_end: usize,
    kmer_size: usize,
    idx: &PrgIndex,
) {
    let last_prg_index = idx.encoded_prg.len() - 1;
    if last_site_end == last_prg_index {
        return;
    }

    let mut index = last_site_end + 1;
    let mut consumed = 0usize;
    let mut literal: Vec<u8> = Vec::new();

    while consumed < kmer_size + 1 && index <= last_prg_index {
        let within_site = idx.allele_mask[index] > 0 || idx.encoded_prg[index] > 4;
        if !within_site {
            literal.push(idx.encoded_prg[index] as u8);
            index += 1;
            consumed += 1;
            continue;
        }

        if !literal.is_empty() {
            region_parts.push(vec![std::mem::take(&mut literal)]);
        }

        let site_end = find_site_end_boundary(index, idx);
        region_parts.push(site_ordered_alleles(site_end, idx));

        if site_end == last_prg_index {
            break;
        }
        index = site_end + 1;
        consumed += 1;
    }

    if !literal.is_empty() {
        region_parts.push(vec![literal]);
    }
}

/// 组装锚点处的全部区域部件（从文本左到右排列）。
fn kmer_size_region_parts(
    inrange_sites: &VecDeque<usize>,
    kmer_size: usize,
    idx: &PrgIndex,
) -> RegionParts {
    let mut region_parts: RegionParts = Vec::new();

    let first_site_end = *inrange_sites.front().expect("inrange sites is non-empty");
    let pre = pre_site_part(first_site_end, kmer_size, idx);
    if !pre.is_empty() {
        region_parts.push(vec![pre]);
    }

    for (count, &end_boundary) in inrange_sites.iter().enumerate() {
        region_parts.push(site_ordered_alleles(end_boundary, idx));

        let at_last_site = count == inrange_sites.len() - 1;
        if !at_last_site {
            let nonvariant = nonvariant_region_after(end_boundary, idx);
            region_parts.push(vec![nonvariant]);
        }
    }

    let last_site_end = *inrange_sites.back().expect("inrange sites is non-empty");
    add_post_site_regions(&mut region_parts, last_site_end, kmer_size, idx);
    region_parts
}

/// 推进混合进制计数器（每位基数 = 对应部件的等位数）。没有下一条路径时返回 false。
fn update_allele_index_path(path: &mut [usize], counts: &[usize]) -> bool {
    for i in (0..path.len()).rev() {
        if path[i] + 1 < counts[i] {
            path[i] += 1;
            for slot in path[i + 1..].iter_mut() {
                *slot = 0;
            }
            return true;
        }
    }
    false
}

/// 取一条字面路径的全部 K 窗口，按「从后向前」存入集合。
fn path_reverse_kmers(path: &[u8], kmer_size: usize, out: &mut BTreeSet<Vec<u8>>) {
    if path.len() < kmer_size {
        return;
    }
    for i in (kmer_size - 1..path.len()).rev() {
        let reverse_kmer: Vec<u8> = path[i + 1 - kmer_size..=i].iter().rev().copied().collect();
        out.insert(reverse_kmer);
    }
}

/// 迭代枚举区域部件的全部等位组合并收集每条路径的 K 窗口。
fn region_parts_reverse_kmers(
    region_parts: &RegionParts,
    kmer_size: usize,
    out: &mut BTreeSet<Vec<u8>>,
) {
    let counts: Vec<usize> = region_parts.iter().map(Vec::len).collect();
    let expected: u64 = counts
        .iter()
        .fold(1u64, |acc, &c| acc.saturating_mul(c as u64));
    let mut allele_index_path = vec![0usize; region_parts.len()];

    let mut count_paths: u64 = 0;
    loop {
        if count_paths > 0 && count_paths % 1_000_000 == 0 {
            log::info!("processed paths: {} / {}", count_paths, expected);
        }

        let mut path: Vec<u8> = Vec::new();
        for (part, &choice) in region_parts.iter().zip(&allele_index_path) {
            path.extend_from_slice(&part[choice]);
        }
        path_reverse_kmers(&path, kmer_size, out);
        count_paths += 1;

        if !update_allele_index_path(&mut allele_index_path, &counts) {
            break;
        }
    }
}

/// 处理一个带可达位点的锚点；返回扫描跳转目标（最左位点入口的左邻）。
fn sites_reverse_kmers(
    inrange_sites: &VecDeque<usize>,
    kmer_size: usize,
    idx: &PrgIndex,
    out: &mut BTreeSet<Vec<u8>>,
) -> usize {
    let region_parts = kmer_size_region_parts(inrange_sites, kmer_size, idx);
    region_parts_reverse_kmers(&region_parts, kmer_size, out);

    let first_site_end = *inrange_sites.front().expect("inrange sites is non-empty");
    let boundary_marker = idx.encoded_prg[first_site_end];
    let (site_start, _) = idx.site_text_range(boundary_marker);
    site_start.saturating_sub(1)
}

/// 纯参考锚点：以 current 为右端截取一个 K 窗口。放不下时返回 None。
fn extract_simple_reverse_kmer(
    kmer_end_index: usize,
    kmer_size: usize,
    idx: &PrgIndex,
) -> Option<Vec<u8>> {
    let kmer_start_index = (kmer_end_index + 1).checked_sub(kmer_size)?;
    Some(
        (kmer_start_index..=kmer_end_index)
            .rev()
            .map(|i| idx.encoded_prg[i] as u8)
            .collect(),
    )
}

/// 自右向左扫描一个合并后的窗口，收集全部反向 kmer。
fn region_range_reverse_kmers(
    range: (usize, usize),
    kmer_size: usize,
    idx: &PrgIndex,
    out: &mut BTreeSet<Vec<u8>>,
) {
    let (region_start, region_end) = range;
    let mut current = region_end;

    loop {
        if current < region_start || current + 1 < kmer_size {
            break;
        }

        let inrange_sites = sites_inrange_left(current, kmer_size, idx);
        if !inrange_sites.is_empty() {
            let jump = sites_reverse_kmers(&inrange_sites, kmer_size, idx, out);
            if jump == 0 {
                break;
            }
            current = jump;
        } else {
            let within_site = idx.allele_mask[current] > 0 || idx.encoded_prg[current] > 4;
            if !within_site {
                match extract_simple_reverse_kmer(current, kmer_size, idx) {
                    Some(reverse_kmer) => {
                        out.insert(reverse_kmer);
                    }
                    None => break,
                }
            }
        }

        if current == 0 {
            break;
        }
        current -= 1;
    }
}

/// 基于 PRG 结构的反向 kmer 全集。
fn prg_reverse_kmers(kmer_size: usize, max_read_size: usize, idx: &PrgIndex) -> BTreeSet<Vec<u8>> {
    let ranges = combine_overlapping_regions(kmer_region_ranges(max_read_size, idx));

    let mut all_reverse_kmers = BTreeSet::new();
    for range in ranges {
        region_range_reverse_kmers(range, kmer_size, idx, &mut all_reverse_kmers);
    }
    all_reverse_kmers
}

/// 退化模式：{1,2,3,4}^K 全量枚举（字典序递增）。
fn generate_all_reverse_kmers(kmer_size: usize) -> BTreeSet<Vec<u8>> {
    let mut all = BTreeSet::new();
    let mut current = vec![1u8; kmer_size];

    loop {
        all.insert(current.clone());

        // 自右向左找首个可进位的位置
        let mut i = kmer_size;
        while i > 0 && current[i - 1] == 4 {
            i -= 1;
        }
        if i == 0 {
            break;
        }
        current[i - 1] += 1;
        for slot in current[i..].iter_mut() {
            *slot = 1;
        }
    }
    all
}

/// 待索引 kmer 全集，按反转字典序排列（相邻 kmer 共享后缀最大化）。
pub fn get_all_kmers(
    kmer_size: usize,
    max_read_size: usize,
    all_kmers: bool,
    idx: &PrgIndex,
) -> Vec<Vec<u8>> {
    let ordered_reverse_kmers = if all_kmers {
        generate_all_reverse_kmers(kmer_size)
    } else {
        prg_reverse_kmers(kmer_size, max_read_size, idx)
    };

    ordered_reverse_kmers
        .into_iter()
        .map(|mut reverse_kmer| {
            reverse_kmer.reverse();
            reverse_kmer
        })
        .collect()
}

/// 前缀差分：保留到与前驱最右不同碱基为止的前缀，共享后缀省略。
pub fn prefix_diffs(kmers: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let mut diffs: Vec<Vec<u8>> = Vec::with_capacity(kmers.len());
    let mut last_full: Option<&Vec<u8>> = None;

    for kmer in kmers {
        match last_full {
            None => diffs.push(kmer.clone()),
            Some(prev) => {
                let mut cut = 0usize;
                for i in (0..kmer.len()).rev() {
                    if kmer[i] != prev[i] {
                        cut = i + 1;
                        break;
                    }
                }
                diffs.push(kmer[..cut].to_vec());
            }
        }
        last_full = Some(kmer);
    }
    diffs
}

/// 从前驱完整 kmer 与差分重建完整 kmer。
pub fn reconstruct_from_diff(prev_full: &[u8], diff: &[u8]) -> Vec<u8> {
    let mut full = diff.to_vec();
    full.extend_from_slice(&prev_full[diff.len()..]);
    full
}
