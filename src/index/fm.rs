use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// SA 闭区间 [lo, hi]。区间失效的判据是 lo - 1 == hi（反向扩展无命中）。
pub type SaInterval = (usize, usize);

/// 变异感知 FM 索引：
/// - 字母表为整数（0:$，1..4 碱基，>=5 变异标记），C 表按字母值稠密存储。
/// - 碱基 Occ 采用定长分块采样（块内顺扫补偿），与反向搜索逐碱基扩展配套。
/// - 标记出现次数极少，按值存排序好的 BWT 位置表，rank/select 退化为二分查找。
/// - 保存完整 SA（MVP），方便从区间获得文本位置；后续可换稀疏采样。
#[derive(Debug, Serialize, Deserialize)]
pub struct FmIndex {
    pub max_alphabet: u32,
    pub block: u32,
    /// C[s] = 文本中字母值 < s 的累计数量，长度 max_alphabet + 2
    pub c: Vec<u64>,
    /// BWT 序列（与 SA 同长度）
    pub bwt: Vec<u32>,
    /// 碱基 Occ 采样（按块存储，行优先展平）：occ_samples[block_id * 4 + (base-1)]
    occ_samples: Vec<u64>,
    /// 完整 SA
    pub sa: Vec<u32>,
    /// BWT 中全部标记位置（升序），相当于带 rank/select 的稀疏位向量
    bwt_marker_positions: Vec<u32>,
    /// 按标记值分组的 BWT 位置表（升序），提供按值的 rank 查询
    marker_bwt_occ: FxHashMap<u32, Vec<u32>>,
}

impl FmIndex {
    pub fn build(bwt: Vec<u32>, sa: Vec<u32>, max_alphabet: u32, block: usize) -> Self {
        let n = bwt.len();
        let alphabet_len = max_alphabet as usize + 2;

        // 计算 C 表
        let mut freq = vec![0u64; alphabet_len];
        for &ch in &bwt {
            freq[ch as usize] += 1;
        }
        let mut c = vec![0u64; alphabet_len];
        let mut acc = 0u64;
        for (slot, count) in c.iter_mut().zip(freq) {
            *slot = acc;
            acc += count;
        }

        // 采样碱基 Occ
        let num_blocks = if n == 0 { 0 } else { (n + block - 1) / block };
        let mut occ_samples = vec![0u64; num_blocks * 4];
        let mut running = [0u64; 4];
        for bi in 0..num_blocks {
            occ_samples[bi * 4..bi * 4 + 4].copy_from_slice(&running);
            let start = bi * block;
            let end = ((bi + 1) * block).min(n);
            for &ch in &bwt[start..end] {
                if (1..=4).contains(&ch) {
                    running[ch as usize - 1] += 1;
                }
            }
        }

        // 标记位置表
        let mut bwt_marker_positions = Vec::new();
        let mut marker_bwt_occ: FxHashMap<u32, Vec<u32>> = FxHashMap::default();
        for (i, &ch) in bwt.iter().enumerate() {
            if ch > 4 {
                bwt_marker_positions.push(i as u32);
                marker_bwt_occ.entry(ch).or_default().push(i as u32);
            }
        }

        Self {
            max_alphabet,
            block: block as u32,
            c,
            bwt,
            occ_samples,
            sa,
            bwt_marker_positions,
            marker_bwt_occ,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bwt.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bwt.is_empty()
    }

    /// 整个 SA 的区间（反向搜索的初始状态）。
    #[inline]
    pub fn full_interval(&self) -> SaInterval {
        (0, self.len() - 1)
    }

    /// SA 下标到文本位置。
    #[inline]
    pub fn text_pos(&self, sa_index: usize) -> usize {
        self.sa[sa_index] as usize
    }

    /// 返回 BWT[0..pos) 中碱基 base 的出现次数。
    #[inline]
    pub fn occ_dna(&self, base: u8, pos: usize) -> u64 {
        if pos == 0 {
            return 0;
        }
        let block = self.block as usize;
        let bi = (pos - 1) / block;
        let base_slot = base as usize - 1;
        let mut count = self.occ_samples[bi * 4 + base_slot];
        for &ch in &self.bwt[bi * block..pos] {
            if ch == u32::from(base) {
                count += 1;
            }
        }
        count
    }

    /// 用碱基 base 反向扩展区间一步；区间失效时返回 None。
    pub fn extend_with_base(&self, base: u8, interval: SaInterval) -> Option<SaInterval> {
        let (lo, hi) = interval;
        let first = self.c[base as usize];
        let new_lo = first + self.occ_dna(base, lo);
        let new_hi = first + self.occ_dna(base, hi + 1);
        if new_lo == new_hi {
            return None;
        }
        Some((new_lo as usize, new_hi as usize - 1))
    }

    /// 朴素反向搜索（忽略变异标记），pat 为编码后的碱基序列。
    pub fn backward_search(&self, pat: &[u8]) -> Option<SaInterval> {
        if self.is_empty() {
            return None;
        }
        let mut interval = self.full_interval();
        for &base in pat.iter().rev() {
            interval = self.extend_with_base(base, interval)?;
        }
        Some(interval)
    }

    /// 标记值 m 在 BWT[0..pos) 中的出现次数。
    pub fn marker_rank(&self, marker: u32, pos: usize) -> usize {
        match self.marker_bwt_occ.get(&marker) {
            Some(positions) => positions.partition_point(|&p| (p as usize) < pos),
            None => 0,
        }
    }

    /// 收集闭区间 [lo, hi] 内 BWT 为标记的全部位置：(SA 下标, 标记值)。
    /// 二分定位避免顺扫整个区间。
    pub fn markers_in_interval(&self, interval: SaInterval) -> Vec<(usize, u32)> {
        let (lo, hi) = interval;
        let start = self
            .bwt_marker_positions
            .partition_point(|&p| (p as usize) < lo);
        let mut found = Vec::new();
        for &p in &self.bwt_marker_positions[start..] {
            let p = p as usize;
            if p > hi {
                break;
            }
            found.push((p, self.bwt[p]));
        }
        found
    }

    /// 等位基因分隔标记（site+1）的完整 SA 区间。
    /// 稠密 C 表使区间上界对最后一个位点同样成立。
    pub fn allele_marker_interval(&self, site: u32) -> SaInterval {
        let separator = site as usize + 1;
        let start = self.c[separator] as usize;
        let end = self.c[separator + 1] as usize - 1;
        (start, end)
    }

    /// 标记值 m 在 SA 中的第一个下标（C 表直查）。
    #[inline]
    pub fn marker_first_sa_index(&self, marker: u32) -> usize {
        self.c[marker as usize] as usize
    }
}
