//! kmer 预计算索引：kmer 值 -> 反向搜索结果（SA 区间 + 已隐含的位点路径）。
//!
//! 持久化为逐行文本，字段以 '|' 分隔：
//! `kmer|非变异标志|扁平区间|保留|每区间一个路径组|`
//! 路径组内每个位点记作 `标记 等位... @`。行按反转字典序排列，首行之后的
//! kmer 字段只存与前驱最右差异碱基为止的前缀，读取时拼接还原。

use anyhow::{anyhow, bail, Context, Result};
use rustc_hash::FxHashMap;
use std::io::{BufRead, Write};

use crate::index::PrgIndex;
use crate::kmer::kmers;
use crate::search::{vbwt_search_pattern, SearchState, VariantSitePath};

#[derive(Debug, Clone)]
pub struct KmerEntry {
    /// kmer 完全不与任何变异位点重叠
    pub nonvariant: bool,
    pub states: Vec<SearchState>,
}

#[derive(Debug)]
pub struct KmerIndex {
    pub kmer_size: usize,
    map: FxHashMap<Vec<u8>, KmerEntry>,
}

impl KmerIndex {
    /// 枚举并逐个反向搜索全部待索引 kmer。
    pub fn build(
        kmer_size: usize,
        max_read_size: usize,
        all_kmers: bool,
        idx: &PrgIndex,
    ) -> Self {
        let kmers = kmers::get_all_kmers(kmer_size, max_read_size, all_kmers, idx);
        log::info!("indexing {} kmers", kmers.len());

        let mut map = FxHashMap::default();
        for (count, kmer) in kmers.into_iter().enumerate() {
            if count > 0 && count % 100_000 == 0 {
                log::info!("indexed kmers: {}", count);
            }
            let states = vbwt_search_pattern(&kmer, idx);
            let nonvariant = is_nonvariant(&states, idx);
            map.insert(kmer, KmerEntry { nonvariant, states });
        }
        Self { kmer_size, map }
    }

    #[inline]
    pub fn get(&self, kmer: &[u8]) -> Option<&KmerEntry> {
        self.map.get(kmer)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    // ── 持久化 ───────────────────────────────────────

    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let f = std::fs::File::create(path)
            .map_err(|e| anyhow!("cannot write kmer index '{}': {}", path, e))?;
        let mut out = std::io::BufWriter::new(f);

        // 反转字典序 + 前缀差分，最大化相邻行的共享后缀
        let mut ordered: Vec<&Vec<u8>> = self.map.keys().collect();
        ordered.sort_by(|a, b| a.iter().rev().cmp(b.iter().rev()));

        let full_kmers: Vec<Vec<u8>> = ordered.iter().map(|k| (*k).clone()).collect();
        let diffs = kmers::prefix_diffs(&full_kmers);

        for (kmer, diff) in ordered.iter().zip(&diffs) {
            let entry = &self.map[*kmer];
            writeln!(out, "{}", dump_kmer_index_entry(diff, entry))?;
        }
        Ok(())
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        let f = std::fs::File::open(path)
            .map_err(|e| anyhow!("cannot open kmer index '{}': {}", path, e))?;
        let reader = std::io::BufReader::new(f);

        let mut map: FxHashMap<Vec<u8>, KmerEntry> = FxHashMap::default();
        let mut kmer_size = 0usize;
        let mut prev_full: Option<Vec<u8>> = None;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let (diff, entry) = parse_kmer_index_entry(&line)
                .with_context(|| format!("kmer index '{}' line {}", path, line_no + 1))?;

            let full = match prev_full {
                None => diff,
                Some(ref prev) => kmers::reconstruct_from_diff(prev, &diff),
            };
            if kmer_size == 0 {
                kmer_size = full.len();
            } else if full.len() != kmer_size {
                bail!("kmer index '{}' line {}: inconsistent kmer length", path, line_no + 1);
            }
            prev_full = Some(full.clone());
            map.insert(full, entry);
        }

        if map.is_empty() {
            bail!("kmer index '{}' holds no entries", path);
        }
        Ok(Self { kmer_size, map })
    }
}

/// kmer 的全部最终状态都没有路径、区间内也没有任何位置落在位点内。
fn is_nonvariant(states: &[SearchState], idx: &PrgIndex) -> bool {
    states.iter().all(|state| {
        if !state.variant_site_path.is_empty() {
            return false;
        }
        let (lo, hi) = state.sa_interval;
        (lo..=hi).all(|sa_index| idx.site_at(idx.fm.text_pos(sa_index)) == 0)
    })
}

fn join_ints<T: std::fmt::Display>(values: impl Iterator<Item = T>) -> String {
    values
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn dump_path(path: &VariantSitePath) -> String {
    let mut out = String::new();
    for &(site, allele) in path {
        out.push_str(&format!("{} {} @", site, allele));
    }
    out
}

fn dump_kmer_index_entry(kmer_field: &[u8], entry: &KmerEntry) -> String {
    let mut fields: Vec<String> = Vec::with_capacity(entry.states.len() + 5);
    fields.push(join_ints(kmer_field.iter()));
    fields.push(if entry.nonvariant { "1" } else { "0" }.to_string());

    let intervals = entry
        .states
        .iter()
        .flat_map(|s| [s.sa_interval.0, s.sa_interval.1])
        .collect::<Vec<_>>();
    fields.push(join_ints(intervals.into_iter()));

    // 保留字段
    fields.push(String::new());

    for state in &entry.states {
        fields.push(dump_path(&state.variant_site_path));
    }
    fields.push(String::new());
    fields.join("|")
}

fn parse_ints(field: &str) -> Result<Vec<u64>> {
    field
        .split_whitespace()
        .map(|tok| tok.parse::<u64>().map_err(|e| anyhow!("bad integer '{}': {}", tok, e)))
        .collect()
}

/// 解析一个路径组：`标记 等位... @` 的重复。
/// 一个位点带多个等位（历史行格式）按笛卡尔积展开成多个状态路径。
fn parse_path_group(group: &str) -> Result<Vec<VariantSitePath>> {
    let mut sites: Vec<(u32, Vec<u32>)> = Vec::new();
    for chunk in group.split('@') {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            continue;
        }
        let ints = parse_ints(chunk)?;
        if ints.len() < 2 {
            bail!("path group chunk '{}' lacks allele ids", chunk);
        }
        sites.push((ints[0] as u32, ints[1..].iter().map(|&v| v as u32).collect()));
    }

    if sites.is_empty() {
        return Ok(vec![VariantSitePath::new()]);
    }

    let counts: Vec<usize> = sites.iter().map(|(_, alleles)| alleles.len()).collect();
    let mut choice = vec![0usize; sites.len()];
    let mut paths = Vec::new();
    loop {
        let path: VariantSitePath = sites
            .iter()
            .zip(&choice)
            .map(|(&(site, ref alleles), &c)| (site, alleles[c]))
            .collect();
        paths.push(path);

        let mut i = sites.len();
        while i > 0 && choice[i - 1] + 1 == counts[i - 1] {
            choice[i - 1] = 0;
            i -= 1;
        }
        if i == 0 {
            break;
        }
        choice[i - 1] += 1;
    }
    Ok(paths)
}

fn parse_kmer_index_entry(line: &str) -> Result<(Vec<u8>, KmerEntry)> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() < 4 {
        bail!("row has {} fields, expected at least 4", fields.len());
    }

    let kmer: Vec<u8> = parse_ints(fields[0])?.iter().map(|&v| v as u8).collect();
    let nonvariant = match fields[1].trim() {
        "1" => true,
        "0" | "" => false,
        other => bail!("bad nonvariant flag '{}'", other),
    };

    let flat = parse_ints(fields[2])?;
    if flat.len() % 2 != 0 {
        bail!("odd number of interval bounds");
    }
    let intervals: Vec<(usize, usize)> = flat
        .chunks(2)
        .map(|pair| (pair[0] as usize, pair[1] as usize))
        .collect();

    let mut states = Vec::with_capacity(intervals.len());
    for (i, &interval) in intervals.iter().enumerate() {
        let group = fields.get(4 + i).copied().unwrap_or("");
        for path in parse_path_group(group)? {
            states.push(SearchState {
                sa_interval: interval,
                variant_site_path: path,
                // 序列化不保留位点内外状态；空置为 Outside，配合非空路径不会重复记录
                variant_site_state: crate::search::VariantSiteState::Outside,
            });
        }
    }

    Ok((kmer, KmerEntry { nonvariant, states }))
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

    #[test]
    fn dump_row_format() {
        let entry = KmerEntry {
            nonvariant: false,
            states: vec![SearchState {
                sa_interval: (123, 456),
                variant_site_path: VariantSitePath::from([(5, 9), (7, 19)]),
                variant_site_state: crate::search::VariantSiteState::Outside,
            }],
        };
        let row = dump_kmer_index_entry(&[1, 2, 3, 4], &entry);
        assert_eq!(row, "1 2 3 4|0|123 456||5 9 @7 19 @|");
    }

    #[test]
    fn parse_row_roundtrip() {
        let (kmer, entry) = parse_kmer_index_entry("1 2 3 4|0|123 456||5 9 @7 19 @|").unwrap();
        assert_eq!(kmer, vec![1, 2, 3, 4]);
        assert!(!entry.nonvariant);
        assert_eq!(entry.states.len(), 1);
        assert_eq!(entry.states[0].sa_interval, (123, 456));
        assert_eq!(
            entry.states[0].variant_site_path,
            VariantSitePath::from([(5, 9), (7, 19)])
        );
    }

    #[test]
    fn parse_legacy_multi_allele_group() {
        let (_, entry) =
            parse_kmer_index_entry("1 2 3 4|1|123 456||5 9 8 7 @7 19 18 17 @|").unwrap();
        assert!(entry.nonvariant);
        // 两个位点各三个候选等位，笛卡尔积展开
        assert_eq!(entry.states.len(), 9);
        assert!(entry
            .states
            .iter()
            .any(|s| s.variant_site_path == VariantSitePath::from([(5, 8), (7, 17)])));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_kmer_index_entry("1 2|x|1 2||").is_err());
        assert!(parse_kmer_index_entry("1 2|0|1||").is_err());
        assert!(parse_kmer_index_entry("only one field").is_err());
    }

    #[test]
    fn build_and_lookup() {
        let idx = build_index(b"aca5g6t5gcatt");
        let kmer_index = KmerIndex::build(5, 10, false, &idx);

        let atgca = dna::encode_read(b"atgca").unwrap();
        let entry = kmer_index.get(&atgca).expect("kmer indexed");
        assert!(!entry.nonvariant);
        assert!(!entry.states.is_empty());

        // 纯参考 kmer 打上非变异标志
        let gcatt = dna::encode_read(b"gcatt").unwrap();
        if let Some(entry) = kmer_index.get(&gcatt) {
            assert!(entry.nonvariant);
        }
    }

    #[test]
    fn file_roundtrip_preserves_entries() {
        let idx = build_index(b"aca5g6t5gcatt");
        let kmer_index = KmerIndex::build(5, 10, false, &idx);

        let path = std::env::temp_dir().join("vbwt_rust_kmer_index_roundtrip.txt");
        let path_str = path.to_str().unwrap();
        kmer_index.save_to_file(path_str).unwrap();

        let loaded = KmerIndex::load_from_file(path_str).unwrap();
        assert_eq!(loaded.kmer_size, 5);
        assert_eq!(loaded.len(), kmer_index.len());

        let atgca = dna::encode_read(b"atgca").unwrap();
        let before = kmer_index.get(&atgca).unwrap();
        let after = loaded.get(&atgca).unwrap();
        assert_eq!(before.nonvariant, after.nonvariant);
        assert_eq!(before.states.len(), after.states.len());
        for (b, a) in before.states.iter().zip(&after.states) {
            assert_eq!(b.sa_interval, a.sa_interval);
            assert_eq!(b.variant_site_path, a.variant_site_path);
        }

        std::fs::remove_file(path).ok();
    }
}
