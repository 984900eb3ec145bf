//! 比对阶段编排：加载索引与 kmer 索引，校验运行参数，
//! rayon 工作池逐 read 搜索并累计覆盖，结束时一次性落盘。

use anyhow::{bail, Result};
use rayon::prelude::*;
use std::path::Path;

use crate::coverage::{counter_cap, Coverage};
use crate::index::{PrgIndex, KMER_INDEX_FILE};
use crate::io::fastq;
use crate::kmer::KmerIndex;
use crate::search::search_read_backwards;
use crate::util::dna;

#[derive(Debug, Clone)]
pub struct MapOpt {
    pub threads: usize,
    pub counter_width: u32,
}

impl Default for MapOpt {
    fn default() -> Self {
        Self {
            threads: 1,
            counter_width: 16,
        }
    }
}

#[derive(Debug, Default)]
pub struct MapReport {
    pub reads_processed: u64,
    pub reads_mapped: u64,
}

/// 单个 read 的比对与覆盖记录。正向无果时尝试反向互补。
/// 含非 ACGT 碱基或 kmer 未被索引的 read 计为未比对，不报错。
fn map_read(
    raw_read: &[u8],
    kmer_index: &KmerIndex,
    idx: &PrgIndex,
    coverage: &Coverage,
) -> bool {
    let Some(encoded) = dna::encode_read(raw_read) else {
        return false;
    };
    let kmer_size = kmer_index.kmer_size;

    let mut states = search_read_backwards(
        &encoded,
        &encoded[encoded.len() - kmer_size..],
        kmer_index,
        idx,
    );
    if states.is_empty() {
        let revcomp = dna::revcomp_encoded(&encoded);
        states = search_read_backwards(
            &revcomp,
            &revcomp[revcomp.len() - kmer_size..],
            kmer_index,
            idx,
        );
    }

    if states.is_empty() {
        return false;
    }
    coverage.record(&states, encoded.len(), idx);
    true
}

/// 加载产物、前置校验、并行比对全部 read，返回统计并写出覆盖 JSON。
pub fn run_quasimap(
    index_dir: &str,
    reads_path: &str,
    out_path: Option<&str>,
    opt: &MapOpt,
) -> Result<MapReport> {
    let idx = PrgIndex::load_from_dir(index_dir)?;
    let kmer_index_path = Path::new(index_dir).join(KMER_INDEX_FILE);
    let kmer_index = KmerIndex::load_from_file(kmer_index_path.to_str().unwrap())?;
    log::info!(
        "index loaded: prg {} symbols, {} sites, {} kmers (K={})",
        idx.encoded_prg.len(),
        idx.number_of_sites(),
        kmer_index.len(),
        kmer_index.kmer_size
    );

    // 配置校验：kmer 索引必须与构建元数据一致
    if idx.meta.kmer_size != 0 && idx.meta.kmer_size as usize != kmer_index.kmer_size {
        bail!(
            "kmer index length {} does not match build metadata ({})",
            kmer_index.kmer_size,
            idx.meta.kmer_size
        );
    }

    let reads = fastq::read_all_sequences(reads_path)?;

    // 短于 K 的 read 属于配置错误，处理任何 read 之前整体拒绝
    if let Some(short) = reads.iter().position(|r| r.len() < kmer_index.kmer_size) {
        bail!(
            "read {} is shorter ({}) than kmer size {}",
            short,
            reads[short].len(),
            kmer_index.kmer_size
        );
    }

    let coverage = Coverage::generate(&idx, counter_cap(opt.counter_width));

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opt.threads)
        .build()?;
    let reads_mapped: u64 = pool.install(|| {
        reads
            .par_iter()
            .map(|read| u64::from(map_read(read, &kmer_index, &idx, &coverage)))
            .sum()
    });

    if let Some(path) = out_path {
        coverage.dump_to_file(path)?;
    } else {
        println!("{}", coverage.dump_json());
    }

    Ok(MapReport {
        reads_processed: reads.len() as u64,
        reads_mapped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexMeta, PrgIndex};
    use crate::prg;

    fn build_artifacts(raw_prg: &[u8], kmer_size: usize) -> (PrgIndex, KmerIndex) {
        let encoded = prg::encode_prg(raw_prg).unwrap();
        let idx = PrgIndex::build(encoded, IndexMeta::default()).unwrap();
        let kmer_index = KmerIndex::build(kmer_size, 20, false, &idx);
        (idx, kmer_index)
    }

    #[test]
    fn map_read_records_coverage() {
        let (idx, kmer_index) = build_artifacts(b"aca5g6t5gcatt", 5);
        let coverage = Coverage::generate(&idx, u32::MAX);

        assert!(map_read(b"atgca", &kmer_index, &idx, &coverage));
        assert_eq!(coverage.grouped.snapshot()[0], vec![(vec![1], 1)]);
    }

    #[test]
    fn reverse_complement_fallback() {
        let (idx, kmer_index) = build_artifacts(b"aca5g6t5gcatt", 5);
        let coverage = Coverage::generate(&idx, u32::MAX);

        // "aggca" 的反向互补，正向无法匹配
        assert!(map_read(b"tgcct", &kmer_index, &idx, &coverage));
        assert_eq!(coverage.grouped.snapshot()[0], vec![(vec![0], 1)]);
    }

    #[test]
    fn ambiguous_read_is_unmapped() {
        let (idx, kmer_index) = build_artifacts(b"aca5g6t5gcatt", 5);
        let coverage = Coverage::generate(&idx, u32::MAX);
        assert!(!map_read(b"atgcn", &kmer_index, &idx, &coverage));
    }
}
