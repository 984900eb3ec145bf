//! # vbwt-rust
//!
//! 面向人群参考图（PRG）的变异感知 read 比对器。
//!
//! 本 crate 围绕一套共享索引实现了 vBWT 比对流水线：
//!
//! - **索引构建**：把 PRG 文本编码为整数序列，构建后缀数组 + BWT +
//!   变异感知 FM 索引，并派生位点/等位掩码与标记位置表
//! - **kmer 预计算**：枚举所有可能覆盖变异位点的 K 长 kmer，
//!   预存每个 kmer 的反向搜索结果作为比对锚点
//! - **vBWT 搜索**：反向搜索逐碱基扩展，在位点边界处按等位基因分支，
//!   每条一致的图路径得到一个 SearchState
//! - **覆盖统计**：等位组合计数与逐碱基饱和计数，多线程并发累计
//!
//! ## 快速示例
//!
//! ```rust,no_run
//! use vbwt_rust::index::{IndexMeta, PrgIndex};
//! use vbwt_rust::kmer::KmerIndex;
//! use vbwt_rust::search;
//! use vbwt_rust::util::dna;
//!
//! // 构建索引：位点 5 内两个等位 g / t
//! let encoded = vbwt_rust::prg::encode_prg(b"aca5g6t5gcatt").unwrap();
//! let idx = PrgIndex::build(encoded, IndexMeta::default()).unwrap();
//! let kmer_index = KmerIndex::build(5, 150, false, &idx);
//!
//! // 锚定 read 末端 5 碱基后反向扩展
//! let read = dna::encode_read(b"atgca").unwrap();
//! let kmer = read[read.len() - 5..].to_vec();
//! let states = search::search_read_backwards(&read, &kmer, &kmer_index, &idx);
//! println!("matched {} path(s)", states.len());
//! ```
//!
//! ## 模块说明
//!
//! - [`prg`] — PRG 文本解析 / 校验 / 掩码生成
//! - [`index`] — 索引构建（后缀数组、BWT、FM 索引、持久化）
//! - [`kmer`] — kmer 枚举与预计算索引
//! - [`search`] — vBWT 反向搜索引擎
//! - [`coverage`] — 覆盖统计（等位组合 / 逐碱基 / 等位总计）
//! - [`quasimap`] — 比对阶段编排
//! - [`io`] — FASTQ 解析
//! - [`util`] — DNA 编码 / 解码 / 反向互补

pub mod coverage;
pub mod index;
pub mod io;
pub mod kmer;
pub mod prg;
pub mod quasimap;
pub mod search;
pub mod util;
