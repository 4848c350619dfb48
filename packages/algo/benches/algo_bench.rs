//! Benchmark suite for dkvmn-algo
//!
//! Run with: cargo bench

use candle_core::Device;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dkvmn_algo::metrics::roc_auc;
use dkvmn_algo::{KtDataset, LearnerRecord, ModelConfig, TrainConfig, Trainer};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn synthetic(samples: usize, n_question: usize, seqlen: usize) -> KtDataset {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let records: Vec<LearnerRecord> = (0..samples)
        .map(|_| LearnerRecord {
            questions: (0..seqlen).map(|_| rng.gen_range(1..=n_question as u32)).collect(),
            answers: (0..seqlen).map(|_| rng.gen_range(0..=1u8)).collect(),
        })
        .collect();
    // records are generated in range
    KtDataset::from_records(&records, n_question, seqlen).unwrap()
}

fn bench_forward(c: &mut Criterion) {
    let model = ModelConfig {
        n_question: 50,
        seqlen: 50,
        ..Default::default()
    };
    let data = synthetic(32, model.n_question, model.seqlen);
    let trainer = Trainer::new(&model, &TrainConfig::default(), &Device::Cpu).unwrap();
    let indices: Vec<usize> = (0..data.len()).collect();
    let batch = data.batch(&indices, &Device::Cpu).unwrap();

    c.bench_function("Dkvmn::forward b32 t50", |b| {
        b.iter(|| trainer.model().forward(black_box(&batch.q), black_box(&batch.qa)).unwrap())
    });
}

fn bench_train_epoch(c: &mut Criterion) {
    let model = ModelConfig {
        n_question: 50,
        seqlen: 20,
        ..Default::default()
    };
    let data = synthetic(64, model.n_question, model.seqlen);
    let mut trainer = Trainer::new(&model, &TrainConfig::default(), &Device::Cpu).unwrap();

    c.bench_function("Trainer::train_epoch 64 samples", |b| {
        b.iter(|| trainer.train_epoch(black_box(&data), 1).unwrap())
    });
}

fn bench_roc_auc(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let preds: Vec<f64> = (0..100_000).map(|_| rng.gen()).collect();
    let targets: Vec<f64> = (0..100_000).map(|_| rng.gen_range(0..=1u8) as f64).collect();

    c.bench_function("roc_auc 100k", |b| {
        b.iter(|| roc_auc(black_box(&preds), black_box(&targets)))
    });
}

criterion_group!(benches, bench_forward, bench_train_epoch, bench_roc_auc);
criterion_main!(benches);
