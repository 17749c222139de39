use criterion::{Criterion, black_box, criterion_group, criterion_main};
use seqtag_core::metrics::{evaluate, get_entities};

fn corpus(sentences: usize) -> (Vec<Vec<String>>, Vec<Vec<String>>) {
    let gold_pattern = ["B-PER", "I-PER", "O", "O", "B-LOC", "O", "B-ORG", "I-ORG", "I-ORG", "O"];
    let pred_pattern = ["B-PER", "I-PER", "O", "B-LOC", "I-LOC", "O", "B-ORG", "I-ORG", "O", "O"];

    let expand = |pattern: &[&str]| -> Vec<Vec<String>> {
        (0..sentences)
            .map(|i| {
                pattern
                    .iter()
                    .cycle()
                    .skip(i % pattern.len())
                    .take(30)
                    .map(|tag| tag.to_string())
                    .collect()
            })
            .collect()
    };

    (expand(&gold_pattern), expand(&pred_pattern))
}

fn bench_metrics(c: &mut Criterion) {
    let (gold, pred) = corpus(1000);

    c.bench_function("get_entities_single", |b| {
        b.iter(|| get_entities(black_box(&gold[0])));
    });

    c.bench_function("evaluate_1000_sentences", |b| {
        b.iter(|| evaluate(black_box(&gold), black_box(&pred)).unwrap());
    });
}

criterion_group!(benches, bench_metrics);
criterion_main!(benches);
