use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use knowledge_rag::config::RankingConfig;
use knowledge_rag::rag::{RankOptions, SearchHit, SearchResultRanker, SourceMetadata};

fn hits(count: usize) -> Vec<SearchHit> {
    let now = Utc::now();
    (0..count)
        .map(|i| SearchHit {
            fragment_id: format!("frag-{}", i),
            document_id: format!("doc-{}", i % 17),
            // every fifth fragment repeats content to exercise de-duplication
            content: format!(
                "Section {} of the employee handbook describes the refund policy, travel expenses and \
                 reimbursement limits for purchases made on behalf of the company.",
                if i % 5 == 0 { 0 } else { i }
            ),
            score: 1.0 - (i as f32 / count as f32) * 0.5,
            metadata: SourceMetadata {
                document_name: format!("handbook-{}.pdf", i % 17),
                position: i as u32,
                owner_id: "bench".to_string(),
                mime_type: Some("application/pdf".to_string()),
                file_size: Some(64 * 1024),
                document_created_at: Some(now - Duration::days(i as i64)),
            },
        })
        .collect()
}

fn bench_rank(c: &mut Criterion) {
    let ranker = SearchResultRanker::new(RankingConfig::default(), 200);
    let options = RankOptions {
        score_threshold: 0.5,
        limit: 10,
    };

    let mut group = c.benchmark_group("rank");
    for size in [10, 100, 1000] {
        let input = hits(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| ranker.rank(black_box(input.clone()), black_box("refund policy for purchases"), options))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_rank);
criterion_main!(benches);
