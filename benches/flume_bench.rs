// SPDX-License-Identifier: Apache-2.0

use criterion::Criterion;
use criterion::Throughput;
use criterion::{criterion_group, criterion_main};
use logtailer::bounded_channel::bounded;
use logtailer::tailers::file::{Message, Origin};

fn message(size: usize) -> Message {
    Message::new(
        vec![b'x'; size],
        Origin {
            identifier: "file:/var/log/app.log".to_string(),
            offset: size as i64,
            source: None,
        },
        vec!["filename:app.log".to_string()],
        false,
    )
}

fn output_channel_throughput(c: &mut Criterion) {
    let input = [
        ("small", message(64)),
        ("medium", message(1024)),
        ("large", message(64 * 1024)),
    ];

    let mut group = c.benchmark_group("output_channel_throughput");
    for (name, msg) in input.iter() {
        group.throughput(Throughput::Bytes(msg.content().len() as u64));
        group.bench_with_input(format!("output_channel {}", name), msg, |b, msg| {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (tx, mut rx) = bounded::<Message>(100);
            rt.spawn(async move { while rx.next().await.is_some() {} });
            b.to_async(&rt)
                .iter(|| tx.send(criterion::black_box(msg.clone())));
        });
    }
    group.finish();
}

criterion_group!(benches, output_channel_throughput);
criterion_main!(benches);
