use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use spindle_io::channel::{ChannelContext, ChannelRef, SocketChannel, WriteOperation};
use spindle_io::error::Result;
use spindle_io::key::SelectionKey;
use spindle_io::queue::SubmissionQueue;
use spindle_io::selector::SelectorRef;
use spindle_io::Ops;
use std::sync::Arc;
use std::thread;

/// Channel stub with no OS state, so the benches measure queue and dispatch
/// overhead rather than socket syscalls.
struct BenchChannel {
    key: SelectionKey,
    context: ChannelContext,
}

impl BenchChannel {
    fn new() -> ChannelRef {
        Arc::new(Self {
            key: SelectionKey::new(mio::Token(1), Ops::READ),
            context: ChannelContext::new(),
        })
    }
}

impl SocketChannel for BenchChannel {
    fn is_open(&self) -> bool {
        true
    }
    fn is_connect_complete(&self) -> bool {
        true
    }
    fn finish_connect(&self) -> Result<bool> {
        Ok(true)
    }
    fn register(&self, _registry: &mio::Registry, _token: mio::Token) -> Result<()> {
        Ok(())
    }
    fn set_write_interest(&self, interested: bool) -> Result<()> {
        let interest = self.key.interest_ops()?;
        let next = if interested {
            interest.with(Ops::WRITE)
        } else {
            interest.without(Ops::WRITE)
        };
        self.key.set_interest_ops(next)?;
        Ok(())
    }
    fn selection_key(&self) -> Option<&SelectionKey> {
        Some(&self.key)
    }
    fn context(&self) -> &ChannelContext {
        &self.context
    }
    fn selector(&self) -> Option<SelectorRef> {
        None
    }
    fn close(&self) {}
}

fn bench_queue_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("submission_queue");

    for batch in [64usize, 1024] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(
            BenchmarkId::new("push_drain", batch),
            &batch,
            |b, &batch| {
                let queue = SubmissionQueue::new();
                b.iter(|| {
                    for i in 0..batch {
                        queue.push(black_box(i)).unwrap();
                    }
                    black_box(queue.drain().len())
                });
            },
        );
    }

    group.bench_function("contended_push", |b| {
        b.iter(|| {
            let queue = Arc::new(SubmissionQueue::new());
            let producers: Vec<_> = (0..4)
                .map(|t| {
                    let queue = Arc::clone(&queue);
                    thread::spawn(move || {
                        for i in 0..256 {
                            queue.push(t * 256 + i).unwrap();
                        }
                    })
                })
                .collect();
            for p in producers {
                p.join().unwrap();
            }
            black_box(queue.drain().len())
        });
    });

    group.finish();
}

fn bench_write_queueing(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_queueing");

    group.throughput(Throughput::Elements(1));
    group.bench_function("queue_and_take", |b| {
        let channel = BenchChannel::new();
        let payload = vec![0u8; 256];
        b.iter(|| {
            let op = WriteOperation::single(channel.clone(), payload.clone(), Box::new(|_| {}));
            channel.context().queue_write_operation(op);
            let mut op = channel.context().take_write().unwrap();
            op.advance(black_box(256));
            black_box(op.is_fully_flushed())
        });
    });

    group.bench_function("interest_toggle", |b| {
        let channel = BenchChannel::new();
        b.iter(|| {
            channel.set_write_interest(true).unwrap();
            channel.set_write_interest(false).unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_queue_throughput, bench_write_queueing);
criterion_main!(benches);
